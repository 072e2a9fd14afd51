use std::collections::HashMap;
use std::io::Write;

use anyhow::Result;
use rust_decimal::Decimal;
use rusty_money::{iso, Money};
use tabwriter::TabWriter;

use crate::core::{Account, BankConnection, Category, LinkedAccount, Transaction};

/// Formats an amount in minor units in its currency, or as a plain decimal
/// followed by the code when the currency is unknown.
pub fn format_cents(cents: i64, currency: &str) -> String {
    match iso::find(currency) {
        Some(c) => Money::from_minor(cents, c).to_string(),
        None => format!("{} {}", Decimal::new(cents, 2), currency),
    }
}

fn format_sync(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

pub fn print_connections<T: Write>(
    wr: T,
    connections: &[(BankConnection, Vec<LinkedAccount>)],
) -> Result<()> {
    let mut tw = TabWriter::new(wr);
    writeln!(tw, "Institution\tConnection ID\tStatus\tAccount\tType\tBalance\tLast Sync")?;

    for (connection, linked) in connections {
        if linked.is_empty() {
            writeln!(
                tw,
                "{}\t{}\t{}\t-\t-\t-\t{}",
                connection.institution_name,
                connection.id,
                connection.status.to_string(),
                format_sync(connection.last_sync_at),
            )?;
        }

        for account in linked {
            writeln!(
                tw,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                connection.institution_name,
                connection.id,
                connection.status.to_string(),
                account.name,
                account.kind,
                format_cents(account.balance_cents, &account.currency),
                format_sync(account.last_sync_at),
            )?;
        }
    }

    tw.flush()?;

    Ok(())
}

pub fn print_accounts<T: Write>(wr: T, accounts: &[Account]) -> Result<()> {
    let mut tw = TabWriter::new(wr);
    writeln!(tw, "Account\tAccount ID\tType\tBalance")?;

    for account in accounts.iter() {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}",
            account.name,
            account.id,
            account.kind.to_string(),
            format_cents(account.balance_cents, &account.currency),
        )?;
    }

    tw.flush()?;

    Ok(())
}

pub fn print_review_queue<T: Write>(
    wr: T,
    txns: &[Transaction],
    categories: &HashMap<String, Category>,
) -> Result<()> {
    let mut tw = TabWriter::new(wr);
    writeln!(tw, "Date\tTransaction ID\tDescription\tType\tAmount\tCategory")?;

    for txn in txns {
        let category = categories
            .get(&txn.category_id)
            .map(|c| c.name.as_str())
            .unwrap_or("?");
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}",
            txn.date,
            txn.id,
            txn.description,
            txn.kind,
            Decimal::new(txn.amount_cents, 2),
            category,
        )?;
    }

    tw.flush()?;

    Ok(())
}
