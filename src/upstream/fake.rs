//! In-process aggregator used by the sync and trigger tests.
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use aggregator_client::{Connector, StatusCode};
use axum::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::{Account, Error, Item, Login, Result, Transaction, Upstream};

pub(crate) fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub(crate) fn raw(
    id: &str,
    description: &str,
    amount: &str,
    day: &str,
    balance: Option<&str>,
) -> Transaction {
    Transaction {
        id: id.to_string(),
        description: description.to_string(),
        amount: dec(amount),
        date: NaiveDate::parse_from_str(day, "%Y-%m-%d").unwrap(),
        balance: balance.map(dec),
        currency_code: Some("BRL".to_string()),
    }
}

/// Cloning shares the record of deleted items, so a test can keep a handle
/// after moving the bank into an engine.
#[derive(Clone, Default)]
pub(crate) struct FakeBank {
    pub(crate) reject_login: bool,
    pub(crate) items: HashMap<String, Item>,
    pub(crate) failing_items: HashSet<String>,
    pub(crate) accounts: HashMap<String, Vec<Account>>,
    pub(crate) transactions: HashMap<String, Vec<Transaction>>,
    pub(crate) deleted: Arc<Mutex<Vec<String>>>,
}

impl FakeBank {
    /// Adds an updated item whose accounts are `(id, balance)` pairs.
    pub(crate) fn with_item(mut self, item_id: &str, accounts: &[(&str, &str)]) -> Self {
        self.items.insert(
            item_id.to_string(),
            Item {
                id: item_id.to_string(),
                status: "UPDATED".to_string(),
                execution_status: None,
                connector: Some(Connector {
                    name: format!("Banco {}", item_id),
                    image_url: None,
                }),
                error: None,
            },
        );
        self.accounts.insert(
            item_id.to_string(),
            accounts
                .iter()
                .map(|(id, balance)| Account {
                    id: id.to_string(),
                    name: format!("Conta {}", id),
                    kind: "BANK".to_string(),
                    subtype: None,
                    balance: dec(balance),
                    currency_code: Some("BRL".to_string()),
                })
                .collect(),
        );
        self
    }

    pub(crate) fn with_transactions(mut self, account_id: &str, txns: Vec<Transaction>) -> Self {
        self.transactions.insert(account_id.to_string(), txns);
        self
    }

    /// Makes every request about `item_id` fail with a server error.
    pub(crate) fn failing(mut self, item_id: &str) -> Self {
        self.failing_items.insert(item_id.to_string());
        self
    }

    fn status_error(body: &str) -> Error {
        Error::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl Login for FakeBank {
    type Session = FakeBank;

    async fn login(&self) -> Result<FakeBank> {
        if self.reject_login {
            return Err(Error::Auth {
                status: StatusCode::UNAUTHORIZED,
                body: r#"{"message":"invalid credentials"}"#.to_string(),
            });
        }
        Ok(self.clone())
    }
}

#[async_trait]
impl Upstream for FakeBank {
    async fn item(&self, item_id: &str) -> Result<Item> {
        if self.failing_items.contains(item_id) {
            return Err(Self::status_error(r#"{"code":500,"message":"connector down"}"#));
        }
        self.items
            .get(item_id)
            .cloned()
            .ok_or_else(|| Self::status_error("item not found"))
    }

    async fn accounts(&self, item_id: &str) -> Result<Vec<Account>> {
        Ok(self.accounts.get(item_id).cloned().unwrap_or_default())
    }

    async fn transactions(
        &self,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions
            .get(account_id)
            .map(|txns| {
                txns.iter()
                    .filter(|t| t.date >= from && t.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        if self.failing_items.contains(item_id) {
            return Err(Self::status_error("cannot delete"));
        }
        self.deleted.lock().unwrap().push(item_id.to_string());
        Ok(())
    }
}
