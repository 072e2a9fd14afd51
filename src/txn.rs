use std::collections::HashMap;

use anyhow::Result;
use chrono::prelude::*;
use clap::ArgMatches;

use crate::display::print_review_queue;
use crate::required;
use crate::review;
use crate::settings::Settings;

fn parse_date(value: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(value, "%Y-%m-%d")?)
}

#[tracing::instrument(skip(settings))]
async fn pull(
    settings: Settings,
    user_id: &str,
    connection_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<()> {
    let mut store = settings.open_store().await?;
    let engine = settings.sync_engine()?;

    let result = engine
        .sync_connection(&mut store, user_id, connection_id, start, end)
        .await?;
    println!("{}", result.message);

    Ok(())
}

async fn review_queue(settings: Settings, user_id: &str) -> Result<()> {
    let mut store = settings.open_store().await?;
    let txns = store.txns().needs_review(user_id).await?;
    let categories = store
        .categories()
        .list_for_user(user_id)
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect::<HashMap<_, _>>();

    print_review_queue(std::io::stdout(), &txns, &categories)
}

async fn confirm(
    settings: Settings,
    user_id: &str,
    txn_id: &str,
    category_id: Option<&str>,
) -> Result<()> {
    let mut store = settings.open_store().await?;
    let txn = review::confirm(&mut store, user_id, txn_id, category_id).await?;
    println!("Confirmed {} in category {}.", txn.id, txn.category_id);

    Ok(())
}

pub(crate) async fn run(matches: &ArgMatches, settings: Settings) -> Result<()> {
    match matches.subcommand() {
        Some(("sync", sync_matches)) => {
            let today = Local::now().date_naive();
            let start = match sync_matches.value_of("begin") {
                Some(v) => parse_date(v)?,
                None => today - chrono::Duration::weeks(1),
            };
            let end = match sync_matches.value_of("until") {
                Some(v) => parse_date(v)?,
                None => today,
            };

            pull(
                settings,
                required(sync_matches, "user")?,
                required(sync_matches, "connection_id")?,
                start,
                end,
            )
            .await
        }
        Some(("review", review_matches)) => {
            review_queue(settings, required(review_matches, "user")?).await
        }
        Some(("confirm", confirm_matches)) => {
            confirm(
                settings,
                required(confirm_matches, "user")?,
                required(confirm_matches, "txn_id")?,
                confirm_matches.value_of("category"),
            )
            .await
        }
        _ => unreachable!("subcommand is required"),
    }
}
