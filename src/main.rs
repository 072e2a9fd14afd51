mod accounts;
mod bootstrap;
mod categorize;
mod core;
mod dedup;
mod display;
mod link;
mod normalize;
mod notify;
mod review;
mod settings;
mod store;
mod sync;
mod trigger;
mod txn;
mod upstream;

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDate};
use clap::{arg, ArgMatches, Command};
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::settings::Settings;

static CLIENT_NAME: &str = "bursar";

/// Value of an argument clap already enforces as required.
pub(crate) fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .value_of(name)
        .ok_or_else(|| anyhow!("missing required argument {}", name))
}

async fn sweep(matches: &ArgMatches, settings: Settings) -> Result<()> {
    let today = match matches.value_of("today") {
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")?,
        None => Local::now().date_naive(),
    };
    let mut store = settings.open_store().await?;
    let engine = settings.sync_engine()?;

    let report = engine.sweep(&mut store, today).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn run() -> Result<()> {
    let user = || arg!(user: -u --user <USER_ID> "The user owning the records.");
    let app = Command::new(CLIENT_NAME)
        .about("The bursar utility pulls transactions for linked bank connections from an \
         open-banking aggregator, categorizes them and records them in the ledger.")
        .version("0.1.0")
        .subcommand_required(true)
        .allow_external_subcommands(false)
        .arg(arg!(CONFIG: -c --config [FILE] "Sets a custom config file"))
        .arg(arg!(verbose: -v --verbose [Boolean] "Sets the level of verbosity"))
        .subcommand(Command::new("sync")
            .about("Runs the scheduled sweep over every connected connection and prints the run report.")
            .arg(arg!(today: --today [DATE] "The last day of the sync window, defaults to today.")))
        .subcommand(Command::new("link")
            .subcommand_required(true)
            .about("Manages bank connections.")
            .subcommand(Command::new("add")
                .about("Registers an item authorized through the connect widget.")
                .arg(user())
                .arg(arg!(item_id: <ITEM_ID> "The aggregator item ID.")))
            .subcommand(Command::new("status")
                .about("Displays connections, their linked accounts and balances.")
                .arg(user()))
            .subcommand(Command::new("delete")
                .about("Revokes a connection upstream and removes it locally.")
                .arg(user())
                .arg(arg!(connection_id: <CONNECTION_ID> "The connection to delete."))))
        .subcommand(Command::new("accounts")
            .about("Prints ledger accounts and balances to stdout.")
            .arg(user()))
        .subcommand(Command::new("transactions")
            .subcommand_required(true)
            .about("Pulls and reviews transactions.")
            .subcommand(Command::new("sync")
                .about("Pulls transactions for one connection, defaults to a weeks worth of transactions going back from today.")
                .arg(user())
                .arg(arg!(connection_id: <CONNECTION_ID> "The connection to sync."))
                .arg(arg!(begin: --begin [DATE] "The first day of transactions to pull, defaults to a week before today. Start date is inclusive."))
                .arg(arg!(until: --until [DATE] "The last day of transactions to pull, defaults to today. End date is inclusive.")))
            .subcommand(Command::new("review")
                .about("Lists transactions waiting for category confirmation.")
                .arg(user()))
            .subcommand(Command::new("confirm")
                .about("Confirms the category of a transaction in the review queue.")
                .arg(user())
                .arg(arg!(txn_id: <TXN_ID> "The transaction to confirm."))
                .arg(arg!(category: --category [CATEGORY_ID] "Moves the transaction to another category of the same type."))))
        .subcommand(Command::new("serve")
            .about("Serves the action trigger endpoint."));

    let matches = app.get_matches();

    if matches.value_of("verbose") == Some("true") {
        tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let settings = Settings::new(matches.value_of("CONFIG"))?;
    match matches.subcommand() {
        Some(("sync", sync_matches)) => sweep(sync_matches, settings).await?,
        Some(("link", link_matches)) => link::run(link_matches, settings).await?,
        Some(("accounts", account_matches)) => accounts::run(account_matches, settings).await?,
        Some(("transactions", txn_matches)) => txn::run(txn_matches, settings).await?,
        Some(("serve", _)) => trigger::serve(settings).await?,
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        println!("{}", err);
        std::process::exit(1);
    }
}
