use anyhow::Result;
use clap::ArgMatches;

use crate::display::print_accounts;
use crate::required;
use crate::settings::Settings;

async fn print(settings: Settings, user_id: &str) -> Result<()> {
    let mut store = settings.open_store().await?;
    let accounts = store.accounts().list_for_user(user_id).await?;

    print_accounts(std::io::stdout(), &accounts)
}

pub(crate) async fn run(matches: &ArgMatches, settings: Settings) -> Result<()> {
    print(settings, required(matches, "user")?).await
}
