use anyhow::Result;
use clap::ArgMatches;

use crate::display::print_connections;
use crate::required;
use crate::settings::Settings;

async fn add(settings: Settings, user_id: &str, item_id: &str) -> Result<()> {
    let mut store = settings.open_store().await?;
    let engine = settings.sync_engine()?;

    let connection = engine.link_connection(&mut store, user_id, item_id).await?;
    println!(
        "Linked {} as connection {} ({}).",
        connection.institution_name,
        connection.id,
        connection.status.to_string()
    );

    Ok(())
}

async fn remove(settings: Settings, user_id: &str, connection_id: &str) -> Result<()> {
    let mut store = settings.open_store().await?;
    let engine = settings.sync_engine()?;

    engine
        .delete_connection(&mut store, Some(user_id), connection_id)
        .await?;
    println!("Deleted connection {}.", connection_id);

    Ok(())
}

async fn status(settings: Settings, user_id: &str) -> Result<()> {
    let mut store = settings.open_store().await?;

    let mut connections = vec![];
    for connection in store.connections().list_for_user(user_id).await? {
        let linked = store.linked().by_connection(&connection.id).await?;
        connections.push((connection, linked));
    }

    print_connections(std::io::stdout(), &connections)
}

pub(crate) async fn run(matches: &ArgMatches, settings: Settings) -> Result<()> {
    match matches.subcommand() {
        Some(("add", add_matches)) => {
            add(
                settings,
                required(add_matches, "user")?,
                required(add_matches, "item_id")?,
            )
            .await
        }
        Some(("delete", remove_matches)) => {
            remove(
                settings,
                required(remove_matches, "user")?,
                required(remove_matches, "connection_id")?,
            )
            .await
        }
        Some(("status", status_matches)) => {
            status(settings, required(status_matches, "user")?).await
        }
        _ => unreachable!("subcommand is required"),
    }
}
