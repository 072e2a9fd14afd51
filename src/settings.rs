use std::time::Duration;

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::categorize::KeywordTable;
use crate::store::SqliteStore;
use crate::sync::{SyncEngine, DEFAULT_WINDOW_DAYS};
use crate::CLIENT_NAME;

const CONFIG_NAME: &str = "config.toml";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub db_file: String,
    pub aggregator: Aggregator,
    pub sync: SyncSettings,
    pub trigger: Trigger,
}

#[derive(Debug, Deserialize)]
pub struct Aggregator {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub page_size: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SyncSettings {
    pub window_days: i64,
    /// TOML keyword table replacing the built-in one.
    pub keywords: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Trigger {
    pub bind: String,
    pub service_token: Option<String>,
}

impl Settings {
    pub fn new(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut s = Config::builder()
            .set_default("db_file", default_data_path())?
            .set_default("aggregator.base_url", "https://api.pluggy.ai")?
            .set_default("aggregator.client_id", "")?
            .set_default("aggregator.client_secret", "")?
            .set_default("aggregator.page_size", 500)?
            .set_default("aggregator.timeout_secs", 30)?
            .set_default("sync.window_days", DEFAULT_WINDOW_DAYS)?
            .set_default("trigger.bind", "127.0.0.1:4545")?;

        if let Some(path) = config_path {
            s = s.add_source(File::with_name(path));
        } else {
            s = s.add_source(File::with_name(&default_config_path()).required(false));
        }

        s.add_source(Environment::with_prefix("BURSAR").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn db_uri(&self) -> String {
        format!("sqlite://{}", self.db_file)
    }

    /// Opens the ledger database, creating its directory on first use.
    pub async fn open_store(&self) -> anyhow::Result<SqliteStore> {
        if let Some(dir) = std::path::Path::new(&self.db_file).parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        }

        SqliteStore::new(&self.db_uri())
            .await
            .with_context(|| format!("failed to open database {}", self.db_file))
    }

    pub fn sync_engine(&self) -> anyhow::Result<SyncEngine<aggregator_client::Client>> {
        Ok(SyncEngine::new(
            self.aggregator_client()?,
            &self.keyword_table()?,
            self.sync.window_days,
        ))
    }

    pub fn aggregator_client(&self) -> anyhow::Result<aggregator_client::Client> {
        aggregator_client::Builder::new()
            .with_base_url(self.aggregator.base_url.as_str())
            .with_credentials(aggregator_client::Credentials {
                client_id: self.aggregator.client_id.clone(),
                client_secret: self.aggregator.client_secret.clone(),
            })
            .with_timeout(Duration::from_secs(self.aggregator.timeout_secs))
            .with_page_size(self.aggregator.page_size)
            .build()
            .context("failed to build aggregator client")
    }

    pub fn keyword_table(&self) -> anyhow::Result<KeywordTable> {
        match &self.sync.keywords {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read keyword table {}", path))?;
                KeywordTable::from_toml(&content)
                    .with_context(|| format!("invalid keyword table {}", path))
            }
            None => Ok(KeywordTable::builtin()),
        }
    }
}

fn default_data_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()))
        .join(CLIENT_NAME)
        .join(format!("{}.db", CLIENT_NAME))
        .display()
        .to_string()
}

fn default_config_path() -> String {
    dirs::config_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()))
        .join(CLIENT_NAME)
        .join(CONFIG_NAME)
        .display()
        .to_string()
}
