use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ConnectionStatus {
    Connected,
    Updating,
    LoginError,
    Other(String),
}

impl ConnectionStatus {
    /// Maps an item status reported by the aggregator. A successfully
    /// refreshed item counts as connected, everything else is kept verbatim.
    pub fn from_upstream(status: &str) -> Self {
        if status == aggregator_client::ITEM_STATUS_UPDATED {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::from(status.to_string())
        }
    }

    /// Statuses the scheduled sweep visits. An item the aggregator is still
    /// refreshing stays in rotation until it settles.
    pub fn syncable() -> [ConnectionStatus; 2] {
        [ConnectionStatus::Connected, ConnectionStatus::Updating]
    }
}

impl ToString for ConnectionStatus {
    fn to_string(&self) -> String {
        match self {
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Updating => "UPDATING",
            ConnectionStatus::LoginError => "LOGIN_ERROR",
            ConnectionStatus::Other(s) => s.as_str(),
        }
        .to_string()
    }
}

impl From<String> for ConnectionStatus {
    fn from(value: String) -> ConnectionStatus {
        match value.as_str() {
            "CONNECTED" => ConnectionStatus::Connected,
            "UPDATING" => ConnectionStatus::Updating,
            "LOGIN_ERROR" => ConnectionStatus::LoginError,
            _ => ConnectionStatus::Other(value),
        }
    }
}

impl From<ConnectionStatus> for String {
    fn from(status: ConnectionStatus) -> String {
        status.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BankConnection {
    pub id: String,
    pub user_id: String,
    pub item_id: String,
    pub institution_name: String,
    pub institution_logo: Option<String>,
    pub status: ConnectionStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
