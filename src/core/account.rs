use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Bank,
    CreditCard,
    Cash,
}

impl AccountKind {
    /// Local ledger kind for an aggregator account type.
    pub fn from_upstream(kind: &str) -> Self {
        match kind {
            "CREDIT" => AccountKind::CreditCard,
            _ => AccountKind::Bank,
        }
    }
}

impl ToString for AccountKind {
    fn to_string(&self) -> String {
        match self {
            AccountKind::Bank => "bank",
            AccountKind::CreditCard => "credit_card",
            AccountKind::Cash => "cash",
        }
        .to_string()
    }
}

impl TryFrom<&str> for AccountKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "bank" => Ok(AccountKind::Bank),
            "credit_card" => Ok(AccountKind::CreditCard),
            "cash" => Ok(AccountKind::Cash),
            other => Err(format!("unknown account kind {}", other)),
        }
    }
}

/// A local ledger account. For aggregator-backed accounts the balance mirrors
/// the upstream value after each sync.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub kind: AccountKind,
    pub balance_cents: i64,
    pub currency: String,
}

/// An account reported by the aggregator under a connection.
#[derive(Debug, Clone, Serialize)]
pub struct LinkedAccount {
    pub id: String,
    pub connection_id: String,
    pub external_id: String,
    pub account_id: Option<String>,
    pub name: String,
    /// Account type as reported upstream (`BANK`, `CREDIT`, ...).
    pub kind: String,
    pub balance_cents: i64,
    pub currency: String,
    pub last_sync_at: Option<DateTime<Utc>>,
}
