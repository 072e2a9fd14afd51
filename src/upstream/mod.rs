mod aggregator;
#[cfg(test)]
pub(crate) mod fake;

use axum::async_trait;
use chrono::NaiveDate;

pub use aggregator_client::{Account, Error, Item, Transaction};

pub type Result<T> = ::std::result::Result<T, Error>;

/// Read and revoke operations against the aggregator, available once a run
/// has authenticated.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn item(&self, item_id: &str) -> Result<Item>;

    async fn accounts(&self, item_id: &str) -> Result<Vec<Account>>;

    /// Every transaction of `account_id` dated within `[from, to]`.
    async fn transactions(
        &self,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>>;

    async fn delete_item(&self, item_id: &str) -> Result<()>;
}

/// Exchanges client credentials for a session scoped to a single run.
#[async_trait]
pub trait Login: Send + Sync {
    type Session: Upstream;

    async fn login(&self) -> Result<Self::Session>;
}
