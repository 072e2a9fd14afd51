mod account;
mod category;
mod connection;
mod linked;
mod notification;
mod txn;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Error as SqlxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record not found")]
    NotFound,
    #[error("conflicting data already exists")]
    AlreadyExists,
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Database(SqlxError),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl From<SqlxError> for Error {
    fn from(e: SqlxError) -> Self {
        match e {
            SqlxError::RowNotFound => Error::NotFound,
            SqlxError::Database(db) if db.is_unique_violation() => Error::AlreadyExists,
            e => Error::Database(e),
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        self.to_string() == other.to_string()
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

pub struct SqliteStore {
    conn: Arc<sqlx::pool::Pool<Sqlite>>,
}

impl SqliteStore {
    pub async fn new(uri: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(uri)?
            .create_if_missing(true)
            .foreign_keys(true);

        // A single connection keeps `sqlite::memory:` databases shared between
        // calls and serializes writers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            conn: Arc::new(pool),
        })
    }

    pub fn connections(&mut self) -> connection::Store {
        connection::Store::new(self)
    }

    pub fn linked(&mut self) -> linked::Store {
        linked::Store::new(self)
    }

    pub fn accounts(&mut self) -> account::Store {
        account::Store::new(self)
    }

    pub fn categories(&mut self) -> category::Store {
        category::Store::new(self)
    }

    pub fn txns(&mut self) -> txn::Store {
        txn::Store::new(self)
    }

    pub fn notifications(&mut self) -> notification::Store {
        notification::Store::new(self)
    }
}

/// Fixed-width UTC timestamps, so stored values sort lexically.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> ::std::result::Result<DateTime<Utc>, SqlxError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SqlxError::Decode(Box::new(e)))
}

fn parse_opt_ts(value: Option<String>) -> ::std::result::Result<Option<DateTime<Utc>>, SqlxError> {
    value.as_deref().map(parse_ts).transpose()
}

fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(value: &str) -> ::std::result::Result<NaiveDate, SqlxError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| SqlxError::Decode(Box::new(e)))
}

fn decode_err(message: String) -> SqlxError {
    SqlxError::Decode(Box::new(Error::Corrupt(message)))
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{DateTime, Utc};
    use ulid::Ulid;

    use super::SqliteStore;
    use crate::core::{
        Account, AccountKind, BankConnection, Category, ConnectionStatus, LinkedAccount, TxnKind,
    };

    pub(crate) struct TestStore {
        store: SqliteStore,
    }

    impl TestStore {
        pub(crate) async fn new() -> Self {
            TestStore {
                store: SqliteStore::new("sqlite::memory:").await.unwrap(),
            }
        }

        pub(crate) async fn new_connection(&mut self, user_id: &str) -> BankConnection {
            let connection = BankConnection {
                id: Ulid::new().to_string(),
                user_id: user_id.to_string(),
                item_id: Ulid::new().to_string(),
                institution_name: "Banco Teste".to_string(),
                institution_logo: None,
                status: ConnectionStatus::Connected,
                last_sync_at: None,
                created_at: Utc::now(),
            };

            self.store.connections().create(&connection).await.unwrap();

            connection
        }

        pub(crate) async fn new_account(&mut self, user_id: &str) -> Account {
            let account = Account {
                id: Ulid::new().to_string(),
                user_id: user_id.to_string(),
                name: "Conta Corrente".to_string(),
                kind: AccountKind::Bank,
                balance_cents: 0,
                currency: "BRL".to_string(),
            };

            self.store.accounts().create(&account).await.unwrap();

            account
        }

        pub(crate) async fn new_linked(
            &mut self,
            connection: &BankConnection,
            external_id: &str,
        ) -> LinkedAccount {
            let account = self.new_account(&connection.user_id).await;
            let linked = LinkedAccount {
                id: Ulid::new().to_string(),
                connection_id: connection.id.clone(),
                external_id: external_id.to_string(),
                account_id: Some(account.id),
                name: "Conta Corrente".to_string(),
                kind: "BANK".to_string(),
                balance_cents: 0,
                currency: "BRL".to_string(),
                last_sync_at: None,
            };

            self.store.linked().create(&linked).await.unwrap();

            linked
        }

        pub(crate) async fn new_category(
            &mut self,
            user_id: &str,
            name: &str,
            kind: TxnKind,
        ) -> Category {
            let category = Category {
                id: Ulid::new().to_string(),
                user_id: user_id.to_string(),
                name: name.to_string(),
                emoji: "🍔".to_string(),
                color: "#f97316".to_string(),
                kind,
            };

            self.store.categories().create(&category).await.unwrap();

            category
        }

        pub(crate) fn db(&mut self) -> &mut SqliteStore {
            &mut self.store
        }

        /// Runs raw SQL against the test database, used to put the schema
        /// into states the store would never produce itself.
        pub(crate) async fn exec(&mut self, sql: &str) {
            sqlx::query(sql).execute(&*self.store.conn).await.unwrap();
        }
    }

    #[tokio::test]
    async fn opens_with_migrations_applied() {
        let mut store = TestStore::new().await;

        assert!(store.db().connections().list_for_user("nobody").await.unwrap().is_empty());
    }

    #[test]
    fn timestamps_sort_in_time_order() {
        let whole = DateTime::parse_from_rfc3339("2024-03-15T10:00:00Z").unwrap();
        let fraction = DateTime::parse_from_rfc3339("2024-03-15T10:00:00.5Z").unwrap();

        let whole = super::format_ts(&whole.with_timezone(&Utc));
        let fraction = super::format_ts(&fraction.with_timezone(&Utc));

        assert_eq!(whole, "2024-03-15T10:00:00.000000Z");
        assert!(whole < fraction);
    }
}
