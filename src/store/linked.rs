use chrono::{DateTime, Utc};
use sea_query::{Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{format_ts, parse_opt_ts, Result, SqliteStore};
use crate::core::LinkedAccount;

#[derive(Iden)]
enum LinkedAccounts {
    Table,
    Id,
    ConnectionId,
    ExternalId,
    AccountId,
    Name,
    Kind,
    BalanceCents,
    Currency,
    LastSyncAt,
    CreatedAt,
}

pub struct Store<'a>(&'a mut SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a mut SqliteStore) -> Self {
        Self(store)
    }

    pub async fn create(&mut self, linked: &LinkedAccount) -> Result<()> {
        let (query, values) = Query::insert()
            .into_table(LinkedAccounts::Table)
            .columns([
                LinkedAccounts::Id,
                LinkedAccounts::ConnectionId,
                LinkedAccounts::ExternalId,
                LinkedAccounts::AccountId,
                LinkedAccounts::Name,
                LinkedAccounts::Kind,
                LinkedAccounts::BalanceCents,
                LinkedAccounts::Currency,
                LinkedAccounts::LastSyncAt,
                LinkedAccounts::CreatedAt,
            ])
            .values_panic([
                linked.id.as_str().into(),
                linked.connection_id.as_str().into(),
                linked.external_id.as_str().into(),
                linked.account_id.as_deref().into(),
                linked.name.as_str().into(),
                linked.kind.as_str().into(),
                linked.balance_cents.into(),
                linked.currency.as_str().into(),
                linked.last_sync_at.as_ref().map(format_ts).into(),
                format_ts(&Utc::now()).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;

        Ok(())
    }

    /// Linked accounts of a connection in the order they were created.
    pub async fn by_connection(&mut self, connection_id: &str) -> Result<Vec<LinkedAccount>> {
        let (query, values) = Query::select()
            .columns([
                LinkedAccounts::Id,
                LinkedAccounts::ConnectionId,
                LinkedAccounts::ExternalId,
                LinkedAccounts::AccountId,
                LinkedAccounts::Name,
                LinkedAccounts::Kind,
                LinkedAccounts::BalanceCents,
                LinkedAccounts::Currency,
                LinkedAccounts::LastSyncAt,
            ])
            .from(LinkedAccounts::Table)
            .and_where(Expr::col(LinkedAccounts::ConnectionId).eq(connection_id))
            .order_by_expr(Expr::cust("rowid"), Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_as_with::<_, LinkedAccount, _>(&query, values)
            .fetch_all(&*self.0.conn)
            .await?)
    }

    pub async fn update_balance(
        &mut self,
        id: &str,
        balance_cents: i64,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        let (query, values) = Query::update()
            .table(LinkedAccounts::Table)
            .values([
                (LinkedAccounts::BalanceCents, balance_cents.into()),
                (LinkedAccounts::LastSyncAt, format_ts(&synced_at).into()),
            ])
            .and_where(Expr::col(LinkedAccounts::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;

        Ok(())
    }

    /// Removes every linked account of a connection. Local accounts they map
    /// to are left in place.
    pub async fn delete_by_connection(&mut self, connection_id: &str) -> Result<u64> {
        let (query, values) = Query::delete()
            .from_table(LinkedAccounts::Table)
            .and_where(Expr::col(LinkedAccounts::ConnectionId).eq(connection_id))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;

        Ok(result.rows_affected())
    }
}

impl<'r> FromRow<'r, SqliteRow> for LinkedAccount {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        Ok(LinkedAccount {
            id: row.try_get("id")?,
            connection_id: row.try_get("connection_id")?,
            external_id: row.try_get("external_id")?,
            account_id: row.try_get("account_id")?,
            name: row.try_get("name")?,
            kind: row.try_get("kind")?,
            balance_cents: row.try_get("balance_cents")?,
            currency: row.try_get("currency")?,
            last_sync_at: parse_opt_ts(row.try_get("last_sync_at")?)?,
        })
    }
}
