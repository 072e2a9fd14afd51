use chrono::{DateTime, Utc};
use sea_query::{Expr, Iden, Order, Query, SelectStatement, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{format_ts, parse_opt_ts, parse_ts, Error, Result, SqliteStore};
use crate::core::{BankConnection, ConnectionStatus};

#[derive(Iden)]
enum BankConnections {
    Table,
    Id,
    UserId,
    ItemId,
    InstitutionName,
    InstitutionLogo,
    Status,
    LastSyncAt,
    CreatedAt,
}

pub struct Store<'a>(&'a mut SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a mut SqliteStore) -> Self {
        Self(store)
    }

    fn select() -> SelectStatement {
        Query::select()
            .columns([
                BankConnections::Id,
                BankConnections::UserId,
                BankConnections::ItemId,
                BankConnections::InstitutionName,
                BankConnections::InstitutionLogo,
                BankConnections::Status,
                BankConnections::LastSyncAt,
                BankConnections::CreatedAt,
            ])
            .from(BankConnections::Table)
            .order_by(BankConnections::CreatedAt, Order::Asc)
            .order_by_expr(Expr::cust("rowid"), Order::Asc)
            .to_owned()
    }

    pub async fn create(&mut self, connection: &BankConnection) -> Result<()> {
        let (query, values) = Query::insert()
            .into_table(BankConnections::Table)
            .columns([
                BankConnections::Id,
                BankConnections::UserId,
                BankConnections::ItemId,
                BankConnections::InstitutionName,
                BankConnections::InstitutionLogo,
                BankConnections::Status,
                BankConnections::LastSyncAt,
                BankConnections::CreatedAt,
            ])
            .values_panic([
                connection.id.as_str().into(),
                connection.user_id.as_str().into(),
                connection.item_id.as_str().into(),
                connection.institution_name.as_str().into(),
                connection.institution_logo.as_deref().into(),
                connection.status.to_string().into(),
                connection.last_sync_at.as_ref().map(format_ts).into(),
                format_ts(&connection.created_at).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;

        Ok(())
    }

    /// Looks a connection up by id. With `user_id` set the lookup is restricted
    /// to that user's rows and a connection owned by someone else is reported
    /// as not found.
    pub async fn get(&mut self, user_id: Option<&str>, id: &str) -> Result<BankConnection> {
        let mut select = Self::select();
        select.and_where(Expr::col(BankConnections::Id).eq(id));
        if let Some(user_id) = user_id {
            select.and_where(Expr::col(BankConnections::UserId).eq(user_id));
        }
        let (query, values) = select.build_sqlx(SqliteQueryBuilder);

        sqlx::query_as_with::<_, BankConnection, _>(&query, values)
            .fetch_optional(&*self.0.conn)
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn by_item(&mut self, user_id: &str, item_id: &str) -> Result<Option<BankConnection>> {
        let (query, values) = Self::select()
            .and_where(Expr::col(BankConnections::UserId).eq(user_id))
            .and_where(Expr::col(BankConnections::ItemId).eq(item_id))
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_as_with::<_, BankConnection, _>(&query, values)
            .fetch_optional(&*self.0.conn)
            .await?)
    }

    /// Connections in any of `statuses`, oldest first.
    pub async fn list_by_status(
        &mut self,
        statuses: &[ConnectionStatus],
    ) -> Result<Vec<BankConnection>> {
        let (query, values) = Self::select()
            .and_where(
                Expr::col(BankConnections::Status)
                    .is_in(statuses.iter().map(ToString::to_string)),
            )
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_as_with::<_, BankConnection, _>(&query, values)
            .fetch_all(&*self.0.conn)
            .await?)
    }

    pub async fn list_for_user(&mut self, user_id: &str) -> Result<Vec<BankConnection>> {
        let (query, values) = Self::select()
            .and_where(Expr::col(BankConnections::UserId).eq(user_id))
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_as_with::<_, BankConnection, _>(&query, values)
            .fetch_all(&*self.0.conn)
            .await?)
    }

    /// Stores the institution metadata and status last reported upstream.
    pub async fn update_details(
        &mut self,
        id: &str,
        institution_name: &str,
        institution_logo: Option<&str>,
        status: &ConnectionStatus,
    ) -> Result<()> {
        let (query, values) = Query::update()
            .table(BankConnections::Table)
            .values([
                (BankConnections::InstitutionName, institution_name.into()),
                (BankConnections::InstitutionLogo, institution_logo.into()),
                (BankConnections::Status, status.to_string().into()),
            ])
            .and_where(Expr::col(BankConnections::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    pub async fn touch_synced(&mut self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let (query, values) = Query::update()
            .table(BankConnections::Table)
            .values([(BankConnections::LastSyncAt, format_ts(&at).into())])
            .and_where(Expr::col(BankConnections::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;

        Ok(())
    }

    pub async fn delete(&mut self, id: &str) -> Result<()> {
        let (query, values) = Query::delete()
            .from_table(BankConnections::Table)
            .and_where(Expr::col(BankConnections::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }
}

impl<'r> FromRow<'r, SqliteRow> for BankConnection {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        Ok(BankConnection {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            item_id: row.try_get("item_id")?,
            institution_name: row.try_get("institution_name")?,
            institution_logo: row.try_get("institution_logo")?,
            status: ConnectionStatus::from(row.try_get::<String, _>("status")?),
            last_sync_at: parse_opt_ts(row.try_get("last_sync_at")?)?,
            created_at: parse_ts(row.try_get("created_at")?)?,
        })
    }
}
