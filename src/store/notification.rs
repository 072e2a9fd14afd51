use sea_query::{Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{format_ts, parse_ts, Result, SqliteStore};
use crate::core::Notification;

#[derive(Iden)]
enum Notifications {
    Table,
    Id,
    UserId,
    Title,
    Message,
    Kind,
    Read,
    CreatedAt,
}

pub struct Store<'a>(&'a mut SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a mut SqliteStore) -> Self {
        Self(store)
    }

    pub async fn create(&mut self, notification: &Notification) -> Result<()> {
        let (query, values) = Query::insert()
            .into_table(Notifications::Table)
            .columns([
                Notifications::Id,
                Notifications::UserId,
                Notifications::Title,
                Notifications::Message,
                Notifications::Kind,
                Notifications::Read,
                Notifications::CreatedAt,
            ])
            .values_panic([
                notification.id.as_str().into(),
                notification.user_id.as_str().into(),
                notification.title.as_str().into(),
                notification.message.as_str().into(),
                notification.kind.as_str().into(),
                notification.read.into(),
                format_ts(&notification.created_at).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;

        Ok(())
    }

    pub async fn list_for_user(&mut self, user_id: &str) -> Result<Vec<Notification>> {
        let (query, values) = Query::select()
            .columns([
                Notifications::Id,
                Notifications::UserId,
                Notifications::Title,
                Notifications::Message,
                Notifications::Kind,
                Notifications::Read,
                Notifications::CreatedAt,
            ])
            .from(Notifications::Table)
            .and_where(Expr::col(Notifications::UserId).eq(user_id))
            .order_by_expr(Expr::cust("rowid"), Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_as_with::<_, Notification, _>(&query, values)
            .fetch_all(&*self.0.conn)
            .await?)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Notification {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        Ok(Notification {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            kind: row.try_get("kind")?,
            read: row.try_get("read")?,
            created_at: parse_ts(row.try_get("created_at")?)?,
        })
    }
}
