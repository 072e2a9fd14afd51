use chrono::Utc;
use sea_query::{Expr, Iden, Order, Query, SelectStatement, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{decode_err, format_ts, Error, Result, SqliteStore};
use crate::core::{Category, TxnKind};

#[derive(Iden)]
enum Categories {
    Table,
    Id,
    UserId,
    Name,
    Emoji,
    Color,
    Kind,
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
                Categories::Id,
                Categories::UserId,
                Categories::Name,
                Categories::Emoji,
                Categories::Color,
                Categories::Kind,
            ])
            .from(Categories::Table)
            .to_owned()
    }

    pub async fn list_for_user(&mut self, user_id: &str) -> Result<Vec<Category>> {
        let (query, values) = Self::select()
            .and_where(Expr::col(Categories::UserId).eq(user_id))
            .order_by_expr(Expr::cust("rowid"), Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_as_with::<_, Category, _>(&query, values)
            .fetch_all(&*self.0.conn)
            .await?)
    }

    pub async fn get(&mut self, user_id: &str, id: &str) -> Result<Category> {
        let (query, values) = Self::select()
            .and_where(Expr::col(Categories::UserId).eq(user_id))
            .and_where(Expr::col(Categories::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_as_with::<_, Category, _>(&query, values)
            .fetch_optional(&*self.0.conn)
            .await?
            .ok_or(Error::NotFound)
    }

    /// Inserts a category. A second fallback category of the same type for a
    /// user is rejected with [`Error::AlreadyExists`].
    pub async fn create(&mut self, category: &Category) -> Result<()> {
        let (query, values) = Query::insert()
            .into_table(Categories::Table)
            .columns([
                Categories::Id,
                Categories::UserId,
                Categories::Name,
                Categories::Emoji,
                Categories::Color,
                Categories::Kind,
                Categories::CreatedAt,
            ])
            .values_panic([
                category.id.as_str().into(),
                category.user_id.as_str().into(),
                category.name.as_str().into(),
                category.emoji.as_str().into(),
                category.color.as_str().into(),
                category.kind.as_str().into(),
                format_ts(&Utc::now()).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;

        Ok(())
    }
}

impl<'r> FromRow<'r, SqliteRow> for Category {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        let kind: &str = row.try_get("kind")?;

        Ok(Category {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            emoji: row.try_get("emoji")?,
            color: row.try_get("color")?,
            kind: kind.parse::<TxnKind>().map_err(decode_err)?,
        })
    }
}
