use chrono::Utc;
use sea_query::{Expr, Iden, Order, Query, SelectStatement, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{decode_err, format_ts, Error, Result, SqliteStore};
use crate::core::{Account, AccountKind};

#[derive(Iden)]
enum Accounts {
    Table,
    Id,
    UserId,
    Name,
    Kind,
    BalanceCents,
    Currency,
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
                Accounts::Id,
                Accounts::UserId,
                Accounts::Name,
                Accounts::Kind,
                Accounts::BalanceCents,
                Accounts::Currency,
            ])
            .from(Accounts::Table)
            .to_owned()
    }

    pub async fn by_id(&mut self, id: &str) -> Result<Account> {
        let (query, values) = Self::select()
            .and_where(Expr::col(Accounts::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_as_with::<_, Account, _>(&query, values)
            .fetch_optional(&*self.0.conn)
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn list_for_user(&mut self, user_id: &str) -> Result<Vec<Account>> {
        let (query, values) = Self::select()
            .and_where(Expr::col(Accounts::UserId).eq(user_id))
            .order_by_expr(Expr::cust("rowid"), Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_as_with::<_, Account, _>(&query, values)
            .fetch_all(&*self.0.conn)
            .await?)
    }

    pub async fn create(&mut self, account: &Account) -> Result<()> {
        let (query, values) = Query::insert()
            .into_table(Accounts::Table)
            .columns([
                Accounts::Id,
                Accounts::UserId,
                Accounts::Name,
                Accounts::Kind,
                Accounts::BalanceCents,
                Accounts::Currency,
                Accounts::CreatedAt,
            ])
            .values_panic([
                account.id.as_str().into(),
                account.user_id.as_str().into(),
                account.name.as_str().into(),
                account.kind.to_string().into(),
                account.balance_cents.into(),
                account.currency.as_str().into(),
                format_ts(&Utc::now()).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(&*self.0.conn)
            .await?;

        Ok(())
    }

    pub async fn update_balance(&mut self, id: &str, balance_cents: i64) -> Result<()> {
        let (query, values) = Query::update()
            .table(Accounts::Table)
            .values([(Accounts::BalanceCents, balance_cents.into())])
            .and_where(Expr::col(Accounts::Id).eq(id))
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

impl<'r> FromRow<'r, SqliteRow> for Account {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        let kind: &str = row.try_get("kind")?;

        Ok(Account {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            kind: AccountKind::try_from(kind).map_err(decode_err)?,
            balance_cents: row.try_get("balance_cents")?,
            currency: row.try_get("currency")?,
        })
    }
}
