use chrono::Utc;
use sea_query::{Expr, Iden, Order, Query, SelectStatement, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{decode_err, format_date, format_ts, parse_date, Error, Result, SqliteStore};
use crate::core::{Transaction, TxnKind};
use crate::dedup::LedgerEntry;

#[derive(Iden)]
enum Transactions {
    Table,
    Id,
    UserId,
    AccountId,
    CategoryId,
    Description,
    AmountCents,
    Kind,
    Date,
    NeedsReview,
    ExternalId,
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
                Transactions::Id,
                Transactions::UserId,
                Transactions::AccountId,
                Transactions::CategoryId,
                Transactions::Description,
                Transactions::AmountCents,
                Transactions::Kind,
                Transactions::Date,
                Transactions::NeedsReview,
                Transactions::ExternalId,
            ])
            .from(Transactions::Table)
            .to_owned()
    }

    /// Dedup identities of every transaction already stored for an account.
    pub async fn ledger(&mut self, user_id: &str, account_id: &str) -> Result<Vec<LedgerEntry>> {
        let (query, values) = Query::select()
            .columns([
                Transactions::Description,
                Transactions::Date,
                Transactions::AmountCents,
                Transactions::ExternalId,
            ])
            .from(Transactions::Table)
            .and_where(Expr::col(Transactions::UserId).eq(user_id))
            .and_where(Expr::col(Transactions::AccountId).eq(account_id))
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(&*self.0.conn)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(LedgerEntry {
                description: row.try_get("description")?,
                date: parse_date(row.try_get("date")?)?,
                amount_cents: row.try_get("amount_cents")?,
                external_id: row.try_get("external_id")?,
            });
        }

        Ok(entries)
    }

    /// Inserts a batch atomically: either every row is stored or none is.
    pub async fn insert_batch(&mut self, txns: &[Transaction]) -> Result<u64> {
        if txns.is_empty() {
            return Ok(0);
        }

        let created_at = format_ts(&Utc::now());
        let mut tx = self.0.conn.begin().await?;
        let mut inserted = 0;
        for txn in txns {
            let (query, values) = Query::insert()
                .into_table(Transactions::Table)
                .columns([
                    Transactions::Id,
                    Transactions::UserId,
                    Transactions::AccountId,
                    Transactions::CategoryId,
                    Transactions::Description,
                    Transactions::AmountCents,
                    Transactions::Kind,
                    Transactions::Date,
                    Transactions::NeedsReview,
                    Transactions::ExternalId,
                    Transactions::CreatedAt,
                ])
                .values_panic([
                    txn.id.as_str().into(),
                    txn.user_id.as_str().into(),
                    txn.account_id.as_str().into(),
                    txn.category_id.as_str().into(),
                    txn.description.as_str().into(),
                    txn.amount_cents.into(),
                    txn.kind.as_str().into(),
                    format_date(&txn.date).into(),
                    txn.needs_review.into(),
                    txn.external_id.as_deref().into(),
                    created_at.as_str().into(),
                ])
                .build_sqlx(SqliteQueryBuilder);

            inserted += sqlx::query_with(&query, values)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    pub async fn get(&mut self, user_id: &str, id: &str) -> Result<Transaction> {
        let (query, values) = Self::select()
            .and_where(Expr::col(Transactions::UserId).eq(user_id))
            .and_where(Expr::col(Transactions::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_as_with::<_, Transaction, _>(&query, values)
            .fetch_optional(&*self.0.conn)
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn by_account(&mut self, user_id: &str, account_id: &str) -> Result<Vec<Transaction>> {
        let (query, values) = Self::select()
            .and_where(Expr::col(Transactions::UserId).eq(user_id))
            .and_where(Expr::col(Transactions::AccountId).eq(account_id))
            .order_by(Transactions::Date, Order::Asc)
            .order_by_expr(Expr::cust("rowid"), Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_as_with::<_, Transaction, _>(&query, values)
            .fetch_all(&*self.0.conn)
            .await?)
    }

    /// The review queue: transactions whose category came from a fallback.
    pub async fn needs_review(&mut self, user_id: &str) -> Result<Vec<Transaction>> {
        let (query, values) = Self::select()
            .and_where(Expr::col(Transactions::UserId).eq(user_id))
            .and_where(Expr::col(Transactions::NeedsReview).eq(true))
            .order_by(Transactions::Date, Order::Desc)
            .build_sqlx(SqliteQueryBuilder);

        Ok(sqlx::query_as_with::<_, Transaction, _>(&query, values)
            .fetch_all(&*self.0.conn)
            .await?)
    }

    /// Assigns `category_id` and clears the review flag.
    pub async fn confirm(&mut self, user_id: &str, id: &str, category_id: &str) -> Result<()> {
        let (query, values) = Query::update()
            .table(Transactions::Table)
            .values([
                (Transactions::CategoryId, category_id.into()),
                (Transactions::NeedsReview, false.into()),
            ])
            .and_where(Expr::col(Transactions::UserId).eq(user_id))
            .and_where(Expr::col(Transactions::Id).eq(id))
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

impl<'r> FromRow<'r, SqliteRow> for Transaction {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        let kind: &str = row.try_get("kind")?;

        Ok(Transaction {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            account_id: row.try_get("account_id")?,
            category_id: row.try_get("category_id")?,
            description: row.try_get("description")?,
            amount_cents: row.try_get("amount_cents")?,
            kind: kind.parse::<TxnKind>().map_err(decode_err)?,
            date: parse_date(row.try_get("date")?)?,
            needs_review: row.try_get("needs_review")?,
            external_id: row.try_get("external_id")?,
        })
    }
}
