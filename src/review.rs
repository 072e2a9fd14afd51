use thiserror::Error;
use tracing::info;

use crate::core::{Transaction, TxnKind};
use crate::store::{self, SqliteStore};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("transaction or category not found")]
    NotFound,
    #[error("category {category} is not an {kind} category")]
    TypeMismatch { category: String, kind: TxnKind },
    #[error(transparent)]
    Store(store::Error),
}

impl From<store::Error> for ReviewError {
    fn from(e: store::Error) -> Self {
        match e {
            store::Error::NotFound => ReviewError::NotFound,
            e => ReviewError::Store(e),
        }
    }
}

/// Takes a transaction out of the review queue, optionally moving it to
/// `category_id`. The category must belong to the user and share the
/// transaction's type.
pub async fn confirm(
    store: &mut SqliteStore,
    user_id: &str,
    txn_id: &str,
    category_id: Option<&str>,
) -> Result<Transaction, ReviewError> {
    let txn = store.txns().get(user_id, txn_id).await?;
    let category = store
        .categories()
        .get(user_id, category_id.unwrap_or(&txn.category_id))
        .await?;

    if category.kind != txn.kind {
        return Err(ReviewError::TypeMismatch {
            category: category.name,
            kind: txn.kind,
        });
    }

    store.txns().confirm(user_id, txn_id, &category.id).await?;
    info!(user_id, txn_id, category_id = category.id.as_str(), "transaction reviewed");

    Ok(Transaction {
        category_id: category.id,
        needs_review: false,
        ..txn
    })
}
