use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, info};
use ulid::Ulid;

use crate::core::{Category, TxnKind, FALLBACK_CATEGORY};
use crate::normalize::normalize;
use crate::store::{self, SqliteStore};

const FALLBACK_EMOJI: &str = "📦";
const FALLBACK_COLOR: &str = "#94a3b8";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("no {0} fallback category")]
    MissingFallback(TxnKind),
    #[error(transparent)]
    Store(#[from] store::Error),
}

/// A user's categories for one sync run, indexed by normalized name and type.
#[derive(Debug)]
pub struct UserCategories {
    categories: Vec<Category>,
    by_key: HashMap<(String, TxnKind), usize>,
    names: HashSet<String>,
    fallback_expense: usize,
    fallback_income: usize,
}

impl UserCategories {
    pub fn new(categories: Vec<Category>) -> Result<Self, BootstrapError> {
        let fallback_of = |kind: TxnKind| {
            categories
                .iter()
                .position(|c| c.kind == kind && c.name == FALLBACK_CATEGORY)
                .ok_or(BootstrapError::MissingFallback(kind))
        };
        let fallback_expense = fallback_of(TxnKind::Expense)?;
        let fallback_income = fallback_of(TxnKind::Income)?;

        let mut by_key = HashMap::new();
        let mut names = HashSet::new();
        for (i, category) in categories.iter().enumerate() {
            let name = normalize(category.name.trim());
            // First definition wins when a user has duplicate names.
            by_key.entry((name.clone(), category.kind)).or_insert(i);
            names.insert(name);
        }

        Ok(Self {
            categories,
            by_key,
            names,
            fallback_expense,
            fallback_income,
        })
    }

    pub fn find(&self, name: &str, kind: TxnKind) -> Option<&Category> {
        self.by_key
            .get(&(normalize(name.trim()), kind))
            .map(|&i| &self.categories[i])
    }

    /// Whether the user owns a category with this name under either type.
    pub fn has_name(&self, name: &str) -> bool {
        self.names.contains(&normalize(name.trim()))
    }

    pub fn fallback(&self, kind: TxnKind) -> &Category {
        match kind {
            TxnKind::Expense => &self.categories[self.fallback_expense],
            TxnKind::Income => &self.categories[self.fallback_income],
        }
    }
}

/// Guarantees `user_id` owns the expense and income fallback categories,
/// creating whichever is missing, and returns the user's categories.
pub async fn ensure_default_categories(
    store: &mut SqliteStore,
    user_id: &str,
) -> Result<UserCategories, BootstrapError> {
    let mut categories = store.categories().list_for_user(user_id).await?;
    let mut raced = false;

    for kind in [TxnKind::Expense, TxnKind::Income] {
        if categories
            .iter()
            .any(|c| c.kind == kind && c.name == FALLBACK_CATEGORY)
        {
            continue;
        }

        let category = Category {
            id: Ulid::new().to_string(),
            user_id: user_id.to_string(),
            name: FALLBACK_CATEGORY.to_string(),
            emoji: FALLBACK_EMOJI.to_string(),
            color: FALLBACK_COLOR.to_string(),
            kind,
        };

        match store.categories().create(&category).await {
            Ok(()) => {
                info!(user_id, %kind, "created fallback category");
                categories.push(category);
            }
            Err(store::Error::AlreadyExists) => {
                debug!(user_id, %kind, "fallback category created concurrently");
                raced = true;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if raced {
        categories = store.categories().list_for_user(user_id).await?;
    }

    UserCategories::new(categories)
}
