use std::collections::HashSet;

use chrono::NaiveDate;

use crate::normalize::normalize;

/// Identity of an already-imported transaction within one account.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub description: String,
    pub date: NaiveDate,
    pub amount_cents: i64,
    pub external_id: Option<String>,
}

/// Composite key `description|date|amount` with the description normalized and
/// its whitespace runs collapsed, and the amount as a magnitude in minor units.
pub fn dedup_key(description: &str, date: NaiveDate, amount_cents: i64) -> String {
    let description = normalize(description)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "{}|{}|{}",
        description,
        date.format("%Y-%m-%d"),
        amount_cents.unsigned_abs()
    )
}

/// Membership index over one account's ledger, built fresh for every pass.
#[derive(Debug, Default)]
pub struct LedgerIndex {
    keys: HashSet<String>,
    external_ids: HashSet<String>,
}

impl LedgerIndex {
    pub fn build<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = LedgerEntry>,
    {
        let mut index = LedgerIndex::default();
        for entry in entries {
            index.insert(
                &dedup_key(&entry.description, entry.date, entry.amount_cents),
                entry.external_id.as_deref(),
            );
        }
        index
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str, external_id: Option<&str>) -> bool {
        self.keys.contains(key) || external_id.map_or(false, |id| self.external_ids.contains(id))
    }

    /// Records a key accepted in the current pass so later rows of the same
    /// batch collapse onto it.
    pub fn insert(&mut self, key: &str, external_id: Option<&str>) {
        self.keys.insert(key.to_string());
        if let Some(id) = external_id {
            self.external_ids.insert(id.to_string());
        }
    }
}
