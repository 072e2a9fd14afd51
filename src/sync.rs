//! Pulls transactions for linked bank connections into the ledger.
//!
//! A run authenticates once, then walks connections one at a time. Each
//! connection refreshes its status, links any account the aggregator reports
//! for the first time, and syncs its linked accounts in creation order:
//! bootstrap fallback categories, fetch the window, drop rows already in the
//! ledger, classify the rest, insert them as one batch and reconcile the
//! balance. Failures are contained to the account and connection they
//! happen in; only a rejected credential exchange ends the run early.
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use crate::bootstrap::{ensure_default_categories, UserCategories};
use crate::categorize::{CategoryEngine, KeywordTable, Outcome};
use crate::core::{
    to_minor_units, Account, AccountKind, BankConnection, ConnectionStatus, LinkedAccount,
    Transaction, TxnKind,
};
use crate::dedup::{dedup_key, LedgerIndex};
use crate::notify::{notify_sync, SyncTally};
use crate::store::{self, SqliteStore};
use crate::upstream::{self, Login, Upstream};

pub const DEFAULT_WINDOW_DAYS: i64 = 7;
const DEFAULT_CURRENCY: &str = "BRL";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("aggregator authentication failed: {0}")]
    Auth(#[source] upstream::Error),
    #[error("aggregator request failed: {0}")]
    Aggregator(#[source] upstream::Error),
    #[error("could not bootstrap categories for user {user_id}: {reason}")]
    Bootstrap { user_id: String, reason: String },
    #[error("store write failed: {0}")]
    StoreWrite(#[source] store::Error),
    #[error(transparent)]
    Store(store::Error),
    #[error("notification failed: {0}")]
    Notify(#[source] store::Error),
    #[error("malformed upstream data: {0}")]
    Malformed(String),
    #[error("connection sync failed: {0}")]
    Connection(String),
    #[error("connection not found")]
    NotFound,
}

impl From<store::Error> for SyncError {
    fn from(e: store::Error) -> Self {
        match e {
            store::Error::NotFound => SyncError::NotFound,
            e => SyncError::Store(e),
        }
    }
}

/// Counters for one linked account in one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AccountStats {
    pub seen: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub auto_detected: usize,
    pub type_mismatch: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub connection_id: String,
    pub accounts_synced: usize,
    pub accounts_linked: usize,
    pub transactions_inserted: usize,
    pub transactions_total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConnectionOutcome {
    Synced(ConnectionSummary),
    Failed { connection_id: String, reason: String },
}

impl ConnectionOutcome {
    fn failed(connection_id: &str, reason: impl ToString) -> Self {
        ConnectionOutcome::Failed {
            connection_id: connection_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    pub duration_ms: u64,
    pub connections_processed: usize,
    pub connections_failed: usize,
    pub transactions_inserted: usize,
    pub transactions_total: usize,
    pub transactions_auto_detected: usize,
    pub transactions_type_mismatch: usize,
    pub accounts_linked: usize,
    #[serde(skip)]
    pub outcomes: Vec<ConnectionOutcome>,
}

impl RunReport {
    fn record(&mut self, outcome: ConnectionOutcome) {
        match &outcome {
            ConnectionOutcome::Synced(_) => self.connections_processed += 1,
            ConnectionOutcome::Failed { .. } => self.connections_failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Result of a user-initiated sync of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualSync {
    pub inserted: usize,
    pub total: usize,
    pub message: String,
}

/// State that lives for a single run: each user's categories, loaded once,
/// and what the run imported for them.
#[derive(Default)]
struct RunContext {
    categories: HashMap<String, Result<UserCategories, String>>,
    tallies: BTreeMap<String, SyncTally>,
    report: RunReport,
}

impl RunContext {
    async fn categories(
        &mut self,
        store: &mut SqliteStore,
        user_id: &str,
    ) -> Result<&UserCategories, SyncError> {
        let loaded = match self.categories.entry(user_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let loaded = ensure_default_categories(store, user_id)
                    .await
                    .map_err(|e| e.to_string());
                if let Err(reason) = &loaded {
                    warn!(user_id, reason = reason.as_str(), "category bootstrap failed");
                }
                entry.insert(loaded)
            }
        };

        match loaded {
            Ok(categories) => Ok(&*categories),
            Err(reason) => Err(SyncError::Bootstrap {
                user_id: user_id.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    fn tally(&mut self, user_id: &str, stats: &AccountStats) {
        let tally = self.tallies.entry(user_id.to_string()).or_default();
        tally.inserted += stats.inserted;
        tally.auto_detected += stats.auto_detected;

        self.report.transactions_inserted += stats.inserted;
        self.report.transactions_total += stats.seen;
        self.report.transactions_auto_detected += stats.auto_detected;
        self.report.transactions_type_mismatch += stats.type_mismatch;
    }
}

pub struct SyncEngine<L> {
    login: L,
    categorizer: CategoryEngine,
    window_days: i64,
}

impl<L: Login> SyncEngine<L> {
    pub fn new(login: L, keywords: &KeywordTable, window_days: i64) -> Self {
        Self {
            login,
            categorizer: CategoryEngine::new(keywords),
            window_days,
        }
    }

    /// Scheduled run over every connected or refreshing connection for the
    /// trailing window ending on `today`, oldest connection first.
    #[instrument(skip(self, store))]
    pub async fn sweep(
        &self,
        store: &mut SqliteStore,
        today: NaiveDate,
    ) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        let session = self.login.login().await.map_err(SyncError::Auth)?;

        let from = today - Duration::days(self.window_days);
        let connections = store
            .connections()
            .list_by_status(&ConnectionStatus::syncable())
            .await?;
        info!(connections = connections.len(), %from, "starting sweep");

        let mut ctx = RunContext::default();
        for connection in &connections {
            let outcome = self
                .process_connection(store, &session, &mut ctx, connection, from, today)
                .await;
            ctx.report.record(outcome);
        }
        self.notify_users(store, &ctx).await;

        let mut report = ctx.report;
        report.duration_ms = started.elapsed().as_millis() as u64;
        if report.transactions_type_mismatch > 0 {
            warn!(
                count = report.transactions_type_mismatch,
                "keyword matches routed to fallback categories because of a type mismatch"
            );
        }
        info!(
            processed = report.connections_processed,
            failed = report.connections_failed,
            inserted = report.transactions_inserted,
            total = report.transactions_total,
            "sweep finished"
        );

        Ok(report)
    }

    /// Syncs one connection owned by `user_id` over `[from, to]`.
    #[instrument(skip(self, store))]
    pub async fn sync_connection(
        &self,
        store: &mut SqliteStore,
        user_id: &str,
        connection_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ManualSync, SyncError> {
        if from > to {
            return Err(SyncError::Malformed(format!(
                "window starts on {} after it ends on {}",
                from, to
            )));
        }

        let connection = store
            .connections()
            .get(Some(user_id), connection_id)
            .await?;
        let session = self.login.login().await.map_err(SyncError::Auth)?;

        let mut ctx = RunContext::default();
        let outcome = self
            .process_connection(store, &session, &mut ctx, &connection, from, to)
            .await;
        self.notify_users(store, &ctx).await;

        match outcome {
            ConnectionOutcome::Synced(summary) => Ok(ManualSync {
                inserted: summary.transactions_inserted,
                total: summary.transactions_total,
                message: format!(
                    "{} of {} transactions imported",
                    summary.transactions_inserted, summary.transactions_total
                ),
            }),
            ConnectionOutcome::Failed { reason, .. } => Err(SyncError::Connection(reason)),
        }
    }

    /// Registers the item a user just authorized, or refreshes it when the
    /// user already has it, and links every account reported for it.
    #[instrument(skip(self, store))]
    pub async fn link_connection(
        &self,
        store: &mut SqliteStore,
        user_id: &str,
        item_id: &str,
    ) -> Result<BankConnection, SyncError> {
        let session = self.login.login().await.map_err(SyncError::Auth)?;
        let item = session.item(item_id).await.map_err(SyncError::Aggregator)?;
        let status = ConnectionStatus::from_upstream(&item.status);
        let (name, logo) = institution(&item, None);

        let connection = match store.connections().by_item(user_id, item_id).await? {
            Some(existing) => {
                store
                    .connections()
                    .update_details(&existing.id, &name, logo.as_deref(), &status)
                    .await
                    .map_err(SyncError::StoreWrite)?;
                BankConnection {
                    institution_name: name,
                    institution_logo: logo,
                    status,
                    ..existing
                }
            }
            None => {
                let connection = BankConnection {
                    id: Ulid::new().to_string(),
                    user_id: user_id.to_string(),
                    item_id: item_id.to_string(),
                    institution_name: name,
                    institution_logo: logo,
                    status,
                    last_sync_at: None,
                    created_at: Utc::now(),
                };
                store
                    .connections()
                    .create(&connection)
                    .await
                    .map_err(SyncError::StoreWrite)?;
                connection
            }
        };

        let accounts = session.accounts(item_id).await.map_err(SyncError::Aggregator)?;
        let (linked, newly_linked) = link_new_accounts(store, &connection, &accounts).await?;
        info!(
            connection_id = connection.id.as_str(),
            accounts = linked.len(),
            newly_linked,
            "connection registered"
        );

        Ok(connection)
    }

    /// Revokes the item upstream and removes the connection and its linked
    /// accounts. Upstream failures are logged and do not prevent the local
    /// cleanup. Local accounts and their transactions are kept.
    #[instrument(skip(self, store))]
    pub async fn delete_connection(
        &self,
        store: &mut SqliteStore,
        user_id: Option<&str>,
        connection_id: &str,
    ) -> Result<(), SyncError> {
        let connection = store.connections().get(user_id, connection_id).await?;

        match self.login.login().await {
            Ok(session) => {
                if let Err(e) = session.delete_item(&connection.item_id).await {
                    warn!(
                        connection_id,
                        error = %e,
                        body = e.body().unwrap_or_default(),
                        "upstream unlink failed, removing locally"
                    );
                }
            }
            Err(e) => warn!(connection_id, error = %e, "upstream unlink skipped"),
        }

        let removed = store
            .linked()
            .delete_by_connection(&connection.id)
            .await
            .map_err(SyncError::StoreWrite)?;
        store
            .connections()
            .delete(&connection.id)
            .await
            .map_err(SyncError::StoreWrite)?;
        info!(connection_id, linked_accounts = removed, "connection deleted");

        Ok(())
    }

    async fn process_connection<S: Upstream>(
        &self,
        store: &mut SqliteStore,
        session: &S,
        ctx: &mut RunContext,
        connection: &BankConnection,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ConnectionOutcome {
        let connection_id = connection.id.as_str();
        let (linked, newly_linked) = match refresh_connection(store, session, connection).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(
                    connection_id,
                    error = %e,
                    body = upstream_body(&e).unwrap_or_default(),
                    "connection sync failed"
                );
                return ConnectionOutcome::failed(connection_id, e);
            }
        };
        ctx.report.accounts_linked += newly_linked;

        let mut summary = ConnectionSummary {
            connection_id: connection.id.clone(),
            accounts_linked: newly_linked,
            ..Default::default()
        };
        let mut failures = vec![];
        for account in &linked {
            match self
                .sync_account(store, session, ctx, connection, account, from, to)
                .await
            {
                Ok(stats) => {
                    info!(
                        connection_id,
                        linked_account_id = account.id.as_str(),
                        seen = stats.seen,
                        inserted = stats.inserted,
                        duplicates = stats.duplicates,
                        auto_detected = stats.auto_detected,
                        "account synced"
                    );
                    summary.accounts_synced += 1;
                    summary.transactions_inserted += stats.inserted;
                    summary.transactions_total += stats.seen;
                }
                Err(e) => {
                    warn!(
                        connection_id,
                        linked_account_id = account.id.as_str(),
                        error = %e,
                        body = upstream_body(&e).unwrap_or_default(),
                        "account sync failed"
                    );
                    failures.push(format!("account {}: {}", account.id, e));
                }
            }
        }

        if !failures.is_empty() {
            return ConnectionOutcome::failed(connection_id, failures.join("; "));
        }

        if let Err(e) = store
            .connections()
            .touch_synced(&connection.id, Utc::now())
            .await
        {
            let e = SyncError::StoreWrite(e);
            warn!(connection_id, error = %e, "connection sync failed");
            return ConnectionOutcome::failed(connection_id, e);
        }

        ConnectionOutcome::Synced(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_account<S: Upstream>(
        &self,
        store: &mut SqliteStore,
        session: &S,
        ctx: &mut RunContext,
        connection: &BankConnection,
        linked: &LinkedAccount,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AccountStats, SyncError> {
        let user_id = connection.user_id.as_str();
        let account_id = linked.account_id.as_deref().ok_or_else(|| {
            SyncError::Malformed(format!("linked account {} has no local account", linked.id))
        })?;

        let categories = ctx.categories(store, user_id).await?;

        let raw = session
            .transactions(&linked.external_id, from, to)
            .await
            .map_err(SyncError::Aggregator)?;

        let mut index = LedgerIndex::build(store.txns().ledger(user_id, account_id).await?);

        let mut stats = AccountStats {
            seen: raw.len(),
            ..Default::default()
        };
        let mut rows = Vec::with_capacity(raw.len());
        for txn in &raw {
            let amount_cents = to_minor_units(txn.amount.abs()).ok_or_else(|| {
                SyncError::Malformed(format!(
                    "amount {} of transaction {} is out of range",
                    txn.amount, txn.id
                ))
            })?;
            let kind = TxnKind::from_signed(txn.amount);

            let key = dedup_key(&txn.description, txn.date, amount_cents);
            if index.contains(&key, Some(&txn.id)) {
                debug!(external_id = txn.id.as_str(), key = key.as_str(), "skipping duplicate");
                stats.duplicates += 1;
                continue;
            }
            index.insert(&key, Some(&txn.id));

            let assignment = self
                .categorizer
                .classify(&txn.description, kind, categories);
            match assignment.outcome {
                Outcome::Matched => stats.auto_detected += 1,
                Outcome::TypeMismatch => stats.type_mismatch += 1,
                Outcome::NoMatch | Outcome::UnknownCategory => {}
            }

            rows.push(Transaction {
                id: Ulid::new().to_string(),
                user_id: user_id.to_string(),
                account_id: account_id.to_string(),
                category_id: assignment.category.id.clone(),
                description: txn.description.clone(),
                amount_cents,
                kind,
                date: txn.date,
                needs_review: assignment.needs_review,
                external_id: Some(txn.id.clone()),
            });
        }

        let inserted = store
            .txns()
            .insert_batch(&rows)
            .await
            .map_err(SyncError::StoreWrite)?;
        stats.inserted = inserted as usize;
        ctx.tally(user_id, &stats);

        let balance_cents = match latest_balance(&raw) {
            Some(balance) => to_minor_units(balance).ok_or_else(|| {
                SyncError::Malformed(format!("balance {} is out of range", balance))
            })?,
            None => linked.balance_cents,
        };
        store
            .accounts()
            .update_balance(account_id, balance_cents)
            .await
            .map_err(SyncError::StoreWrite)?;
        store
            .linked()
            .update_balance(&linked.id, balance_cents, Utc::now())
            .await
            .map_err(SyncError::StoreWrite)?;

        Ok(stats)
    }

    async fn notify_users(&self, store: &mut SqliteStore, ctx: &RunContext) {
        for (user_id, tally) in &ctx.tallies {
            if let Err(e) = notify_sync(store, user_id, tally).await {
                let e = SyncError::Notify(e);
                warn!(user_id = user_id.as_str(), error = %e, "notification not written");
            }
        }
    }
}

/// Refreshes status and institution metadata from the item and links any
/// newly reported account. Returns the connection's linked accounts in
/// creation order and how many were linked now.
async fn refresh_connection<S: Upstream>(
    store: &mut SqliteStore,
    session: &S,
    connection: &BankConnection,
) -> Result<(Vec<LinkedAccount>, usize), SyncError> {
    let item = session
        .item(&connection.item_id)
        .await
        .map_err(SyncError::Aggregator)?;
    let status = ConnectionStatus::from_upstream(&item.status);
    let (name, logo) = institution(&item, Some(connection));
    store
        .connections()
        .update_details(&connection.id, &name, logo.as_deref(), &status)
        .await
        .map_err(SyncError::StoreWrite)?;

    let accounts = session
        .accounts(&connection.item_id)
        .await
        .map_err(SyncError::Aggregator)?;

    link_new_accounts(store, connection, &accounts).await
}

/// Creates a linked account and its local account for every upstream account
/// the connection does not know yet.
async fn link_new_accounts(
    store: &mut SqliteStore,
    connection: &BankConnection,
    accounts: &[upstream::Account],
) -> Result<(Vec<LinkedAccount>, usize), SyncError> {
    let mut linked = store.linked().by_connection(&connection.id).await?;
    let mut newly_linked = 0;

    for account in accounts {
        if linked.iter().any(|l| l.external_id == account.id) {
            continue;
        }

        let balance_cents = to_minor_units(account.balance).ok_or_else(|| {
            SyncError::Malformed(format!(
                "balance {} of account {} is out of range",
                account.balance, account.id
            ))
        })?;
        let currency = account
            .currency_code
            .clone()
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let local = Account {
            id: Ulid::new().to_string(),
            user_id: connection.user_id.clone(),
            name: account.name.clone(),
            kind: AccountKind::from_upstream(&account.kind),
            balance_cents,
            currency: currency.clone(),
        };
        store
            .accounts()
            .create(&local)
            .await
            .map_err(SyncError::StoreWrite)?;

        let new = LinkedAccount {
            id: Ulid::new().to_string(),
            connection_id: connection.id.clone(),
            external_id: account.id.clone(),
            account_id: Some(local.id),
            name: account.name.clone(),
            kind: account.kind.clone(),
            balance_cents,
            currency,
            last_sync_at: None,
        };
        store
            .linked()
            .create(&new)
            .await
            .map_err(SyncError::StoreWrite)?;
        info!(
            connection_id = connection.id.as_str(),
            external_id = account.id.as_str(),
            "linked new account"
        );

        linked.push(new);
        newly_linked += 1;
    }

    Ok((linked, newly_linked))
}

/// Institution name and logo from the item's connector, keeping the stored
/// values when the item carries none.
fn institution(
    item: &upstream::Item,
    current: Option<&BankConnection>,
) -> (String, Option<String>) {
    match &item.connector {
        Some(connector) => (connector.name.clone(), connector.image_url.clone()),
        None => match current {
            Some(c) => (c.institution_name.clone(), c.institution_logo.clone()),
            None => (String::new(), None),
        },
    }
}

/// Balance reported on the latest-dated transaction that carries one. On the
/// same day the transaction listed last wins.
fn latest_balance(raw: &[upstream::Transaction]) -> Option<Decimal> {
    raw.iter()
        .filter_map(|t| t.balance.map(|b| (t.date, b)))
        .fold(None, |latest, (date, balance)| match latest {
            Some((latest_date, _)) if latest_date > date => latest,
            _ => Some((date, balance)),
        })
        .map(|(_, balance)| balance)
}

fn upstream_body(e: &SyncError) -> Option<&str> {
    match e {
        SyncError::Auth(e) | SyncError::Aggregator(e) => e.body(),
        _ => None,
    }
}
