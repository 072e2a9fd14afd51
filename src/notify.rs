use chrono::Utc;
use tracing::info;
use ulid::Ulid;

use crate::core::Notification;
use crate::store::{self, SqliteStore};

pub const SYNC_NOTIFICATION_KIND: &str = "bank_sync";

/// Per-user totals collected over one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncTally {
    pub inserted: usize,
    pub auto_detected: usize,
}

fn summary_message(tally: &SyncTally) -> String {
    let noun = if tally.inserted == 1 {
        "transaction"
    } else {
        "transactions"
    };

    format!(
        "{} new {} imported, {} categorized automatically.",
        tally.inserted, noun, tally.auto_detected
    )
}

/// Writes the run summary for `user_id`. Nothing is written when the run
/// imported no transactions.
pub async fn notify_sync(
    store: &mut SqliteStore,
    user_id: &str,
    tally: &SyncTally,
) -> store::Result<Option<Notification>> {
    if tally.inserted == 0 {
        return Ok(None);
    }

    let notification = Notification {
        id: Ulid::new().to_string(),
        user_id: user_id.to_string(),
        title: "Bank sync complete".to_string(),
        message: summary_message(tally),
        kind: SYNC_NOTIFICATION_KIND.to_string(),
        read: false,
        created_at: Utc::now(),
    };
    store.notifications().create(&notification).await?;

    info!(user_id, inserted = tally.inserted, "sync notification written");

    Ok(Some(notification))
}
