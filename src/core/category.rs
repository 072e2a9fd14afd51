use serde::Serialize;

use super::TxnKind;

/// Name of the per-type category every user owns as the target for
/// transactions the keyword table could not place.
pub const FALLBACK_CATEGORY: &str = "Other";

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub emoji: String,
    pub color: String,
    pub kind: TxnKind,
}
