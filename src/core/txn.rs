use chrono::naive::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnKind {
    Income,
    Expense,
}

impl TxnKind {
    /// Outflows are expenses; zero and positive amounts are income.
    pub fn from_signed(amount: Decimal) -> Self {
        if amount.is_sign_negative() && !amount.is_zero() {
            TxnKind::Expense
        } else {
            TxnKind::Income
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxnKind::Income => "income",
            TxnKind::Expense => "expense",
        }
    }
}

impl std::fmt::Display for TxnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TxnKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(TxnKind::Income),
            "expense" => Ok(TxnKind::Expense),
            other => Err(format!("unknown transaction type {}", other)),
        }
    }
}

/// Converts a decimal currency amount to integer minor units (cents),
/// rounding half away from zero. Returns `None` when the value does not fit.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    pub category_id: String,
    pub description: String,
    /// Magnitude in minor units; the direction lives in `kind`.
    pub amount_cents: i64,
    pub kind: TxnKind,
    pub date: NaiveDate,
    pub needs_review: bool,
    /// Upstream transaction id for rows created by synchronization.
    pub external_id: Option<String>,
}
