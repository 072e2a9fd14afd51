mod account;
mod category;
mod connection;
mod notification;
mod txn;

pub use account::{Account, AccountKind, LinkedAccount};
pub use category::{Category, FALLBACK_CATEGORY};
pub use connection::{BankConnection, ConnectionStatus};
pub use notification::Notification;
pub use txn::{to_minor_units, Transaction, TxnKind};
