//! Outbound collaborators that are told about a settlement after it has been committed.
//!
//! Both are best-effort. Their failures are logged by the event hooks and never undo a settlement.
use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::Amount;

#[derive(Debug, Clone, Error)]
pub enum CommissionError {
    #[error("Commission accounting is unavailable: {0}")]
    Unavailable(String),
    #[error("Commission could not be recorded: {0}")]
    Rejected(String),
}

/// Referral / commission bookkeeping for a settled deposit.
pub trait CommissionAccounting: Send + Sync {
    fn on_deposit_settled(
        &self,
        user_id: i64,
        amount: Amount,
        platform: &str,
        request_id: i64,
        request_created_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), CommissionError>> + Send;
}

#[derive(Debug, Clone, Error)]
pub enum NotificationError {
    #[error("Could not deliver the notification: {0}")]
    DeliveryFailed(String),
    #[error("Notifications are disabled")]
    Disabled,
}

/// Sends a message to a user (e.g. through a chat bot).
pub trait NotificationDispatcher: Send + Sync {
    fn notify_user(&self, user_id: i64, message: &str) -> impl Future<Output = Result<(), NotificationError>> + Send;
}
