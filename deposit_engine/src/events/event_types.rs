use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::DepositRequest;

/// Emitted once a deposit request has been credited and both ledger rows reflect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSettledEvent {
    /// The request as it was read back after the settlement committed
    pub request: DepositRequest,
    pub payment_id: i64,
    pub settled_at: DateTime<Utc>,
}

impl DepositSettledEvent {
    pub fn new(request: DepositRequest, payment_id: i64, settled_at: DateTime<Utc>) -> Self {
        Self { request, payment_id, settled_at }
    }
}
