use thiserror::Error;

use crate::traits::{GatewayErrorKind, LedgerError};

#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("The settlement gateway could not credit request #{request_id} ({kind}). {message}")]
    GatewayFailure { request_id: i64, kind: GatewayErrorKind, message: String },
    #[error(
        "Ledger does not reflect the settlement of request #{request_id} with payment #{payment_id}. Request status: \
         {request_status}. Payment linked to {linked_request_id:?}, processed: {payment_processed}"
    )]
    IntegrityMismatch {
        request_id: i64,
        payment_id: i64,
        request_status: String,
        linked_request_id: Option<i64>,
        payment_processed: bool,
    },
}

impl From<LedgerError> for SettlementError {
    fn from(e: LedgerError) -> Self {
        SettlementError::DatabaseError(e.to_string())
    }
}
