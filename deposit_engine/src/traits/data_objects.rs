use serde::{Deserialize, Serialize};

use crate::{
    db_types::{DepositRequest, RequestStatus},
    traits::GatewayErrorKind,
};

/// The result of the pre-flight checks that run, in a single transaction, between matching a payment and calling the
/// settlement gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightOutcome {
    /// The payment was processed by someone else after we took the lock.
    PaymentAlreadyProcessed,
    /// Another worker reclaimed this payment and has provisionally claimed a request with it.
    PaymentHeldByOther,
    /// A different, processed payment already settled the request. The current payment has been linked to it.
    RequestAlreadySettled { other_payment_id: i64 },
    /// The request is already in a success state, or was processed by the automatic path. The payment has been
    /// linked to it.
    RequestAlreadyProcessed,
    /// The request was dispositioned as a failure (`api_error`, `deposit_failed` or `rejected`). Nothing was written.
    RequestDispositioned(DepositRequest),
    /// Another payment has an unexpired provisional claim on the request.
    RequestHeldByOther { payment_id: i64 },
    /// The same platform account was credited the same amount very recently. The payment has been linked to the
    /// request, which stays untouched.
    DuplicateCredit { other_request_id: i64 },
    /// The payment now provisionally claims the request and the caller may go ahead with the credit.
    Claimed(DepositRequest),
}

/// A gateway failure, reduced to what gets persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFailure {
    pub kind: GatewayErrorKind,
    /// Already truncated for storage
    pub detail: String,
}

impl GatewayFailure {
    pub fn new(kind: GatewayErrorKind, detail: String) -> Self {
        Self { kind, detail }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureRecord {
    /// A concurrent attempt settled the request while our gateway call was failing. The payment has been linked.
    AlreadySettled,
    /// The request moved to `api_error` and the payment's claim was released.
    Recorded,
    /// The request was no longer pending, so its status was left alone. The payment's claim was released.
    Released { status: RequestStatus },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The payment was marked as processed for a different request in the meantime. Nothing was written.
    PaymentTakenByOther { request_id: Option<i64> },
    /// The request was settled by a racer. The payment has been linked to it.
    AlreadySettled,
    /// Request and payment were both updated in one transaction.
    Committed,
}
