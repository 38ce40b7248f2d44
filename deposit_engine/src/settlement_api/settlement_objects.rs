use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Amount, RequestStatus},
    lock_coordinator::LockError,
};

/// What happened when the settlement flow ran for one payment. None of these is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The request was credited and both ledger rows were updated.
    Settled(SettlementReport),
    /// The request's earlier gateway failure turned out to be spurious. It was moved to the success state without a
    /// new credit.
    Reconciled { request_id: i64 },
    /// A concurrent attempt settled the request while this one was talking to the gateway. The payment was linked to
    /// it.
    SettledByOther { request_id: i64 },
    /// No pending request matches the payment yet.
    NoMatch,
    /// Somebody else is handling, or has already handled, this payment or its request.
    Skipped(SkipReason),
}

impl SettlementOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementOutcome::Settled(_))
    }

    /// The label used in logs and API responses.
    pub fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Settled(_) => "settled",
            SettlementOutcome::Reconciled { .. } => "reconciled",
            SettlementOutcome::SettledByOther { .. } => "settled_by_other",
            SettlementOutcome::NoMatch => "no_match",
            SettlementOutcome::Skipped(_) => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The payment lease could not be taken.
    Lock(LockError),
    /// The payment was processed after the lease was taken, or its request was already in a success state.
    AlreadyProcessed,
    /// A different payment already settled the request. This payment was linked to it without a credit.
    RequestAlreadySettled,
    /// The request was dispositioned as a failure. Only an operator can take it further.
    ManualProcessingRequired(RequestStatus),
    /// The same account was credited the same amount moments ago.
    DuplicateDetected { other_request_id: i64 },
    /// Another payment is still in the middle of settling the request.
    RequestHeldByOther,
    /// Another worker took this payment over.
    PaymentTakenByOther,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Lock(_) => "locked",
            SkipReason::AlreadyProcessed => "already_processed",
            SkipReason::RequestAlreadySettled => "request_already_settled",
            SkipReason::ManualProcessingRequired(_) => "manual_processing_required",
            SkipReason::DuplicateDetected { .. } => "duplicate_detected",
            SkipReason::RequestHeldByOther => "request_held_by_other",
            SkipReason::PaymentTakenByOther => "payment_taken_by_other",
        }
    }
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Lock(e) => write!(f, "{}: {e}", self.as_str()),
            SkipReason::ManualProcessingRequired(status) => write!(f, "{}_{status}", self.as_str()),
            SkipReason::DuplicateDetected { other_request_id } => {
                write!(f, "{} (request #{other_request_id})", self.as_str())
            },
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub request_id: i64,
    pub payment_id: i64,
    pub amount: Amount,
    /// Both rows were read back in the expected state after the commit
    pub verified: bool,
    /// The read-back disagreed at first and a corrective write was needed
    pub corrected: bool,
}

/// Tally of a batch run over unprocessed payments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub settled: usize,
    pub reconciled: usize,
    pub settled_by_other: usize,
    pub no_match: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.settled + self.reconciled + self.settled_by_other + self.no_match + self.skipped + self.failed
    }

    pub fn record(&mut self, outcome: &SettlementOutcome) {
        match outcome {
            SettlementOutcome::Settled(_) => self.settled += 1,
            SettlementOutcome::Reconciled { .. } => self.reconciled += 1,
            SettlementOutcome::SettledByOther { .. } => self.settled_by_other += 1,
            SettlementOutcome::NoMatch => self.no_match += 1,
            SettlementOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

impl Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} settled, {} reconciled, {} settled elsewhere, {} unmatched, {} skipped, {} failed",
            self.settled, self.reconciled, self.settled_by_other, self.no_match, self.skipped, self.failed
        )
    }
}
