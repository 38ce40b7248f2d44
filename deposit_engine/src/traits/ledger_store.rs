use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{
        Amount,
        DepositRequest,
        IncomingPayment,
        MatchCandidate,
        NewDepositRequest,
        NewIncomingPayment,
        RequestStatus,
    },
    traits::data_objects::{CommitOutcome, FailureRecord, GatewayFailure, PreflightOutcome},
};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("Incoming payment #{0} does not exist")]
    PaymentNotFound(i64),
    #[error("Deposit request #{0} does not exist")]
    RequestNotFound(i64),
    #[error("Invalid data in the ledger: {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}

/// The persistent home of deposit requests and incoming payments.
///
/// Every method that checks something and then writes based on what it saw runs in a single serializable
/// transaction. Every single-statement write is a conditional update whose affected-row count tells the caller
/// whether it won. Nothing is held in memory between calls, so these guarantees hold across processes that share the
/// same store.
///
/// All timestamps are supplied by the caller. Implementations must not substitute their own notion of "now".
pub trait LedgerStore: Clone + Send + Sync + 'static {
    /// The URL of the database
    fn url(&self) -> &str;

    fn insert_deposit_request(
        &self,
        request: NewDepositRequest,
    ) -> impl Future<Output = Result<DepositRequest, LedgerError>> + Send;

    fn insert_incoming_payment(
        &self,
        payment: NewIncomingPayment,
    ) -> impl Future<Output = Result<IncomingPayment, LedgerError>> + Send;

    fn fetch_request(&self, request_id: i64) -> impl Future<Output = Result<Option<DepositRequest>, LedgerError>> + Send;

    fn fetch_payment(&self, payment_id: i64)
        -> impl Future<Output = Result<Option<IncomingPayment>, LedgerError>> + Send;

    /// Unprocessed payments ingested at or after `since`, oldest first.
    fn fetch_unprocessed_payments(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<IncomingPayment>, LedgerError>> + Send;

    /// Take or refresh the lease on an unprocessed payment.
    ///
    /// Sets `updated_at = now` and clears a stale provisional claim, but only if the row still carries the
    /// `updated_at` value the caller observed and any claim on it was last refreshed before `lease_cutoff`. Returns
    /// `false` if someone else wrote to the row in between.
    fn renew_payment_lease(
        &self,
        payment_id: i64,
        observed_updated_at: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Pending requests for exactly `amount`, created inside `[window_start, window_end]` (inclusive), oldest first.
    /// Each candidate is flagged with whether a processed payment already references it.
    fn fetch_match_candidates(
        &self,
        amount: Amount,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<MatchCandidate>, LedgerError>> + Send;

    /// Run every pre-flight check for settling `request_id` with `payment_id` and, if they all pass, record the
    /// payment's provisional claim on the request.
    ///
    /// * `lease_cutoff`: provisional claims by other payments refreshed at or after this time are still live.
    /// * `duplicate_since`: a success for the same account and amount processed at or after this time counts as a
    ///   duplicate.
    fn preflight_claim(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
        duplicate_since: DateTime<Utc>,
    ) -> impl Future<Output = Result<PreflightOutcome, LedgerError>> + Send;

    /// Mark the payment as processed and linked to `request_id` without touching the request. Returns `false` if the
    /// payment was already processed.
    fn link_payment(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Record a failed gateway call against the request, unless a racer has settled it in the meantime.
    fn record_gateway_failure(
        &self,
        payment_id: i64,
        request_id: i64,
        failure: GatewayFailure,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<FailureRecord, LedgerError>> + Send;

    /// After a successful credit, move the request to the automatic success state and mark the payment as processed,
    /// both in one transaction.
    fn commit_settlement(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<CommitOutcome, LedgerError>> + Send;

    /// Unconditionally write the settled state for both rows. Only used to repair a post-commit verification failure.
    fn force_settlement_state(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// The most recent successful request for the same platform, account and amount, processed at or after `since`,
    /// other than `exclude_request_id`.
    fn find_recent_settlement(
        &self,
        platform: &str,
        account_id: &str,
        amount: Amount,
        since: DateTime<Utc>,
        exclude_request_id: i64,
    ) -> impl Future<Output = Result<Option<DepositRequest>, LedgerError>> + Send;

    /// Clear a spurious `api_error` on the request, move it to the automatic success state and link the payment, in
    /// one transaction. Returns `false` (and writes nothing) if the request is no longer in `api_error` or the payment
    /// was already processed.
    fn reclassify_as_settled(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Set `updated_at = now` on the request, but only if it still has `status` and was last updated strictly before
    /// `older_than`.
    fn renew_request_lease(
        &self,
        request_id: i64,
        status: RequestStatus,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Closes the database connection.
    fn close(&mut self) -> impl Future<Output = Result<(), LedgerError>> + Send {
        async { Ok(()) }
    }
}
