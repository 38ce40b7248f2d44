//! Lease-based advisory locks on ledger rows.
//!
//! There is no lock table and no lock service. A row's own `updated_at` column is the lease: a writer that wants
//! exclusive use of the row reads it, and then performs a conditional update that only succeeds if nobody else has
//! touched `updated_at` since. Every subsequent write made under the same logical operation refreshes `updated_at`,
//! which implicitly renews the lease. If a holder disappears, its lease simply runs out and the row can be taken
//! again.
//!
//! Two locks are provided:
//! * [`LockCoordinator::try_acquire`] guards the settlement of an incoming payment.
//! * [`LockCoordinator::try_acquire_notification`] guards the one-off success notification for a settled request,
//!   with a much tighter window.
use chrono::{DateTime, Duration, Utc};
use log::*;
use thiserror::Error;

use crate::{
    db_types::RequestStatus,
    traits::{LedgerError, LedgerStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// How long a payment lease (with a provisional claim) keeps other workers away.
    pub payment_lease: Duration,
    /// A notification lock is refused if the request was touched more recently than this.
    pub notify_quiet_period: Duration,
    /// A notification lock is refused if the request was settled longer ago than this.
    pub notify_max_age: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            payment_lease: Duration::seconds(30),
            notify_quiet_period: Duration::milliseconds(500),
            notify_max_age: Duration::seconds(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("Payment #{0} does not exist")]
    NotFound(i64),
    #[error("Payment #{0} has already been processed")]
    AlreadyProcessed(i64),
    #[error("Payment #{0} is being settled by another worker")]
    HeldByOther(i64),
    #[error("Another worker locked payment #{0} first")]
    LockRaceLost(i64),
    #[error("Database error while locking: {0}")]
    DatabaseError(String),
}

impl LockError {
    /// Contention outcomes are expected when several triggers fire for the same payment. They are not failures.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::AlreadyProcessed(_) | LockError::HeldByOther(_) | LockError::LockRaceLost(_))
    }
}

impl From<LedgerError> for LockError {
    fn from(e: LedgerError) -> Self {
        LockError::DatabaseError(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyLockError {
    #[error("Request #{0} does not exist")]
    NotFound(i64),
    #[error("Request #{0} is no longer in the automatic success state")]
    StatusChanged(i64),
    #[error("Request #{0} was touched moments ago. Another notifier is probably running.")]
    ParallelCall(i64),
    #[error("Request #{0} was settled too long ago to notify about it now")]
    Stale(i64),
    #[error("Another notifier took the lock on request #{0} first")]
    AlreadySending(i64),
    #[error("Database error while locking: {0}")]
    DatabaseError(String),
}

impl From<LedgerError> for NotifyLockError {
    fn from(e: LedgerError) -> Self {
        NotifyLockError::DatabaseError(e.to_string())
    }
}

/// Proof that the caller holds the settlement lease on a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLease {
    pub payment_id: i64,
    /// The `updated_at` value written when the lease was taken
    pub acquired_at: DateTime<Utc>,
    /// After this instant, other workers may take the payment over
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LockCoordinator<B> {
    db: B,
    config: LockConfig,
}

impl<B> LockCoordinator<B> {
    pub fn new(db: B, config: LockConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Provisional claims refreshed at or after this instant are still live.
    pub fn lease_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.config.payment_lease
    }
}

impl<B: LedgerStore> LockCoordinator<B> {
    /// Try to take the settlement lease on a payment.
    ///
    /// Fails with
    /// * `NotFound` if the payment does not exist,
    /// * `AlreadyProcessed` if it has been settled (or linked) already,
    /// * `HeldByOther` if another worker holds a live lease and has provisionally claimed a request,
    /// * `LockRaceLost` if another worker wrote to the row between our read and our conditional update.
    pub async fn try_acquire(&self, payment_id: i64, now: DateTime<Utc>) -> Result<PaymentLease, LockError> {
        let payment = self.db.fetch_payment(payment_id).await?.ok_or(LockError::NotFound(payment_id))?;
        if payment.is_processed {
            debug!("🔒️ Payment #{payment_id} is already processed (request #{:?})", payment.linked_request_id);
            return Err(LockError::AlreadyProcessed(payment_id));
        }
        let cutoff = self.lease_cutoff(now);
        let lease_is_live = payment.updated_at >= cutoff;
        if lease_is_live && payment.linked_request_id.is_some() {
            debug!(
                "🔒️ Payment #{payment_id} is being settled by another worker (claiming request #{:?}, touched {}ms ago)",
                payment.linked_request_id,
                (now - payment.updated_at).num_milliseconds()
            );
            return Err(LockError::HeldByOther(payment_id));
        }
        if payment.linked_request_id.is_some() {
            info!("🔒️ Payment #{payment_id} has an expired claim on request #{:?}. Reclaiming it.", payment.linked_request_id);
        }
        if !self.db.renew_payment_lease(payment_id, payment.updated_at, cutoff, now).await? {
            debug!("🔒️ Lost the race to lock payment #{payment_id}");
            return Err(LockError::LockRaceLost(payment_id));
        }
        trace!("🔒️ Payment #{payment_id} locked");
        Ok(PaymentLease { payment_id, acquired_at: now, expires_at: now + self.config.payment_lease })
    }

    /// Take the notification lock on a request that has just been settled by the automatic path.
    ///
    /// The request must still be in the automatic success state, must have been settled no more than
    /// `notify_max_age` ago, and must not have been touched in the last `notify_quiet_period`. The lock is then taken
    /// with a conditional update of `updated_at`, so of several notifiers racing for the same request at most one
    /// wins.
    pub async fn try_acquire_notification(&self, request_id: i64, now: DateTime<Utc>) -> Result<(), NotifyLockError> {
        let request = self.db.fetch_request(request_id).await?.ok_or(NotifyLockError::NotFound(request_id))?;
        if request.status != RequestStatus::AutodepositSuccess {
            debug!("🔒️ Request #{request_id} is now {}. Not notifying.", request.status);
            return Err(NotifyLockError::StatusChanged(request_id));
        }
        let settled_at = request.processed_at.unwrap_or(request.updated_at);
        if now - settled_at > self.config.notify_max_age {
            debug!("🔒️ Request #{request_id} was settled at {settled_at}. Too long ago to notify.");
            return Err(NotifyLockError::Stale(request_id));
        }
        let quiet_since = now - self.config.notify_quiet_period;
        if request.updated_at >= quiet_since {
            debug!("🔒️ Request #{request_id} was touched at {}. Refusing a parallel notification.", request.updated_at);
            return Err(NotifyLockError::ParallelCall(request_id));
        }
        if !self.db.renew_request_lease(request_id, RequestStatus::AutodepositSuccess, quiet_since, now).await? {
            debug!("🔒️ Lost the race to notify about request #{request_id}");
            return Err(NotifyLockError::AlreadySending(request_id));
        }
        trace!("🔒️ Notification lock on request #{request_id} taken");
        Ok(())
    }
}
