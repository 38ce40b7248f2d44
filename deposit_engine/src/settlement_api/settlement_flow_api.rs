use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};
use log::*;
use tokio::task::JoinHandle;

use super::{
    config::SettlementConfig,
    errors::SettlementError,
    settlement_objects::{BatchSummary, SettlementOutcome, SettlementReport, SkipReason},
    verifier::{ReconciliationVerifier, Verification},
};
use crate::{
    clock::Clock,
    db_types::{DepositRequest, RequestStatus},
    events::{DepositSettledEvent, EventProducers},
    lock_coordinator::{LockCoordinator, LockError, PaymentLease},
    matcher::{find_match, search_window},
    traits::{
        CommitOutcome,
        CreditInstruction,
        FailureRecord,
        GatewayError,
        GatewayFailure,
        LedgerError,
        LedgerStore,
        PreflightOutcome,
        SettlementGateway,
    },
};

/// `SettlementFlowApi` settles incoming payments against pending deposit requests.
///
/// One call to [`Self::process_payment`] takes the payment lease, finds the matching request, runs the pre-flight
/// checks, credits the platform account through the [`SettlementGateway`], commits both ledger rows, reads them back,
/// and finally publishes a [`DepositSettledEvent`] for the side effects.
///
/// The flow is safe to run any number of times, concurrently, for the same payment (from webhooks, the polling
/// worker, or an operator). All mutual exclusion happens in the ledger, so this also holds across processes.
pub struct SettlementFlowApi<B, G> {
    db: B,
    gateway: G,
    clock: Arc<dyn Clock>,
    config: SettlementConfig,
    producers: EventProducers,
    locks: LockCoordinator<B>,
    verifier: ReconciliationVerifier<B>,
}

impl<B, G> Debug for SettlementFlowApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementFlowApi")
    }
}

/// Where the pre-flight stage left us.
enum Preflight {
    Proceed(DepositRequest),
    Done(SettlementOutcome),
}

/// The result of reading both rows back after a commit.
enum ReadBack {
    Consistent(DepositRequest),
    Mismatch(SettlementError),
}

impl<B, G> SettlementFlowApi<B, G>
where
    B: LedgerStore,
    G: SettlementGateway,
{
    pub fn new(db: B, gateway: G, clock: Arc<dyn Clock>, config: SettlementConfig, producers: EventProducers) -> Self {
        if !config.gateway_timeout_fits_lease() {
            warn!(
                "💸️ The gateway timeout ({}s) is not shorter than the payment lease ({}s). A slow credit call could \
                 outlive its lease.",
                config.gateway_timeout.as_secs(),
                config.lock_config.payment_lease.num_seconds()
            );
        }
        let locks = LockCoordinator::new(db.clone(), config.lock_config);
        let verifier = ReconciliationVerifier::new(db.clone(), config.verifier_window);
        Self { db, gateway, clock, config, producers, locks, verifier }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    /// Run the settlement flow for a single incoming payment.
    ///
    /// Contention, "no match yet" and "already handled" are all regular outcomes and come back as `Ok`. Errors are
    /// returned for store faults, and when the gateway failed to credit the request (the failure has been recorded
    /// on the request by then).
    ///
    /// The returned future must be driven to completion. If it is dropped after the credit went out, the request
    /// keeps a provisional claim until the payment lease runs out, and the next run after that credits it again.
    /// Callers that may give up waiting (e.g. an HTTP handler whose client hangs up) use [`Self::spawn_settlement`].
    pub async fn process_payment(&self, payment_id: i64) -> Result<SettlementOutcome, SettlementError> {
        let now = self.clock.now();
        let lease = match self.locks.try_acquire(payment_id, now).await {
            Ok(lease) => lease,
            Err(LockError::DatabaseError(e)) => return Err(SettlementError::DatabaseError(e)),
            Err(e) => {
                if e.is_contention() {
                    debug!("💸️ Skipping payment #{payment_id}. {e}");
                } else {
                    info!("💸️ Skipping payment #{payment_id}. {e}");
                }
                return Ok(SettlementOutcome::Skipped(SkipReason::Lock(e)));
            },
        };

        let payment = self.db.fetch_payment(payment_id).await?.ok_or(LedgerError::PaymentNotFound(payment_id))?;
        let rules = &self.config.match_rules;
        let (window_start, window_end) = search_window(&payment, rules);
        let candidates = self.db.fetch_match_candidates(payment.amount, window_start, window_end).await?;
        let Some(matched) = find_match(&payment, &candidates, now, rules) else {
            debug!(
                "💸️ No pending request for {} between {window_start} and {window_end} matches payment #{payment_id}",
                payment.amount
            );
            return Ok(SettlementOutcome::NoMatch);
        };
        debug!("💸️ Payment #{payment_id} ({}) matches request #{}", payment.amount, matched.id);

        let request = match self.preflight(payment_id, matched.id, now).await? {
            Preflight::Proceed(request) => request,
            Preflight::Done(outcome) => return Ok(outcome),
        };

        let credited = self.credit(&request, &lease).await;
        // The gateway call is the only slow step. Everything after it is stamped with a fresh reading.
        let now = self.clock.now();
        if now > lease.expires_at {
            warn!(
                "💸️ The lease on payment #{payment_id} expired while the gateway was working. Another worker may have \
                 taken it over."
            );
        }
        if let Err(e) = credited {
            return self.handle_gateway_failure(payment_id, &request, e, now).await;
        }

        match self.db.commit_settlement(payment_id, request.id, now).await? {
            CommitOutcome::Committed => {},
            CommitOutcome::AlreadySettled => {
                info!(
                    "💸️ Request #{} was settled by a concurrent attempt while payment #{payment_id} was being credited. \
                     Payment linked.",
                    request.id
                );
                return Ok(SettlementOutcome::SettledByOther { request_id: request.id });
            },
            CommitOutcome::PaymentTakenByOther { request_id } => {
                error!(
                    "🚨️ Request #{} was credited {} but payment #{payment_id} has meanwhile been processed for \
                     request {request_id:?}. Request #{} needs operator attention.",
                    request.id, request.amount, request.id
                );
                return Ok(SettlementOutcome::Skipped(SkipReason::PaymentTakenByOther));
            },
        }

        let (settled, verified, corrected) = self.verify_settlement(payment_id, &request, now).await?;
        let report =
            SettlementReport { request_id: request.id, payment_id, amount: request.amount, verified, corrected };
        if !verified {
            return Ok(SettlementOutcome::Settled(report));
        }
        info!(
            "💸️ Request #{} settled. {} credited to {} on {} for payment #{payment_id}",
            request.id, request.amount, request.account_id, request.platform
        );
        self.call_deposit_settled_hook(settled, payment_id, now).await;
        Ok(SettlementOutcome::Settled(report))
    }

    /// Runs [`Self::process_payment`] on its own task. The flow finishes even when the returned handle is dropped.
    pub fn spawn_settlement(self: &Arc<Self>, payment_id: i64) -> JoinHandle<Result<SettlementOutcome, SettlementError>>
    where G: 'static {
        let api = Arc::clone(self);
        tokio::spawn(async move { api.process_payment(payment_id).await })
    }

    /// Run the settlement flow for every unprocessed payment ingested since `since`, oldest first.
    ///
    /// Failures of individual payments are logged and counted, but do not stop the batch.
    pub async fn process_pending_payments(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<BatchSummary, SettlementError> {
        let payments = self.db.fetch_unprocessed_payments(since, limit).await?;
        trace!("💸️ {} unprocessed payments since {since}", payments.len());
        let mut summary = BatchSummary::default();
        for payment in payments {
            match self.process_payment(payment.id).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    warn!("💸️ Settlement of payment #{} failed. {e}", payment.id);
                    summary.failed += 1;
                },
            }
        }
        Ok(summary)
    }

    /// Runs the pre-flight checks and takes the provisional claim on the request.
    ///
    /// If another payment is in the middle of settling the same request, the checks are repeated for a short while,
    /// so that the outcome of that attempt decides what happens to this payment.
    async fn preflight(&self, payment_id: i64, request_id: i64, now: DateTime<Utc>) -> Result<Preflight, SettlementError> {
        let lease_cutoff = self.locks.lease_cutoff(now);
        let duplicate_since = now - self.config.duplicate_window;
        let give_up_at = tokio::time::Instant::now() + self.config.claim_wait;
        loop {
            let outcome = self.db.preflight_claim(payment_id, request_id, now, lease_cutoff, duplicate_since).await?;
            let result = match outcome {
                PreflightOutcome::Claimed(request) => Preflight::Proceed(request),
                PreflightOutcome::PaymentAlreadyProcessed => {
                    debug!("💸️ Payment #{payment_id} was processed by someone else in the meantime");
                    Preflight::Done(SettlementOutcome::Skipped(SkipReason::AlreadyProcessed))
                },
                PreflightOutcome::PaymentHeldByOther => {
                    debug!("💸️ Payment #{payment_id} was taken over by another worker");
                    Preflight::Done(SettlementOutcome::Skipped(SkipReason::PaymentTakenByOther))
                },
                PreflightOutcome::RequestAlreadySettled { other_payment_id } => {
                    info!(
                        "💸️ Request #{request_id} was already settled by payment #{other_payment_id}. Payment \
                         #{payment_id} linked to it without a credit."
                    );
                    Preflight::Done(SettlementOutcome::Skipped(SkipReason::RequestAlreadySettled))
                },
                PreflightOutcome::RequestAlreadyProcessed => {
                    info!("💸️ Request #{request_id} is already processed. Payment #{payment_id} linked to it.");
                    Preflight::Done(SettlementOutcome::Skipped(SkipReason::AlreadyProcessed))
                },
                PreflightOutcome::RequestDispositioned(request) => {
                    Preflight::Done(self.handle_dispositioned(payment_id, &request, now).await?)
                },
                PreflightOutcome::DuplicateCredit { other_request_id } => {
                    warn!(
                        "💸️ Request #{other_request_id} credited the same amount to the same account moments ago. \
                         Treating request #{request_id} as a double submission. Payment #{payment_id} linked without \
                         a credit."
                    );
                    Preflight::Done(SettlementOutcome::Skipped(SkipReason::DuplicateDetected { other_request_id }))
                },
                PreflightOutcome::RequestHeldByOther { payment_id: holder } => {
                    if tokio::time::Instant::now() >= give_up_at {
                        debug!("💸️ Request #{request_id} is still being settled by payment #{holder}. Giving up.");
                        Preflight::Done(SettlementOutcome::Skipped(SkipReason::RequestHeldByOther))
                    } else {
                        trace!("💸️ Request #{request_id} is being settled by payment #{holder}. Waiting.");
                        tokio::time::sleep(self.config.claim_poll_interval).await;
                        continue;
                    }
                },
            };
            return Ok(result);
        }
    }

    /// The request was dispositioned as a failure. Ambiguous gateway failures get a chance to be corrected. Every
    /// other case ends with the payment linked to the request, and the request left for an operator.
    async fn handle_dispositioned(
        &self,
        payment_id: i64,
        request: &DepositRequest,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, SettlementError> {
        if request.status == RequestStatus::ApiError {
            match self.verifier.try_reconcile(request, payment_id, now).await? {
                Verification::Corrected { evidence_request_id } => {
                    info!(
                        "💸️ Request #{} reconciled against request #{evidence_request_id}. No new credit was made.",
                        request.id
                    );
                    return Ok(SettlementOutcome::Reconciled { request_id: request.id });
                },
                Verification::NotAmbiguous | Verification::Unresolved => {},
            }
        }
        if !self.db.link_payment(payment_id, request.id, now).await? {
            debug!("💸️ Payment #{payment_id} was processed by someone else in the meantime");
            return Ok(SettlementOutcome::Skipped(SkipReason::AlreadyProcessed));
        }
        warn!(
            "💸️ Request #{} is {}. Payment #{payment_id} linked to it, but nothing was credited. Manual processing \
             required.",
            request.id, request.status
        );
        Ok(SettlementOutcome::Skipped(SkipReason::ManualProcessingRequired(request.status)))
    }

    async fn credit(&self, request: &DepositRequest, lease: &PaymentLease) -> Result<(), GatewayError> {
        let instruction = CreditInstruction::new(&request.platform, &request.account_id, request.amount, request.id);
        debug!(
            "💸️ Crediting {} to {} on {} for request #{} (payment #{})",
            instruction.amount, instruction.account_id, instruction.platform, request.id, lease.payment_id
        );
        let timeout = self.config.gateway_timeout;
        match tokio::time::timeout(timeout, self.gateway.credit(instruction)).await {
            Ok(Ok(receipt)) => {
                trace!("💸️ Gateway accepted the credit for request #{}: {:?}", request.id, receipt.message);
                Ok(())
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GatewayError::timeout(timeout)),
        }
    }

    async fn handle_gateway_failure(
        &self,
        payment_id: i64,
        request: &DepositRequest,
        error: GatewayError,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, SettlementError> {
        let failure = GatewayFailure::new(error.kind, error.detail());
        let record = self.db.record_gateway_failure(payment_id, request.id, failure, now).await?;
        match record {
            FailureRecord::AlreadySettled => {
                info!(
                    "💸️ The gateway failed for request #{} ({error}), but a concurrent attempt settled it. Payment \
                     #{payment_id} linked.",
                    request.id
                );
                return Ok(SettlementOutcome::SettledByOther { request_id: request.id });
            },
            FailureRecord::Recorded => {
                error!("💸️ Could not credit request #{}. {error}. Marked as api_error.", request.id);
            },
            FailureRecord::Released { status } => {
                warn!(
                    "💸️ Could not credit request #{}. {error}. The request is now {status}, so its status was left \
                     alone.",
                    request.id
                );
            },
        }
        Err(SettlementError::GatewayFailure { request_id: request.id, kind: error.kind, message: error.message })
    }

    /// Read both rows back after the commit. On a mismatch, write the settled state directly once and read again.
    ///
    /// Returns the settled request as read back, whether the rows are consistent, and whether a corrective write
    /// was needed.
    async fn verify_settlement(
        &self,
        payment_id: i64,
        request: &DepositRequest,
        now: DateTime<Utc>,
    ) -> Result<(DepositRequest, bool, bool), SettlementError> {
        let mismatch = match self.read_back(payment_id, request.id).await? {
            ReadBack::Consistent(settled) => return Ok((settled, true, false)),
            ReadBack::Mismatch(e) => e,
        };
        warn!("💸️ {mismatch}. Writing the settled state directly.");
        self.db.force_settlement_state(payment_id, request.id, now).await?;
        match self.read_back(payment_id, request.id).await? {
            ReadBack::Consistent(settled) => {
                info!("💸️ Corrective write for request #{} and payment #{payment_id} succeeded", request.id);
                Ok((settled, true, true))
            },
            ReadBack::Mismatch(e) => {
                error!("🚨️🚨️🚨️ Integrity error after settling request #{}. {e}", request.id);
                error!(
                    "🚨️ {} was credited to {} on {}. No side effects will be dispatched for this settlement. Operator \
                     attention required.",
                    request.amount, request.account_id, request.platform
                );
                Ok((request.clone(), false, true))
            },
        }
    }

    async fn read_back(&self, payment_id: i64, request_id: i64) -> Result<ReadBack, SettlementError> {
        let request = self.db.fetch_request(request_id).await?;
        let payment = self.db.fetch_payment(payment_id).await?;
        let payment_ok =
            payment.as_ref().map(|p| p.is_processed && p.linked_request_id == Some(request_id)).unwrap_or(false);
        let settled = request.as_ref().filter(|r| r.status == RequestStatus::AutodepositSuccess);
        if let (true, Some(settled)) = (payment_ok, settled) {
            return Ok(ReadBack::Consistent(settled.clone()));
        }
        Ok(ReadBack::Mismatch(SettlementError::IntegrityMismatch {
            request_id,
            payment_id,
            request_status: request.map(|r| r.status.to_string()).unwrap_or_else(|| "missing".into()),
            linked_request_id: payment.as_ref().and_then(|p| p.linked_request_id),
            payment_processed: payment.map(|p| p.is_processed).unwrap_or(false),
        }))
    }

    async fn call_deposit_settled_hook(&self, request: DepositRequest, payment_id: i64, now: DateTime<Utc>) {
        let event = DepositSettledEvent::new(request, payment_id, now);
        for emitter in &self.producers.deposit_settled_producer {
            debug!("💸️ Notifying deposit settled hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }
}
