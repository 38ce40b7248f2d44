mod support;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use deposit_engine::{
    clock::ManualClock,
    db_types::{
        Amount,
        DepositRequest,
        IncomingPayment,
        MatchCandidate,
        NewDepositRequest,
        NewIncomingPayment,
        RequestStatus,
        AUTO_PROCESSOR,
    },
    events::{EventHandlers, EventHooks, EventProducers},
    lock_coordinator::LockError,
    test_utils::mocks::{logging_commission, CallLog, CommissionCall, MockGateway},
    traits::{
        CommitOutcome,
        FailureRecord,
        GatewayError,
        GatewayErrorKind,
        GatewayFailure,
        LedgerError,
        LedgerStore,
        PreflightOutcome,
    },
    SettlementError,
    SettlementFlowApi,
    SettlementOutcome,
    SkipReason,
    SqliteDatabase,
};
use support::*;

#[tokio::test]
async fn payment_settles_the_matching_request() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    let req = new_request(&db, 42, "acc-1", "500.00".parse().unwrap(), t0() - Duration::minutes(2)).await;
    let pay = new_payment(&db, "500.00".parse().unwrap(), t0()).await;

    let outcome = api.process_payment(pay.id).await.expect("Settlement failed");
    let SettlementOutcome::Settled(report) = outcome else { panic!("Expected a settlement, got {outcome:?}") };
    assert_eq!(report.request_id, req.id);
    assert_eq!(report.payment_id, pay.id);
    assert_eq!(report.amount, amount(500));
    assert!(report.verified);
    assert!(!report.corrected);

    let calls = gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].account_id, "acc-1");
    assert_eq!(calls[0].platform, "melbet");
    assert_eq!(calls[0].amount, amount(500));
    assert_eq!(calls[0].correlation_id, format!("deposit-{}", req.id));

    let settled = request(&db, req.id).await;
    assert_eq!(settled.status, RequestStatus::AutodepositSuccess);
    assert_eq!(settled.processed_by.as_deref(), Some(AUTO_PROCESSOR));
    assert_eq!(settled.processed_at, Some(t0()));
    assert_eq!(settled.status_detail, None);
    let pay = payment(&db, pay.id).await;
    assert!(pay.is_processed);
    assert_eq!(pay.linked_request_id, Some(req.id));
}

#[tokio::test]
async fn second_run_on_a_settled_payment_is_a_no_op() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    new_request(&db, 1, "acc-1", amount(250), t0() - Duration::minutes(1)).await;
    let pay = new_payment(&db, amount(250), t0()).await;
    assert!(api.process_payment(pay.id).await.unwrap().is_settled());

    clock.advance(Duration::seconds(5));
    let outcome = api.process_payment(pay.id).await.unwrap();
    assert_eq!(outcome, SettlementOutcome::Skipped(SkipReason::Lock(LockError::AlreadyProcessed(pay.id))));
    assert_eq!(gateway.call_count(), 1);
}

#[tokio::test]
async fn unknown_payments_are_skipped() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);
    let outcome = api.process_payment(999).await.unwrap();
    assert_eq!(outcome, SettlementOutcome::Skipped(SkipReason::Lock(LockError::NotFound(999))));
}

#[tokio::test]
async fn inserted_rows_are_visible_on_other_pooled_connections() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    for i in 1..=4 {
        let req = new_request(&db, i, &format!("acc-{i}"), amount(100 * i), t0() - Duration::minutes(1)).await;
        let pay = new_payment(&db, amount(100 * i), t0()).await;
        // Hold a connection so the reads below are served by a different one
        let busy = db.pool().acquire().await.expect("Error acquiring a connection");
        assert_eq!(db.fetch_request(req.id).await.unwrap().map(|r| r.id), Some(req.id));
        assert_eq!(db.fetch_payment(pay.id).await.unwrap().map(|p| p.id), Some(pay.id));
        let outcome = api.process_payment(pay.id).await.unwrap();
        assert!(outcome.is_settled(), "Payment #{} was not settled: {outcome:?}", pay.id);
        drop(busy);
    }
    assert_eq!(gateway.call_count(), 4);
}

#[tokio::test]
async fn no_match_leaves_the_payment_available() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    // Wrong amount, and the right amount but far outside the window
    new_request(&db, 1, "acc-1", amount(301), t0()).await;
    new_request(&db, 2, "acc-2", amount(300), t0() - Duration::minutes(30)).await;
    let pay = new_payment(&db, amount(300), t0()).await;

    assert_eq!(api.process_payment(pay.id).await.unwrap(), SettlementOutcome::NoMatch);
    assert_eq!(gateway.call_count(), 0);
    let pay = payment(&db, pay.id).await;
    assert!(!pay.is_processed);
    assert_eq!(pay.linked_request_id, None);

    // The request shows up a little later and a re-trigger picks it up
    clock.advance(Duration::seconds(40));
    let late = new_request(&db, 3, "acc-3", amount(300), t0() + Duration::seconds(30)).await;
    let SettlementOutcome::Settled(report) = api.process_payment(pay.id).await.unwrap() else {
        panic!("Expected the late request to be settled")
    };
    assert_eq!(report.request_id, late.id);
}

#[tokio::test]
async fn oldest_of_identical_requests_wins() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    let newer = new_request(&db, 2, "acc-b", amount(1000), t0() - Duration::minutes(1)).await;
    let older = new_request(&db, 1, "acc-a", amount(1000), t0() - Duration::minutes(3)).await;
    let pay = new_payment(&db, amount(1000), t0()).await;

    let SettlementOutcome::Settled(report) = api.process_payment(pay.id).await.unwrap() else { panic!() };
    assert_eq!(report.request_id, older.id);
    assert_eq!(gateway.calls()[0].account_id, "acc-a");
    assert_eq!(request(&db, newer.id).await.status, RequestStatus::Pending);
}

#[tokio::test]
async fn window_boundary_is_inclusive() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);
    let window = api.config().match_rules.search_window;

    let pay = new_payment(&db, amount(700), t0()).await;
    let just_outside = new_request(&db, 1, "acc-1", amount(700), t0() - window - Duration::milliseconds(1)).await;
    assert_eq!(api.process_payment(pay.id).await.unwrap(), SettlementOutcome::NoMatch);

    let on_edge = new_request(&db, 2, "acc-2", amount(700), t0() - window).await;
    let SettlementOutcome::Settled(report) = api.process_payment(pay.id).await.unwrap() else { panic!() };
    assert_eq!(report.request_id, on_edge.id);
    assert_eq!(request(&db, just_outside.id).await.status, RequestStatus::Pending);
}

#[tokio::test]
async fn skewed_bank_timestamp_falls_back_to_ingestion_time() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    let req = new_request(&db, 1, "acc-1", amount(120), t0() - Duration::minutes(1)).await;
    // The bank claims the payment happened two hours ago, but we only just saw it
    let skewed = NewIncomingPayment::new(amount(120), t0() - Duration::hours(2), t0());
    let pay = db.insert_incoming_payment(skewed).await.unwrap();

    let SettlementOutcome::Settled(report) = api.process_payment(pay.id).await.unwrap() else { panic!() };
    assert_eq!(report.request_id, req.id);
}

#[tokio::test]
async fn gateway_failure_is_recorded_and_reported() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    let req = new_request(&db, 1, "acc-1", amount(500), t0() - Duration::minutes(1)).await;
    let pay = new_payment(&db, amount(500), t0()).await;
    let long_message = "Account acc-1 was not found on the cashier side, please verify the player id";
    gateway.fail_next(GatewayError::from_message(long_message));

    let err = api.process_payment(pay.id).await.expect_err("Expected a gateway failure");
    match err {
        SettlementError::GatewayFailure { request_id, kind, .. } => {
            assert_eq!(request_id, req.id);
            assert_eq!(kind, GatewayErrorKind::Permanent);
        },
        e => panic!("Unexpected error {e}"),
    }

    let failed = request(&db, req.id).await;
    assert_eq!(failed.status, RequestStatus::ApiError);
    assert_eq!(failed.error_kind, Some(GatewayErrorKind::Permanent));
    let detail = failed.status_detail.expect("Detail should be recorded");
    assert_eq!(detail.chars().count(), 50);
    assert!(long_message.starts_with(&detail));
    assert_eq!(failed.processed_at, Some(t0()));

    // The claim is released and the payment stays available
    let pay = payment(&db, pay.id).await;
    assert!(!pay.is_processed);
    assert_eq!(pay.linked_request_id, None);

    // The engine never retries a failed request by itself
    clock.advance(Duration::seconds(45));
    assert_eq!(api.process_payment(pay.id).await.unwrap(), SettlementOutcome::NoMatch);
    assert_eq!(gateway.call_count(), 1);
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new().with_delay(StdDuration::from_millis(500));
    let mut config = test_config();
    config.gateway_timeout = StdDuration::from_millis(50);
    let api = flow_with(&db, &gateway, &clock, config, EventProducers::default());

    let req = new_request(&db, 1, "acc-1", amount(80), t0() - Duration::minutes(1)).await;
    let pay = new_payment(&db, amount(80), t0()).await;

    let err = api.process_payment(pay.id).await.expect_err("Expected a timeout");
    assert!(matches!(err, SettlementError::GatewayFailure { kind: GatewayErrorKind::Timeout, .. }));
    let failed = request(&db, req.id).await;
    assert_eq!(failed.status, RequestStatus::ApiError);
    assert_eq!(failed.error_kind, Some(GatewayErrorKind::Timeout));
}

#[tokio::test]
async fn recent_identical_credit_is_treated_as_a_duplicate() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    let first = new_request(&db, 5, "acc-5", amount(400), t0() - Duration::minutes(1)).await;
    let pay1 = new_payment(&db, amount(400), t0()).await;
    assert!(api.process_payment(pay1.id).await.unwrap().is_settled());

    // The user submits the same deposit again and a second bank payment comes in two minutes later
    clock.advance(Duration::minutes(2));
    let second = new_request(&db, 5, "acc-5", amount(400), t0() + Duration::seconds(90)).await;
    let pay2 = new_payment(&db, amount(400), t0() + Duration::minutes(2)).await;

    let outcome = api.process_payment(pay2.id).await.unwrap();
    assert_eq!(outcome, SettlementOutcome::Skipped(SkipReason::DuplicateDetected { other_request_id: first.id }));
    assert_eq!(gateway.call_count(), 1);
    assert_eq!(request(&db, second.id).await.status, RequestStatus::Pending);
    let pay2 = payment(&db, pay2.id).await;
    assert!(pay2.is_processed);
    assert_eq!(pay2.linked_request_id, Some(second.id));
}

#[tokio::test]
async fn identical_credit_outside_the_duplicate_window_is_settled() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    new_request(&db, 5, "acc-5", amount(400), t0() - Duration::minutes(1)).await;
    let pay1 = new_payment(&db, amount(400), t0()).await;
    assert!(api.process_payment(pay1.id).await.unwrap().is_settled());

    clock.advance(Duration::minutes(6));
    let later = new_request(&db, 5, "acc-5", amount(400), t0() + Duration::minutes(6)).await;
    let pay2 = new_payment(&db, amount(400), t0() + Duration::minutes(6)).await;
    let SettlementOutcome::Settled(report) = api.process_payment(pay2.id).await.unwrap() else { panic!() };
    assert_eq!(report.request_id, later.id);
    assert_eq!(gateway.call_count(), 2);
}

#[tokio::test]
async fn expired_claim_of_a_crashed_worker_is_reclaimed() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    let req = new_request(&db, 1, "acc-1", amount(90), t0() - Duration::minutes(1)).await;
    let pay = new_payment(&db, amount(90), t0()).await;
    // A worker claims the request and then dies before calling the gateway
    let claimed = db
        .preflight_claim(pay.id, req.id, t0(), t0() - Duration::seconds(30), t0() - Duration::minutes(5))
        .await
        .unwrap();
    assert!(matches!(claimed, PreflightOutcome::Claimed(_)));

    clock.advance(Duration::seconds(10));
    let outcome = api.process_payment(pay.id).await.unwrap();
    assert_eq!(outcome, SettlementOutcome::Skipped(SkipReason::Lock(LockError::HeldByOther(pay.id))));
    assert_eq!(gateway.call_count(), 0);

    clock.advance(Duration::seconds(21));
    let SettlementOutcome::Settled(report) = api.process_payment(pay.id).await.unwrap() else {
        panic!("The expired lease should have been reclaimed")
    };
    assert_eq!(report.request_id, req.id);
    assert_eq!(gateway.call_count(), 1);
}

#[tokio::test]
async fn pending_payments_are_processed_in_a_batch() {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let api = flow(&db, &gateway, &clock);

    new_request(&db, 1, "acc-1", amount(100), t0() - Duration::minutes(1)).await;
    new_request(&db, 2, "acc-2", amount(200), t0() - Duration::minutes(1)).await;
    new_payment(&db, amount(100), t0() - Duration::seconds(20)).await;
    new_payment(&db, amount(200), t0() - Duration::seconds(10)).await;
    new_payment(&db, amount(999), t0() - Duration::seconds(5)).await;
    // Too old for this batch
    new_payment(&db, amount(100), t0() - Duration::days(2)).await;

    let summary = api.process_pending_payments(t0() - Duration::hours(1), 100).await.unwrap();
    assert_eq!(summary.settled, 2);
    assert_eq!(summary.no_match, 1);
    assert_eq!(summary.total(), 3);
    assert_eq!(gateway.call_count(), 2);
}

//--------------------------------------  Ledger primitives  ----------------------------------------------------------

#[tokio::test]
async fn preflight_links_payments_for_requests_settled_elsewhere() {
    let db = new_ledger().await;
    let req = new_request(&db, 1, "acc-1", amount(60), t0()).await;
    let pay = new_payment(&db, amount(60), t0()).await;
    set_status(&db, req.id, RequestStatus::Completed, None, None, t0()).await;

    let cutoff = t0() - Duration::seconds(30);
    let outcome = db.preflight_claim(pay.id, req.id, t0(), cutoff, t0() - Duration::minutes(5)).await.unwrap();
    assert_eq!(outcome, PreflightOutcome::RequestAlreadyProcessed);
    let pay = payment(&db, pay.id).await;
    assert!(pay.is_processed);
    assert_eq!(pay.linked_request_id, Some(req.id));
}

#[tokio::test]
async fn preflight_leaves_dispositioned_requests_alone() {
    let db = new_ledger().await;
    let req = new_request(&db, 1, "acc-1", amount(60), t0()).await;
    let pay = new_payment(&db, amount(60), t0()).await;
    set_status(&db, req.id, RequestStatus::Rejected, Some("fraud"), None, t0()).await;

    let cutoff = t0() - Duration::seconds(30);
    let outcome = db.preflight_claim(pay.id, req.id, t0(), cutoff, t0() - Duration::minutes(5)).await.unwrap();
    let PreflightOutcome::RequestDispositioned(r) = outcome else { panic!("Unexpected outcome {outcome:?}") };
    assert_eq!(r.status, RequestStatus::Rejected);
    let pay = payment(&db, pay.id).await;
    assert!(!pay.is_processed);
    assert_eq!(pay.linked_request_id, None);
}

#[tokio::test]
async fn live_claims_block_other_payments() {
    let db = new_ledger().await;
    let req = new_request(&db, 1, "acc-1", amount(60), t0()).await;
    let a = new_payment(&db, amount(60), t0()).await;
    let b = new_payment(&db, amount(60), t0()).await;
    let cutoff = t0() - Duration::seconds(30);
    let dup_since = t0() - Duration::minutes(5);

    assert!(matches!(
        db.preflight_claim(a.id, req.id, t0(), cutoff, dup_since).await.unwrap(),
        PreflightOutcome::Claimed(_)
    ));
    assert_eq!(
        db.preflight_claim(b.id, req.id, t0(), cutoff, dup_since).await.unwrap(),
        PreflightOutcome::RequestHeldByOther { payment_id: a.id }
    );
    // Once A's claim has gone stale, B may claim the request
    let later = t0() + Duration::seconds(31);
    assert!(matches!(
        db.preflight_claim(b.id, req.id, later, later - Duration::seconds(30), dup_since).await.unwrap(),
        PreflightOutcome::Claimed(_)
    ));
}

#[tokio::test]
async fn failure_after_a_racing_success_links_the_payment() {
    let db = new_ledger().await;
    let req = new_request(&db, 1, "acc-1", amount(60), t0()).await;
    let winner = new_payment(&db, amount(60), t0()).await;
    let loser = new_payment(&db, amount(60), t0()).await;
    assert_eq!(db.commit_settlement(winner.id, req.id, t0()).await.unwrap(), CommitOutcome::Committed);

    let failure = GatewayFailure::new(GatewayErrorKind::Transient, "502 Bad Gateway".into());
    let record = db.record_gateway_failure(loser.id, req.id, failure, t0()).await.unwrap();
    assert_eq!(record, FailureRecord::AlreadySettled);
    assert_eq!(request(&db, req.id).await.status, RequestStatus::AutodepositSuccess);
    assert_eq!(payment(&db, loser.id).await.linked_request_id, Some(req.id));

    // And a commit for a request that is already settled only links the payment
    let third = new_payment(&db, amount(60), t0()).await;
    assert_eq!(db.commit_settlement(third.id, req.id, t0()).await.unwrap(), CommitOutcome::AlreadySettled);
    assert!(payment(&db, third.id).await.is_processed);
}

#[tokio::test]
async fn failure_on_a_request_that_moved_on_only_releases_the_claim() {
    let db = new_ledger().await;
    let req = new_request(&db, 1, "acc-1", amount(60), t0()).await;
    let pay = new_payment(&db, amount(60), t0()).await;
    let cutoff = t0() - Duration::seconds(30);
    db.preflight_claim(pay.id, req.id, t0(), cutoff, t0() - Duration::minutes(5)).await.unwrap();
    set_status(&db, req.id, RequestStatus::Rejected, Some("cancelled by operator"), None, t0()).await;

    let failure = GatewayFailure::new(GatewayErrorKind::Permanent, "Account blocked".into());
    let record = db.record_gateway_failure(pay.id, req.id, failure, t0()).await.unwrap();
    assert_eq!(record, FailureRecord::Released { status: RequestStatus::Rejected });
    let r = request(&db, req.id).await;
    assert_eq!(r.status, RequestStatus::Rejected);
    assert_eq!(r.status_detail.as_deref(), Some("cancelled by operator"));
    assert_eq!(payment(&db, pay.id).await.linked_request_id, None);
}

//--------------------------------------  Post-commit checks  ---------------------------------------------------------

/// A ledger whose request reads lag behind its writes, like a lagging read replica would.
#[derive(Clone)]
struct LaggingReplica {
    inner: SqliteDatabase,
    stale_reads: Arc<AtomicUsize>,
}

impl LaggingReplica {
    fn new(inner: SqliteDatabase, stale_reads: usize) -> Self {
        Self { inner, stale_reads: Arc::new(AtomicUsize::new(stale_reads)) }
    }
}

impl LedgerStore for LaggingReplica {
    fn url(&self) -> &str {
        self.inner.url()
    }

    async fn insert_deposit_request(&self, request: NewDepositRequest) -> Result<DepositRequest, LedgerError> {
        self.inner.insert_deposit_request(request).await
    }

    async fn insert_incoming_payment(&self, payment: NewIncomingPayment) -> Result<IncomingPayment, LedgerError> {
        self.inner.insert_incoming_payment(payment).await
    }

    async fn fetch_request(&self, request_id: i64) -> Result<Option<DepositRequest>, LedgerError> {
        let request = self.inner.fetch_request(request_id).await?;
        let lagging = self.stale_reads.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        Ok(request.map(|mut r| {
            if lagging {
                r.status = RequestStatus::Pending;
            }
            r
        }))
    }

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<IncomingPayment>, LedgerError> {
        self.inner.fetch_payment(payment_id).await
    }

    async fn fetch_unprocessed_payments(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<IncomingPayment>, LedgerError> {
        self.inner.fetch_unprocessed_payments(since, limit).await
    }

    async fn renew_payment_lease(
        &self,
        payment_id: i64,
        observed_updated_at: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        self.inner.renew_payment_lease(payment_id, observed_updated_at, lease_cutoff, now).await
    }

    async fn fetch_match_candidates(
        &self,
        amount: Amount,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<MatchCandidate>, LedgerError> {
        self.inner.fetch_match_candidates(amount, window_start, window_end).await
    }

    async fn preflight_claim(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
        duplicate_since: DateTime<Utc>,
    ) -> Result<PreflightOutcome, LedgerError> {
        self.inner.preflight_claim(payment_id, request_id, now, lease_cutoff, duplicate_since).await
    }

    async fn link_payment(&self, payment_id: i64, request_id: i64, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        self.inner.link_payment(payment_id, request_id, now).await
    }

    async fn record_gateway_failure(
        &self,
        payment_id: i64,
        request_id: i64,
        failure: GatewayFailure,
        now: DateTime<Utc>,
    ) -> Result<FailureRecord, LedgerError> {
        self.inner.record_gateway_failure(payment_id, request_id, failure, now).await
    }

    async fn commit_settlement(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome, LedgerError> {
        self.inner.commit_settlement(payment_id, request_id, now).await
    }

    async fn force_settlement_state(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.inner.force_settlement_state(payment_id, request_id, now).await
    }

    async fn find_recent_settlement(
        &self,
        platform: &str,
        account_id: &str,
        amount: Amount,
        since: DateTime<Utc>,
        exclude_request_id: i64,
    ) -> Result<Option<DepositRequest>, LedgerError> {
        self.inner.find_recent_settlement(platform, account_id, amount, since, exclude_request_id).await
    }

    async fn reclassify_as_settled(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        self.inner.reclassify_as_settled(payment_id, request_id, now).await
    }

    async fn renew_request_lease(
        &self,
        request_id: i64,
        status: RequestStatus,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        self.inner.renew_request_lease(request_id, status, older_than, now).await
    }
}

async fn settle_through_lagging_replica(stale_reads: usize) -> (SettlementOutcome, CallLog<CommissionCall>) {
    let db = new_ledger().await;
    let clock = ManualClock::new(t0());
    let gateway = MockGateway::new();
    let commission = CallLog::default();
    let mut hooks = EventHooks::default();
    hooks.on_deposit_settled(deposit_engine::events::commission_hook(logging_commission(&commission, Ok(()))));
    let handlers = EventHandlers::new(8, hooks);
    let producers = handlers.producers();
    let tasks = handlers.start_handlers();

    let replica = LaggingReplica::new(db.clone(), stale_reads);
    new_request(&db, 1, "acc-1", amount(75), t0() - Duration::minutes(1)).await;
    let pay = new_payment(&db, amount(75), t0()).await;
    let api = SettlementFlowApi::new(replica, gateway.clone(), Arc::new(clock.clone()), test_config(), producers);
    let outcome = api.process_payment(pay.id).await.unwrap();
    drop(api);
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(gateway.call_count(), 1);
    (outcome, commission)
}

#[tokio::test]
async fn stale_read_back_is_corrected_once() {
    let (outcome, commission) = settle_through_lagging_replica(1).await;
    let SettlementOutcome::Settled(report) = outcome else { panic!("Unexpected outcome {outcome:?}") };
    assert!(report.verified);
    assert!(report.corrected);
    assert_eq!(commission.calls().len(), 1);
}

#[tokio::test]
async fn persistent_mismatch_suppresses_side_effects() {
    let (outcome, commission) = settle_through_lagging_replica(2).await;
    let SettlementOutcome::Settled(report) = outcome else { panic!("Unexpected outcome {outcome:?}") };
    assert!(!report.verified);
    assert!(report.corrected);
    assert!(commission.calls().is_empty());
}
