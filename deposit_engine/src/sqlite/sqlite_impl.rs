//! `SqliteDatabase` is the SQLite implementation of the deposit ledger.
//!
//! Check-then-act sequences run inside [`ImmediateTransaction`]s, which take SQLite's write lock up front and so
//! give serializable semantics across every connection (and process) that shares the database file.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{db_url, new_pool, payments, requests, ImmediateTransaction};
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
    traits::{CommitOutcome, FailureRecord, GatewayFailure, LedgerError, LedgerStore, PreflightOutcome},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL in `DRE_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Ledger migrations are up to date");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn preflight_in_tx(
        tx: &mut ImmediateTransaction,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
        duplicate_since: DateTime<Utc>,
    ) -> Result<PreflightOutcome, LedgerError> {
        let conn = tx.conn()?;
        let payment = payments::fetch(payment_id, &mut *conn).await?.ok_or(LedgerError::PaymentNotFound(payment_id))?;
        if payment.is_processed {
            return Ok(PreflightOutcome::PaymentAlreadyProcessed);
        }
        if payment.linked_request_id.is_some() {
            return Ok(PreflightOutcome::PaymentHeldByOther);
        }
        let request = requests::fetch(request_id, &mut *conn).await?.ok_or(LedgerError::RequestNotFound(request_id))?;
        if let Some(other_payment_id) = payments::other_processed_payment(request_id, payment_id, &mut *conn).await? {
            payments::link(payment_id, request_id, now, &mut *conn).await?;
            return Ok(PreflightOutcome::RequestAlreadySettled { other_payment_id });
        }
        if request.status.is_terminal_success() || request.was_auto_processed() {
            payments::link(payment_id, request_id, now, &mut *conn).await?;
            return Ok(PreflightOutcome::RequestAlreadyProcessed);
        }
        if request.status.is_failure_disposition() {
            return Ok(PreflightOutcome::RequestDispositioned(request));
        }
        if let Some(holder) = payments::live_claim_on_request(request_id, payment_id, lease_cutoff, &mut *conn).await?
        {
            return Ok(PreflightOutcome::RequestHeldByOther { payment_id: holder });
        }
        let recent = requests::find_recent_settlement(
            &request.platform,
            &request.account_id,
            request.amount,
            duplicate_since,
            request_id,
            &mut *conn,
        )
        .await?;
        if let Some(other) = recent {
            payments::link(payment_id, request_id, now, &mut *conn).await?;
            return Ok(PreflightOutcome::DuplicateCredit { other_request_id: other.id });
        }
        if !payments::claim(payment_id, request_id, now, &mut *conn).await? {
            return Ok(PreflightOutcome::PaymentHeldByOther);
        }
        Ok(PreflightOutcome::Claimed(request))
    }

    async fn record_failure_in_tx(
        tx: &mut ImmediateTransaction,
        payment_id: i64,
        request_id: i64,
        failure: &GatewayFailure,
        now: DateTime<Utc>,
    ) -> Result<FailureRecord, LedgerError> {
        let conn = tx.conn()?;
        let request = requests::fetch(request_id, &mut *conn).await?.ok_or(LedgerError::RequestNotFound(request_id))?;
        if request.status.is_terminal_success() {
            payments::link(payment_id, request_id, now, &mut *conn).await?;
            return Ok(FailureRecord::AlreadySettled);
        }
        let recorded = request.status.is_pending() && requests::mark_api_error(request_id, failure, now, &mut *conn).await?;
        payments::release_claim(payment_id, now, &mut *conn).await?;
        if recorded {
            Ok(FailureRecord::Recorded)
        } else {
            Ok(FailureRecord::Released { status: request.status })
        }
    }

    async fn commit_in_tx(
        tx: &mut ImmediateTransaction,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome, LedgerError> {
        let conn = tx.conn()?;
        let payment = payments::fetch(payment_id, &mut *conn).await?.ok_or(LedgerError::PaymentNotFound(payment_id))?;
        if payment.is_processed {
            return match payment.linked_request_id {
                Some(id) if id == request_id => Ok(CommitOutcome::AlreadySettled),
                other => Ok(CommitOutcome::PaymentTakenByOther { request_id: other }),
            };
        }
        let request = requests::fetch(request_id, &mut *conn).await?.ok_or(LedgerError::RequestNotFound(request_id))?;
        let settled_by_other = payments::other_processed_payment(request_id, payment_id, &mut *conn).await?.is_some();
        if settled_by_other || request.status.is_terminal_success() || request.was_auto_processed() {
            payments::link(payment_id, request_id, now, &mut *conn).await?;
            return Ok(CommitOutcome::AlreadySettled);
        }
        requests::mark_auto_settled(request_id, now, &mut *conn).await?;
        if !payments::link(payment_id, request_id, now, &mut *conn).await? {
            return Err(LedgerError::DatabaseError(format!(
                "Payment #{payment_id} could not be linked to request #{request_id} in the settlement transaction"
            )));
        }
        Ok(CommitOutcome::Committed)
    }

    async fn reclassify_in_tx(
        tx: &mut ImmediateTransaction,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let conn = tx.conn()?;
        if !requests::reclassify_api_error(request_id, now, &mut *conn).await? {
            return Ok(false);
        }
        payments::link(payment_id, request_id, now, &mut *conn).await
    }
}

/// Runs `$body` (an expression using `tx`) inside an immediate transaction. Commits if it returns `Ok`, rolls back
/// otherwise.
macro_rules! in_immediate_tx {
    ($pool:expr, |$tx:ident| $body:expr) => {{
        let mut $tx = ImmediateTransaction::begin($pool).await?;
        let result = $body.await;
        match result {
            Ok(v) => {
                $tx.commit().await?;
                Ok(v)
            },
            Err(e) => {
                if let Err(rb) = $tx.rollback().await {
                    warn!("🗃️ Could not roll back transaction: {rb}");
                }
                Err(e)
            },
        }
    }};
}

impl LedgerStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_deposit_request(&self, request: NewDepositRequest) -> Result<DepositRequest, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let request = requests::insert(request, &mut conn).await?;
        debug!("🗃️ Deposit request #{} for {} on {} saved", request.id, request.amount, request.platform);
        Ok(request)
    }

    async fn insert_incoming_payment(&self, payment: NewIncomingPayment) -> Result<IncomingPayment, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::insert(payment, &mut conn).await?;
        debug!("🗃️ Incoming payment #{} for {} saved", payment.id, payment.amount);
        Ok(payment)
    }

    async fn fetch_request(&self, request_id: i64) -> Result<Option<DepositRequest>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        requests::fetch(request_id, &mut conn).await
    }

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<IncomingPayment>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch(payment_id, &mut conn).await
    }

    async fn fetch_unprocessed_payments(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<IncomingPayment>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_unprocessed(since, limit, &mut conn).await
    }

    async fn renew_payment_lease(
        &self,
        payment_id: i64,
        observed_updated_at: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::renew_lease(payment_id, observed_updated_at, lease_cutoff, now, &mut conn).await
    }

    async fn fetch_match_candidates(
        &self,
        amount: Amount,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<MatchCandidate>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let candidates = requests::match_candidates(amount, window_start, window_end, &mut conn).await?;
        trace!("🗃️ {} pending requests for {amount} between {window_start} and {window_end}", candidates.len());
        Ok(candidates)
    }

    async fn preflight_claim(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
        duplicate_since: DateTime<Utc>,
    ) -> Result<PreflightOutcome, LedgerError> {
        in_immediate_tx!(&self.pool, |tx| Self::preflight_in_tx(
            &mut tx,
            payment_id,
            request_id,
            now,
            lease_cutoff,
            duplicate_since
        ))
    }

    async fn link_payment(&self, payment_id: i64, request_id: i64, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let linked = payments::link(payment_id, request_id, now, &mut conn).await?;
        trace!("🗃️ Link payment #{payment_id} to request #{request_id}: {linked}");
        Ok(linked)
    }

    async fn record_gateway_failure(
        &self,
        payment_id: i64,
        request_id: i64,
        failure: GatewayFailure,
        now: DateTime<Utc>,
    ) -> Result<FailureRecord, LedgerError> {
        in_immediate_tx!(&self.pool, |tx| Self::record_failure_in_tx(&mut tx, payment_id, request_id, &failure, now))
    }

    async fn commit_settlement(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome, LedgerError> {
        in_immediate_tx!(&self.pool, |tx| Self::commit_in_tx(&mut tx, payment_id, request_id, now))
    }

    async fn force_settlement_state(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;
        requests::mark_auto_settled(request_id, now, &mut tx).await?;
        payments::force_link(payment_id, request_id, now, &mut tx).await?;
        tx.commit().await?;
        warn!("🗃️ Forced settled state onto request #{request_id} and payment #{payment_id}");
        Ok(())
    }

    async fn find_recent_settlement(
        &self,
        platform: &str,
        account_id: &str,
        amount: Amount,
        since: DateTime<Utc>,
        exclude_request_id: i64,
    ) -> Result<Option<DepositRequest>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        requests::find_recent_settlement(platform, account_id, amount, since, exclude_request_id, &mut conn).await
    }

    async fn reclassify_as_settled(
        &self,
        payment_id: i64,
        request_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let mut tx = ImmediateTransaction::begin(&self.pool).await?;
        match Self::reclassify_in_tx(&mut tx, payment_id, request_id, now).await {
            Ok(true) => {
                tx.commit().await?;
                Ok(true)
            },
            // Either half failed, so neither half may stick
            Ok(false) => {
                tx.rollback().await?;
                Ok(false)
            },
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!("🗃️ Could not roll back transaction: {rb}");
                }
                Err(e)
            },
        }
    }

    async fn renew_request_lease(
        &self,
        request_id: i64,
        status: RequestStatus,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        requests::renew_lease(request_id, status, older_than, now, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}
