//! Matching incoming payments to pending deposit requests.
//!
//! The matcher is pure: it is handed a payment, the candidates the ledger found in the payment's search window, and
//! the current time. It never talks to the store itself.
//!
//! A request matches a payment when
//! 1. it is pending and its amount equals the payment amount to the cent,
//! 2. its creation time lies within `[T - W, T + W]`, where `T` is the payment's [`base_time`] and `W` the search
//!    window (both ends inclusive),
//! 3. no processed payment references it yet,
//! 4. it is not older than the maximum request age (requests dated in the future are tolerated),
//! 5. the payment did not arrive more than the maximum payment delay after the request was created.
//!
//! Among several matches, the oldest request wins, and the lowest id breaks ties on identical timestamps.
use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::db_types::{DepositRequest, IncomingPayment, MatchCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRules {
    /// Half-width of the window around the payment's base time in which requests are considered.
    pub search_window: Duration,
    /// Requests older than this (relative to now) are never matched.
    pub max_request_age: Duration,
    /// Payments arriving this long after a request was created are never matched to it.
    pub max_payment_delay: Duration,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            search_window: Duration::minutes(5),
            max_request_age: Duration::hours(8),
            max_payment_delay: Duration::hours(8),
        }
    }
}

/// The time the search window is centred on.
///
/// This is the bank-reported payment time, unless it disagrees with the ingestion time by more than the search
/// window. A disagreement that large points at clock skew or a backfill, and then the ingestion time is trusted
/// instead.
pub fn base_time(payment: &IncomingPayment, rules: &MatchRules) -> DateTime<Utc> {
    let skew = (payment.payment_time - payment.ingested_at).abs();
    if skew > rules.search_window {
        debug!(
            "🔍️ Payment #{} time {} is {}s away from its ingestion time. Using the ingestion time as base.",
            payment.id,
            payment.payment_time,
            skew.num_seconds()
        );
        payment.ingested_at
    } else {
        payment.payment_time
    }
}

/// The inclusive range of request creation times that is searched for a match.
pub fn search_window(payment: &IncomingPayment, rules: &MatchRules) -> (DateTime<Utc>, DateTime<Utc>) {
    let base = base_time(payment, rules);
    (base - rules.search_window, base + rules.search_window)
}

pub fn find_match<'a>(
    payment: &IncomingPayment,
    candidates: &'a [MatchCandidate],
    now: DateTime<Utc>,
    rules: &MatchRules,
) -> Option<&'a DepositRequest> {
    let base = base_time(payment, rules);
    candidates
        .iter()
        .filter(|c| is_eligible(payment, c, base, now, rules))
        .map(|c| &c.request)
        .min_by_key(|r| (r.created_at, r.id))
}

fn is_eligible(
    payment: &IncomingPayment,
    candidate: &MatchCandidate,
    base: DateTime<Utc>,
    now: DateTime<Utc>,
    rules: &MatchRules,
) -> bool {
    let request = &candidate.request;
    if !request.status.is_pending() {
        trace!("🔍️ Request #{} is {}, not pending", request.id, request.status);
        return false;
    }
    if request.amount != payment.amount {
        trace!("🔍️ Request #{} is for {}, not {}", request.id, request.amount, payment.amount);
        return false;
    }
    if candidate.has_processed_payment {
        trace!("🔍️ Request #{} already has a processed payment", request.id);
        return false;
    }
    let offset = base - request.created_at;
    if offset.abs() > rules.search_window {
        trace!("🔍️ Request #{} was created {}s away from the payment", request.id, offset.num_seconds());
        return false;
    }
    let age = now - request.created_at;
    if age > Duration::zero() && age > rules.max_request_age {
        trace!("🔍️ Request #{} is too old ({}s)", request.id, age.num_seconds());
        return false;
    }
    if offset > Duration::zero() && offset > rules.max_payment_delay {
        trace!("🔍️ Payment #{} arrived {}s after request #{}", payment.id, offset.num_seconds(), request.id);
        return false;
    }
    true
}
