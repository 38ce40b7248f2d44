//! Resolving ambiguous gateway failures after the fact.
//!
//! Some gateway errors do not say whether the credit failed. "This operation was already processed" or "too many
//! requests" can both come back for a credit that actually went through. Re-crediting such a request would pay the
//! user twice, so before anything else happens to it the verifier looks for evidence of the credit: a recent success
//! for the same platform account and amount. If it finds one, the failure is treated as spurious and the request is
//! moved to the success state. Otherwise the request is left in `api_error` for an operator.
use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::{
    db_types::{DepositRequest, RequestStatus},
    traits::{GatewayErrorKind, LedgerError, LedgerStore},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The request is not an `api_error` with an ambiguous cause. The verifier did nothing.
    NotAmbiguous,
    /// The earlier failure was spurious. The request is now settled and the payment linked to it.
    Corrected { evidence_request_id: i64 },
    /// No evidence of an earlier credit was found. The request keeps its `api_error` status.
    Unresolved,
}

pub struct ReconciliationVerifier<B> {
    db: B,
    window: Duration,
}

impl<B> ReconciliationVerifier<B> {
    pub fn new(db: B, window: Duration) -> Self {
        Self { db, window }
    }
}

/// The persisted kind wins. Rows written before the kind was recorded fall back to classifying the stored detail.
pub fn failure_kind(request: &DepositRequest) -> Option<GatewayErrorKind> {
    if request.status != RequestStatus::ApiError {
        return None;
    }
    request.error_kind.or_else(|| request.status_detail.as_deref().map(GatewayErrorKind::classify))
}

impl<B: LedgerStore> ReconciliationVerifier<B> {
    pub async fn try_reconcile(
        &self,
        request: &DepositRequest,
        payment_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Verification, LedgerError> {
        match failure_kind(request) {
            Some(kind) if kind.is_ambiguous() => {
                debug!("🧾️ Request #{} failed with an ambiguous gateway error ({kind}). Looking for evidence.", request.id)
            },
            _ => return Ok(Verification::NotAmbiguous),
        }
        let since = now - self.window;
        let evidence = self
            .db
            .find_recent_settlement(&request.platform, &request.account_id, request.amount, since, request.id)
            .await?;
        let Some(evidence) = evidence else {
            info!(
                "🧾️ No recent {} credit to {} on {} found. Request #{} stays in api_error.",
                request.amount, request.account_id, request.platform, request.id
            );
            return Ok(Verification::Unresolved);
        };
        if self.db.reclassify_as_settled(payment_id, request.id, now).await? {
            info!(
                "🧾️ Request #{} was credited after all (request #{} credited the same {} to {}). Marked as settled \
                 and linked to payment #{payment_id}.",
                request.id, evidence.id, request.amount, request.account_id
            );
            Ok(Verification::Corrected { evidence_request_id: evidence.id })
        } else {
            debug!("🧾️ Request #{} or payment #{payment_id} changed before it could be reclassified.", request.id);
            Ok(Verification::Unresolved)
        }
    }
}
