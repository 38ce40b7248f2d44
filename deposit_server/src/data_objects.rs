use deposit_engine::{SettlementOutcome, SettlementReport};
use serde::{Deserialize, Serialize};

/// The body returned by `POST /payments/{id}/process`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResponse {
    /// One of `settled`, `reconciled`, `settled_by_other`, `no_match` or `skipped`
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    /// Why the payment was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SettlementReport>,
}

impl From<SettlementOutcome> for SettlementResponse {
    fn from(outcome: SettlementOutcome) -> Self {
        let label = outcome.label().to_string();
        match outcome {
            SettlementOutcome::Settled(report) => {
                Self { outcome: label, request_id: Some(report.request_id), reason: None, report: Some(report) }
            },
            SettlementOutcome::Reconciled { request_id } | SettlementOutcome::SettledByOther { request_id } => {
                Self { outcome: label, request_id: Some(request_id), reason: None, report: None }
            },
            SettlementOutcome::NoMatch => Self { outcome: label, request_id: None, reason: None, report: None },
            SettlementOutcome::Skipped(reason) => {
                Self { outcome: label, request_id: None, reason: Some(reason.to_string()), report: None }
            },
        }
    }
}

#[cfg(test)]
mod test {
    use deposit_engine::{db_types::RequestStatus, SkipReason};

    use super::*;

    #[test]
    fn skipped_outcomes_carry_a_reason() {
        let outcome = SettlementOutcome::Skipped(SkipReason::ManualProcessingRequired(RequestStatus::ApiError));
        let json = serde_json::to_string(&SettlementResponse::from(outcome)).unwrap();
        assert_eq!(json, r#"{"outcome":"skipped","reason":"manual_processing_required_api_error"}"#);
    }

    #[test]
    fn settled_by_other_names_the_request() {
        let json = serde_json::to_string(&SettlementResponse::from(SettlementOutcome::SettledByOther { request_id: 4 }))
            .unwrap();
        assert_eq!(json, r#"{"outcome":"settled_by_other","request_id":4}"#);
    }

    #[test]
    fn no_match_is_bare() {
        let json = serde_json::to_string(&SettlementResponse::from(SettlementOutcome::NoMatch)).unwrap();
        assert_eq!(json, r#"{"outcome":"no_match"}"#);
    }
}
