use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
pub use deposit_common::Amount;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

use crate::traits::GatewayErrorKind;

/// The processor identity stamped on requests settled by the automatic path.
pub const AUTO_PROCESSOR: &str = "autodeposit";

//--------------------------------------   RequestStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// The request is waiting for a matching payment.
    Pending,
    /// The settlement gateway returned an error. Only an administrator can retry.
    ApiError,
    /// The deposit failed for a non-gateway reason. Only an administrator can retry.
    DepositFailed,
    /// Settled by the automatic matching engine.
    AutodepositSuccess,
    /// Settled manually by an operator.
    Completed,
    /// Approved manually by an operator.
    Approved,
    /// Settled by an automatic rule outside this engine.
    AutoCompleted,
    /// Rejected by an operator.
    Rejected,
}

impl RequestStatus {
    pub const TERMINAL_SUCCESS: [RequestStatus; 4] = [
        RequestStatus::AutodepositSuccess,
        RequestStatus::Completed,
        RequestStatus::Approved,
        RequestStatus::AutoCompleted,
    ];

    /// All success states are semantically equivalent. They only differ in who triggered the settlement.
    pub fn is_terminal_success(&self) -> bool {
        Self::TERMINAL_SUCCESS.contains(self)
    }

    /// States that a human (or a previous gateway failure) has already dispositioned, and which the engine must never
    /// try to credit again.
    pub fn is_failure_disposition(&self) -> bool {
        matches!(self, RequestStatus::ApiError | RequestStatus::DepositFailed | RequestStatus::Rejected)
    }

    /// Everything except `pending`. The engine never moves a request out of one of these states on its own, except
    /// for the verifier's correction of a spurious `api_error`.
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::ApiError => "api_error",
            RequestStatus::DepositFailed => "deposit_failed",
            RequestStatus::AutodepositSuccess => "autodeposit_success",
            RequestStatus::Completed => "completed",
            RequestStatus::Approved => "approved",
            RequestStatus::AutoCompleted => "auto_completed",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid request status: {0}")]
pub struct ConversionError(String);

impl FromStr for RequestStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "api_error" => Ok(Self::ApiError),
            "deposit_failed" => Ok(Self::DepositFailed),
            "autodeposit_success" => Ok(Self::AutodepositSuccess),
            "completed" => Ok(Self::Completed),
            "approved" => Ok(Self::Approved),
            "auto_completed" => Ok(Self::AutoCompleted),
            "rejected" => Ok(Self::Rejected),
            s => Err(ConversionError(s.to_string())),
        }
    }
}

impl From<String> for RequestStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid request status: {value}. But this conversion cannot fail. Defaulting to DepositFailed");
            RequestStatus::DepositFailed
        })
    }
}

//--------------------------------------   DepositRequest     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DepositRequest {
    pub id: i64,
    /// The user that asked for the deposit. Notifications go to this user.
    pub user_id: i64,
    /// The platform (casino) that the funds are delivered to.
    pub platform: String,
    /// The account on `platform` that gets credited.
    pub account_id: String,
    pub amount: Amount,
    pub status: RequestStatus,
    /// Free text explaining the status, e.g. a truncated gateway error message.
    pub status_detail: Option<String>,
    /// The classified gateway error, if the request is in `api_error`.
    pub error_kind: Option<GatewayErrorKind>,
    pub processed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl DepositRequest {
    pub fn was_auto_processed(&self) -> bool {
        self.processed_by.as_deref() == Some(AUTO_PROCESSOR)
    }
}

//--------------------------------------  NewDepositRequest   ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDepositRequest {
    pub user_id: i64,
    pub platform: String,
    pub account_id: String,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

impl NewDepositRequest {
    pub fn new(user_id: i64, platform: &str, account_id: &str, amount: Amount, created_at: DateTime<Utc>) -> Self {
        Self { user_id, platform: platform.to_string(), account_id: account_id.to_string(), amount, created_at }
    }
}

//--------------------------------------   IncomingPayment    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct IncomingPayment {
    pub id: i64,
    pub amount: Amount,
    /// The time the bank says the payment happened. This is authoritative for matching.
    pub payment_time: DateTime<Utc>,
    /// The time this system first saw the payment.
    pub ingested_at: DateTime<Utc>,
    pub is_processed: bool,
    /// The request this payment settled, or the request it is provisionally claiming while a settlement is in flight.
    pub linked_request_id: Option<i64>,
    /// Doubles as the lease timestamp for the payment lock.
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------  NewIncomingPayment  ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIncomingPayment {
    pub amount: Amount,
    pub payment_time: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

impl NewIncomingPayment {
    pub fn new(amount: Amount, payment_time: DateTime<Utc>, ingested_at: DateTime<Utc>) -> Self {
        Self { amount, payment_time, ingested_at }
    }
}

//--------------------------------------    MatchCandidate    ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub request: DepositRequest,
    /// True if some processed payment already references this request.
    pub has_processed_payment: bool,
}

impl MatchCandidate {
    pub fn new(request: DepositRequest, has_processed_payment: bool) -> Self {
        Self { request, has_processed_payment }
    }
}
