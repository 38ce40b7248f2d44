use std::{fmt::Display, future::Future, str::FromStr};

use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::db_types::Amount;

/// Gateway error details are stored on the request, truncated to this many characters.
pub const MAX_ERROR_DETAIL_CHARS: usize = 50;

//--------------------------------------   CreditInstruction   -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditInstruction {
    pub platform: String,
    pub account_id: String,
    pub amount: Amount,
    /// Derived from the deposit request id, so that a gateway that honours idempotency keys can reject a repeat.
    pub correlation_id: String,
}

impl CreditInstruction {
    pub fn new(platform: &str, account_id: &str, amount: Amount, request_id: i64) -> Self {
        Self {
            platform: platform.to_string(),
            account_id: account_id.to_string(),
            amount,
            correlation_id: format!("deposit-{request_id}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReceipt {
    pub message: Option<String>,
}

//--------------------------------------   GatewayErrorKind    -------------------------------------------------------
/// A closed classification of settlement gateway failures.
///
/// Gateways report failures as free text (often localised). The text is classified exactly once, where the gateway
/// response enters the system, and the engine only ever reasons about the kind from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    /// The gateway says the operation was already performed.
    AlreadyApplied,
    /// The gateway throttled the call. It may have been throttled *after* applying the credit.
    RateLimited,
    /// A transport or server-side fault. The credit was not applied as far as anyone can tell.
    Transient,
    /// The call did not complete within the configured timeout.
    Timeout,
    /// Anything else, e.g. unknown account or insufficient funds on the cashier side.
    Permanent,
}

static ALREADY_APPLIED: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([r"(?i)already\s+(been\s+)?(processed|applied|done|credited)", r"(?i)уже\s+был", r"(?i)duplicate"])
        .unwrap_or_else(|_| RegexSet::empty())
});

static RATE_LIMITED: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)too\s+many\s+requests",
        r"(?i)слишком\s+много\s+запросов",
        r"(?i)try\s+again\s+later",
        r"(?i)попробуйте\s+позже",
        r"(?i)rate\s*limit",
        r"\b429\b",
    ])
    .unwrap_or_else(|_| RegexSet::empty())
});

static TIMEOUT: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([r"(?i)timed?\s*out", r"(?i)timeout", r"(?i)тайм-?аут"]).unwrap_or_else(|_| RegexSet::empty())
});

static TRANSIENT: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)connection\s+(refused|reset|closed)",
        r"(?i)service\s+unavailable",
        r"(?i)bad\s+gateway",
        r"(?i)internal\s+server\s+error",
        r"\b50[0234]\b",
    ])
    .unwrap_or_else(|_| RegexSet::empty())
});

impl GatewayErrorKind {
    /// Map a free-text gateway message to a kind. More specific classes win over less specific ones.
    pub fn classify(message: &str) -> Self {
        if ALREADY_APPLIED.is_match(message) {
            GatewayErrorKind::AlreadyApplied
        } else if RATE_LIMITED.is_match(message) {
            GatewayErrorKind::RateLimited
        } else if TIMEOUT.is_match(message) {
            GatewayErrorKind::Timeout
        } else if TRANSIENT.is_match(message) {
            GatewayErrorKind::Transient
        } else {
            GatewayErrorKind::Permanent
        }
    }

    /// True when the failure does not rule out that the credit was actually applied.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, GatewayErrorKind::AlreadyApplied | GatewayErrorKind::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayErrorKind::AlreadyApplied => "already_applied",
            GatewayErrorKind::RateLimited => "rate_limited",
            GatewayErrorKind::Transient => "transient",
            GatewayErrorKind::Timeout => "timeout",
            GatewayErrorKind::Permanent => "permanent",
        }
    }
}

impl Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "already_applied" => Ok(Self::AlreadyApplied),
            "rate_limited" => Ok(Self::RateLimited),
            "transient" => Ok(Self::Transient),
            "timeout" => Ok(Self::Timeout),
            "permanent" => Ok(Self::Permanent),
            s => Err(format!("Invalid gateway error kind: {s}")),
        }
    }
}

//--------------------------------------      GatewayError      -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Settlement gateway error ({kind}): {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new<S: Into<String>>(kind: GatewayErrorKind, message: S) -> Self {
        Self { kind, message: message.into() }
    }

    /// Build an error from a free-text gateway message, classifying it on the way in.
    pub fn from_message<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        let kind = GatewayErrorKind::classify(&message);
        Self { kind, message }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(GatewayErrorKind::Timeout, format!("Gateway call timed out after {}s", after.as_secs_f32()))
    }

    /// The message as it is persisted on the request.
    pub fn detail(&self) -> String {
        deposit_common::helpers::truncate_chars(&self.message, MAX_ERROR_DETAIL_CHARS)
    }
}

//--------------------------------------   SettlementGateway    -------------------------------------------------------
/// The external service that moves funds into a player's account on a platform.
///
/// Implementations should classify their failures with [`GatewayError::from_message`] (or pick a kind directly when
/// the transport tells them more, e.g. a timeout). The engine does not assume that the gateway honours the
/// correlation id.
pub trait SettlementGateway: Send + Sync {
    fn credit(
        &self,
        instruction: CreditInstruction,
    ) -> impl Future<Output = Result<CreditReceipt, GatewayError>> + Send;
}
