//! HTTP client for the casino cash-desk API that credits player accounts.
//!
//! The cash desk answers `{"success": bool, "message": "..."}`. Failure messages are free text in whatever language
//! the platform speaks, so every failure is classified into a [`GatewayErrorKind`] here, on its way in.
use std::{sync::Arc, time::Duration};

use deposit_engine::traits::{CreditInstruction, CreditReceipt, GatewayError, GatewayErrorKind, SettlementGateway};
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    StatusCode,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CasinoConfig;

#[derive(Debug, Error)]
pub enum CasinoApiError {
    #[error("Could not initialize the casino API client. {0}")]
    Initialization(String),
    #[error("Could not reach the casino API. {0}")]
    Transport(#[from] reqwest::Error),
    #[error("The casino API returned HTTP {status}. {message}")]
    HttpStatus { status: u16, message: String },
    #[error("The casino API rejected the deposit. {0}")]
    Rejected(String),
    #[error("The casino API sent a response that could not be understood. {0}")]
    InvalidResponse(String),
}

impl From<CasinoApiError> for GatewayError {
    fn from(e: CasinoApiError) -> Self {
        match e {
            CasinoApiError::Transport(e) if e.is_timeout() => GatewayError::new(GatewayErrorKind::Timeout, e.to_string()),
            CasinoApiError::Transport(e) if e.is_connect() => {
                GatewayError::new(GatewayErrorKind::Transient, e.to_string())
            },
            CasinoApiError::HttpStatus { status, message } => {
                // The body is more specific than the status code, e.g. a 400 saying the deposit was already done
                let by_message = GatewayErrorKind::classify(&message);
                let kind = match (status, by_message) {
                    (_, GatewayErrorKind::AlreadyApplied | GatewayErrorKind::RateLimited) => by_message,
                    (429, _) => GatewayErrorKind::RateLimited,
                    (500..=599, _) => GatewayErrorKind::Transient,
                    _ => by_message,
                };
                GatewayError::new(kind, format!("HTTP {status}: {message}"))
            },
            CasinoApiError::Rejected(message) => GatewayError::from_message(message),
            e => GatewayError::from_message(e.to_string()),
        }
    }
}

/// The body posted to `{base_url}/deposit`.
#[derive(Debug, Clone, Serialize)]
struct DepositCall<'a> {
    platform: &'a str,
    account_id: &'a str,
    /// Decimal string, e.g. "500.00"
    amount: String,
    correlation_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct DepositReply {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct CasinoGatewayClient {
    base_url: String,
    client: Arc<Client>,
}

impl CasinoGatewayClient {
    /// `timeout` bounds the HTTP exchange. The settlement flow applies its own bound on top of it.
    pub fn new(config: &CasinoConfig, timeout: Duration) -> Result<Self, CasinoApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        let val = HeaderValue::from_str(config.api_key.reveal().as_str())
            .map_err(|e| CasinoApiError::Initialization(e.to_string()))?;
        headers.insert("X-Api-Key", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| CasinoApiError::Initialization(e.to_string()))?;
        Ok(Self { base_url: config.base_url.clone(), client: Arc::new(client) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn deposit(&self, instruction: &CreditInstruction) -> Result<CreditReceipt, CasinoApiError> {
        let body = DepositCall {
            platform: &instruction.platform,
            account_id: &instruction.account_id,
            amount: instruction.amount.to_string(),
            correlation_id: &instruction.correlation_id,
        };
        trace!("🎰️ Crediting {} on {} ({})", body.amount, body.platform, body.correlation_id);
        let response = self.client.post(self.url("deposit")).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        interpret_reply(status, &text)
    }
}

/// Turns the cash desk's HTTP reply into a receipt or an error.
fn interpret_reply(status: StatusCode, body: &str) -> Result<CreditReceipt, CasinoApiError> {
    if !status.is_success() {
        return Err(CasinoApiError::HttpStatus { status: status.as_u16(), message: body.trim().to_string() });
    }
    let reply = serde_json::from_str::<DepositReply>(body).map_err(|e| {
        // Non-JSON bodies still carry the reason, so keep it for classification
        debug!("🎰️ Could not parse the casino reply. {e}");
        CasinoApiError::InvalidResponse(body.trim().to_string())
    })?;
    if reply.success {
        Ok(CreditReceipt { message: reply.message })
    } else {
        Err(CasinoApiError::Rejected(reply.message.unwrap_or_else(|| "No reason given".to_string())))
    }
}

impl SettlementGateway for CasinoGatewayClient {
    async fn credit(&self, instruction: CreditInstruction) -> Result<CreditReceipt, GatewayError> {
        match self.deposit(&instruction).await {
            Ok(receipt) => {
                debug!("🎰️ Casino accepted {}. {:?}", instruction.correlation_id, receipt.message);
                Ok(receipt)
            },
            Err(e) => {
                warn!("🎰️ Casino call for {} failed. {e}", instruction.correlation_id);
                Err(e.into())
            },
        }
    }
}
