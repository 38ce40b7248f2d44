//! # Settlement engine public API
//!
//! * [`settlement_flow_api`] drives a payment from "just ingested" to "settled", or to one of the regular
//!   non-settlement outcomes (no match yet, already handled, left for an operator).
//! * [`verifier`] resolves gateway failures that may have been successes in disguise.
//!
//! The pattern is the same as for every other API in this crate: build an instance from a store backend and the
//! collaborators it needs, then call it from whatever triggers settlement.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use deposit_engine::{clock::SystemClock, events::EventProducers, SettlementConfig, SettlementFlowApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let api = SettlementFlowApi::new(db, my_gateway, Arc::new(SystemClock), SettlementConfig::default(), EventProducers::default());
//! let outcome = api.process_payment(payment_id).await?;
//! ```

pub mod config;
pub mod errors;
pub mod settlement_flow_api;
pub mod settlement_objects;
pub mod verifier;

pub use config::SettlementConfig;
pub use errors::SettlementError;
pub use settlement_flow_api::SettlementFlowApi;
pub use settlement_objects::{BatchSummary, SettlementOutcome, SettlementReport, SkipReason};
pub use verifier::{ReconciliationVerifier, Verification};
