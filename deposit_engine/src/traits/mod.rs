//! # Collaborator contracts.
//!
//! The settlement engine talks to the outside world exclusively through the traits in this module.
//!
//! * [`LedgerStore`] is the persistent store of deposit requests and incoming payments. It is the only shared
//!   mutable state the engine relies on, and all mutual exclusion is built from its conditional updates.
//! * [`SettlementGateway`] credits a player's account on an external platform.
//! * [`CommissionAccounting`] and [`NotificationDispatcher`] are told about settlements after the fact.
mod collaborators;
mod data_objects;
mod ledger_store;
mod settlement_gateway;

pub use collaborators::{CommissionAccounting, CommissionError, NotificationDispatcher, NotificationError};
pub use data_objects::{CommitOutcome, FailureRecord, GatewayFailure, PreflightOutcome};
pub use ledger_store::{LedgerError, LedgerStore};
pub use settlement_gateway::{
    CreditInstruction,
    CreditReceipt,
    GatewayError,
    GatewayErrorKind,
    SettlementGateway,
    MAX_ERROR_DETAIL_CHARS,
};
