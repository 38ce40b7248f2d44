//! Deposit Reconciliation Engine
//!
//! The engine matches incoming bank payments to pending deposit requests, and settles each match exactly once: the
//! player's account on the target platform is credited through a [`traits::SettlementGateway`], and both ledger rows
//! are moved to their final state together.
//!
//! The library is divided into these sections:
//! 1. The ledger ([`traits::LedgerStore`] and its SQLite backend, [`SqliteDatabase`]). All mutual exclusion is built
//!    from conditional updates and serializable transactions on the ledger, so any number of processes can run the
//!    engine against the same database. The data types stored in the ledger live in [`db_types`].
//! 2. The pure parts of the flow: the [`matcher`] and the [`clock`].
//! 3. The [`lock_coordinator`], which turns a row's `updated_at` column into a lease.
//! 4. The public API ([`settlement_api`]), which drives the whole flow and resolves ambiguous gateway failures.
//!
//! Side effects of a settlement (commission accounting, user notifications) are delivered through the [`events`]
//! module, so that they can never hold up or undo the settlement itself.
pub mod clock;
pub mod db_types;
pub mod events;
pub mod lock_coordinator;
pub mod matcher;
pub mod notifications;
pub mod settlement_api;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use settlement_api::{
    BatchSummary,
    ReconciliationVerifier,
    SettlementConfig,
    SettlementError,
    SettlementFlowApi,
    SettlementOutcome,
    SettlementReport,
    SkipReason,
    Verification,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
