//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interactions are simple functions (rather than stateful structs) that accept a `&mut SqliteConnection`
//! argument. Callers can obtain a connection from a pool, or open an [`ImmediateTransaction`] when a check-then-act
//! sequence must be atomic, and call through to the functions without any other changes.
use std::env;

use log::*;
use sqlx::{
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    Sqlite,
    SqliteConnection,
    SqlitePool,
};

use crate::traits::LedgerError;

pub mod payments;
pub mod requests;

const SQLITE_DB_URL: &str = "sqlite://data/deposit_ledger.db";

pub fn db_url() -> String {
    let result = env::var("DRE_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ DRE_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options =
        url.parse::<SqliteConnectOptions>()?.create_if_missing(true).journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

/// A `BEGIN IMMEDIATE` transaction on a pooled connection.
///
/// SQLite's default deferred transactions take the write lock lazily, so two check-then-act transactions can both
/// read and then fail to upgrade. Taking the write lock up front serializes them instead, and the busy timeout makes
/// the loser wait its turn.
///
/// If the transaction is dropped before [`commit`](Self::commit) or [`rollback`](Self::rollback) completes (e.g. the
/// caller's future was cancelled), the connection is detached from the pool and closed, which rolls back the
/// transaction, rather than being returned to the pool mid-transaction.
pub struct ImmediateTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTransaction {
    pub async fn begin(pool: &SqlitePool) -> Result<Self, LedgerError> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    pub fn conn(&mut self) -> Result<&mut SqliteConnection, LedgerError> {
        self.conn.as_deref_mut().ok_or_else(|| LedgerError::DatabaseError("Transaction has already finished".into()))
    }

    pub async fn commit(mut self) -> Result<(), LedgerError> {
        sqlx::query("COMMIT").execute(self.conn()?).await?;
        // Only hand the connection back to the pool once the transaction is closed
        self.conn.take();
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), LedgerError> {
        sqlx::query("ROLLBACK").execute(self.conn()?).await?;
        self.conn.take();
        Ok(())
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("🗃️ A transaction was abandoned before it finished. Closing its connection.");
            drop(conn.detach());
        }
    }
}
