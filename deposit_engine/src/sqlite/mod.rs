//! SQLite backend for the deposit ledger.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
