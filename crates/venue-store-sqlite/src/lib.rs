//! SQLite backend for the venue booking store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every reservation mutation is one
//! `BEGIN IMMEDIATE` transaction, which makes check-then-insert on the
//! capacity ledger atomic even across processes sharing the file.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
