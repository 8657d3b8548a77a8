//! Upsert sink
//!
//! [`UpsertLoader`] drives a [`Sink`] one record at a time and keeps the
//! loaded/failed counters. [`PostgresSink`] upserts rows into a Postgres
//! table keyed by the configured conflict keys, so replaying the same rows
//! after a retry leaves the table unchanged.

mod loader;
mod postgres;
mod routes;

pub use loader::UpsertLoader;
pub use postgres::{PostgresSink, upsert_statement};
pub use routes::TableRoutes;

use crate::Row;
use crate::config::SinkConfig;
use eyre::Result;
use thiserror::Error;

/// Why a single write did not go through
#[derive(Debug, Error)]
pub enum WriteError {
    /// This row was rejected (constraint, type mismatch, missing key); the
    /// connection is still usable
    #[error("row rejected: {0:#}")]
    Row(eyre::Report),
    /// The connection is gone; no further rows can be written
    #[error("connection lost: {0:#}")]
    Connection(eyre::Report),
}

impl WriteError {
    pub fn is_connection(&self) -> bool {
        matches!(self, WriteError::Connection(_))
    }
}

/// A destination that stores rows idempotently
pub trait Sink: Send + Sync {
    /// Connect to the destination and verify it is reachable
    fn open(&mut self, config: &SinkConfig) -> impl Future<Output = Result<()>> + Send;

    /// Insert `row` into `table`, or update the existing row with the same
    /// conflict keys
    fn upsert(&self, table: &str, row: &Row)
    -> impl Future<Output = Result<(), WriteError>> + Send;

    /// Release the connection; a no-op when not open
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
