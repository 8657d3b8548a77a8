//! Sharded relational source
//!
//! [`ShardedExtractor`] connects to every shard listed in the configuration
//! and, on extraction, runs one task per (shard × table). All tasks feed a
//! single bounded record stream, which is where back-pressure applies.
//!
//! The database client is a collaborator behind [`ShardConnector`] and
//! [`ShardClient`]; [`PgConnector`] is the Postgres implementation.

mod extractor;
mod postgres;
mod query;

pub use extractor::ShardedExtractor;
pub use postgres::{PgConnector, PgShard};
pub use query::build_query;

use crate::Row;
use crate::config::{Endpoint, SourceConfig};
use eyre::Result;
use futures::stream::BoxStream;

/// One item produced while scanning a result set
#[derive(Debug)]
pub enum Scan {
    /// A decoded row
    Row(Row),
    /// This row could not be decoded; scanning continues
    Invalid(eyre::Report),
}

/// A connection pool to one shard
pub trait ShardClient: Send + Sync + 'static {
    /// Run a liveness check
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    /// Stream the rows of `query`
    ///
    /// An `Err` item is a query or connection failure and ends the scan.
    fn scan<'a>(&'a self, query: &'a str) -> BoxStream<'a, Result<Scan>>;

    /// Release the pool
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens shard clients
pub trait ShardConnector: Send + Sync {
    type Client: ShardClient;

    /// Create a client for `endpoint`
    ///
    /// Liveness is checked separately through [`ShardClient::ping`].
    fn connect(
        &self,
        endpoint: &Endpoint,
        source: &SourceConfig,
    ) -> impl Future<Output = Result<Self::Client>> + Send;
}
