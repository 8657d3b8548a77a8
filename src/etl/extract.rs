//! Extractor trait for pulling records out of a source

use super::{ErrorStream, RecordStream};
use crate::config::PipelineConfig;
use eyre::Result;
use tokio_util::sync::CancellationToken;

/// Extractor trait for streaming records out of a source
///
/// An extractor typically reads from many shards or tables at once. It runs
/// one task per unit of work and merges their output into a single bounded
/// record stream, reporting faults on a separate error stream.
///
/// # Lifecycle
/// `init` → `extract` → `close`, once per attempt. `close` is called even if
/// `init` failed or `extract` never ran, so it must tolerate a partially
/// initialized extractor.
///
/// # Example
/// ```no_run
/// use shardflow::config::PipelineConfig;
/// use shardflow::etl::{ErrorStream, Extractor, RecordStream, closed_error_stream, record_channel};
/// use eyre::Result;
/// use tokio_util::sync::CancellationToken;
///
/// struct Numbers(Vec<i64>);
///
/// impl Extractor for Numbers {
///     type Item = i64;
///
///     async fn init(&mut self, _config: &PipelineConfig) -> Result<()> {
///         Ok(())
///     }
///
///     fn extract(&mut self, _cancel: CancellationToken) -> (RecordStream<i64>, ErrorStream) {
///         let (tx, rx) = record_channel(16);
///         let items = self.0.clone();
///         tokio::spawn(async move {
///             for n in items {
///                 if tx.send(n).await.is_err() {
///                     break;
///                 }
///             }
///         });
///         (rx, closed_error_stream())
///     }
///
///     async fn close(&mut self) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait Extractor: Send {
    /// The type of records extracted
    type Item: Send + 'static;

    /// Open connections to the source
    ///
    /// # Errors
    /// Returns an error if any part of the source cannot be reached
    fn init(&mut self, config: &PipelineConfig) -> impl Future<Output = Result<()>> + Send;

    /// Start extraction in the background
    ///
    /// Both streams close once every extraction task has finished. All tasks
    /// must stop promptly once `cancel` fires.
    fn extract(&mut self, cancel: CancellationToken) -> (RecordStream<Self::Item>, ErrorStream);

    /// Release every connection, reporting all failures together
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
