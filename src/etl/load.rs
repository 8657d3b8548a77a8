//! Loader trait for persisting records to a destination

use super::RecordStream;
use crate::config::PipelineConfig;
use eyre::Result;
use tokio_util::sync::CancellationToken;

/// Counters kept by a loader for one attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Records persisted successfully
    pub loaded: u64,
    /// Records that failed to persist
    pub failed: u64,
}

impl LoadStats {
    /// Every record the loader has seen
    pub fn total(&self) -> u64 {
        self.loaded + self.failed
    }
}

impl std::fmt::Display for LoadStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} loaded, {} failed", self.loaded, self.failed)
    }
}

/// Loader trait for persisting records to a destination
///
/// The loader consumes its input stream from a single future, so the
/// counters behind [`Loader::stats`] only ever have one writer.
///
/// # Example
/// ```no_run
/// use shardflow::config::PipelineConfig;
/// use shardflow::etl::{LoadStats, Loader, RecordStream};
/// use eyre::Result;
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(Default)]
/// struct Summer {
///     sum: i64,
///     stats: LoadStats,
/// }
///
/// impl Loader for Summer {
///     type Item = i64;
///
///     async fn init(&mut self, _config: &PipelineConfig) -> Result<()> {
///         *self = Self::default();
///         Ok(())
///     }
///
///     async fn load(&mut self, _cancel: CancellationToken, mut input: RecordStream<i64>) -> Result<()> {
///         while let Some(n) = input.recv().await {
///             self.sum += n;
///             self.stats.loaded += 1;
///         }
///         Ok(())
///     }
///
///     fn stats(&self) -> LoadStats {
///         self.stats
///     }
///
///     async fn close(&mut self) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait Loader: Send {
    /// The type of records to load
    type Item: Send + 'static;

    /// Open the sink connection and reset the counters
    fn init(&mut self, config: &PipelineConfig) -> impl Future<Output = Result<()>> + Send;

    /// Persist every record from `input`
    ///
    /// Returns once the input closes, `cancel` fires, or a fatal error occurs.
    ///
    /// # Errors
    /// Returns an error if loading cannot continue (lost connection, or a row
    /// failure when the loader is configured to abort on row errors)
    fn load(
        &mut self,
        cancel: CancellationToken,
        input: RecordStream<Self::Item>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Counters for the current attempt
    fn stats(&self) -> LoadStats;

    /// Report the counters and release the sink connection
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
