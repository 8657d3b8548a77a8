//! Transformer traits for reshaping records between extraction and loading

use super::stream::{self, ErrorStream, RecordStream, StreamError};
use crate::config::PipelineConfig;
use eyre::Result;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Stream-level transformer sitting between an extractor and a loader
///
/// Consumes the extractor's record stream lazily and produces its own record
/// stream plus an error stream. Most transformations are per-record and are
/// easier to write as a [`RecordTransformer`] wrapped in [`MapTransformer`].
pub trait Transformer: Send {
    /// Input record type
    type Input: Send + 'static;

    /// Output record type after transformation
    type Output: Send + 'static;

    /// Prepare the transformer for an attempt
    fn init(&mut self, _config: &PipelineConfig) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Start transforming `input` in the background
    fn transform(
        &mut self,
        cancel: CancellationToken,
        input: RecordStream<Self::Input>,
    ) -> (RecordStream<Self::Output>, ErrorStream);

    /// Release whatever `init` acquired
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Per-record transformation
///
/// Implementors define how to transform one record:
/// - Data cleaning (removing fields)
/// - Data enrichment (adding fields)
/// - Validation
///
/// Returning an error rejects the record. The rejection is reported as a row
/// fault and the stream continues with the next record.
///
/// # Example
/// ```
/// use shardflow::etl::RecordTransformer;
/// use eyre::Result;
///
/// struct Double;
///
/// impl RecordTransformer for Double {
///     type Input = i64;
///     type Output = i64;
///
///     fn apply(&self, input: i64) -> Result<i64> {
///         Ok(input * 2)
///     }
/// }
///
/// assert_eq!(Double.apply(21).unwrap(), 42);
/// ```
pub trait RecordTransformer: Send + Sync + 'static {
    /// Input record type
    type Input: Send + 'static;

    /// Output record type
    type Output: Send + 'static;

    /// Transform a single record
    ///
    /// # Errors
    /// Returns an error if the record cannot be transformed
    fn apply(&self, input: Self::Input) -> Result<Self::Output>;
}

/// Transformer that passes records through unchanged
///
/// The input stream is handed to the loader as-is and the error stream is
/// closed from the start.
pub struct Passthrough<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for Passthrough<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Passthrough<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Send + 'static> Transformer for Passthrough<T> {
    type Input = T;
    type Output = T;

    fn transform(
        &mut self,
        _cancel: CancellationToken,
        input: RecordStream<T>,
    ) -> (RecordStream<T>, ErrorStream) {
        (input, stream::closed_error_stream())
    }
}

/// Adapts a [`RecordTransformer`] into a stream stage
///
/// Spawns one task that pulls from the input, applies the record
/// transformer, and forwards results over a bounded channel.
pub struct MapTransformer<R> {
    inner: Arc<R>,
    capacity: usize,
}

impl<R: RecordTransformer> MapTransformer<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Arc::new(inner),
            capacity: crate::config::DEFAULT_BUFFER_SIZE,
        }
    }

    /// The wrapped record transformer
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: RecordTransformer> Transformer for MapTransformer<R> {
    type Input = R::Input;
    type Output = R::Output;

    fn init(&mut self, config: &PipelineConfig) -> impl Future<Output = Result<()>> + Send {
        self.capacity = config.pipeline.buffer_size;
        async { Ok(()) }
    }

    fn transform(
        &mut self,
        cancel: CancellationToken,
        mut input: RecordStream<R::Input>,
    ) -> (RecordStream<R::Output>, ErrorStream) {
        let (tx, rx) = stream::record_channel(self.capacity);
        let (err_tx, err_rx) = stream::error_channel();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let mut rejected = 0usize;
            while let Some(record) = stream::recv_or_cancel(&mut input, &cancel).await {
                let sent = match inner.apply(record) {
                    Ok(output) => stream::send_or_cancel(&tx, output, &cancel).await,
                    Err(e) => {
                        rejected += 1;
                        stream::send_or_cancel(&err_tx, StreamError::Row(e), &cancel).await
                    }
                };
                if sent.is_err() {
                    break;
                }
            }
            if rejected > 0 {
                log::debug!("Transformer rejected {} record(s)", rejected);
            }
        });

        (rx, err_rx)
    }
}
