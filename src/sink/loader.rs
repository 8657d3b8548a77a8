//! Loader writing every record through a [`Sink`]

use super::{Sink, TableRoutes, WriteError};
use crate::Row;
use crate::config::PipelineConfig;
use crate::etl::{LoadStats, Loader, RecordStream, recv_or_cancel};
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;

const PROGRESS_EVERY: u64 = 100;

/// Upserts each record and counts the outcome
///
/// Row policy: a rejected row is counted as failed and loading continues,
/// unless `abort_on_row_error` is set. A lost connection always ends the load
/// with an error so the orchestrator can retry the attempt.
pub struct UpsertLoader<S> {
    sink: S,
    routes: TableRoutes,
    stats: LoadStats,
    abort_on_row_error: bool,
}

impl<S: Sink> UpsertLoader<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            routes: TableRoutes::default(),
            stats: LoadStats::default(),
            abort_on_row_error: false,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: Sink> Loader for UpsertLoader<S> {
    type Item = Row;

    async fn init(&mut self, config: &PipelineConfig) -> Result<()> {
        self.stats = LoadStats::default();
        self.abort_on_row_error = config.pipeline.abort_on_row_error;
        self.routes = TableRoutes::new(config);
        self.sink
            .open(&config.sink)
            .await
            .with_context(|| format!("Failed to open sink table {}", config.sink.table))
    }

    async fn load(&mut self, cancel: CancellationToken, mut input: RecordStream<Row>) -> Result<()> {
        while let Some(row) = recv_or_cancel(&mut input, &cancel).await {
            let written = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                written = self.sink.upsert(self.routes.resolve(&row), &row) => written,
            };

            match written {
                Ok(()) => {
                    self.stats.loaded += 1;
                    if self.stats.loaded % PROGRESS_EVERY == 0 {
                        log::info!("Loaded {} record(s)", self.stats.loaded);
                    }
                }
                Err(WriteError::Row(e)) => {
                    self.stats.failed += 1;
                    if self.abort_on_row_error {
                        return Err(e.wrap_err("Aborting load on row error"));
                    }
                    log::warn!("Failed to load record: {:#}", e);
                }
                Err(WriteError::Connection(e)) => {
                    self.stats.failed += 1;
                    return Err(e);
                }
            }
        }

        if cancel.is_cancelled() {
            log::debug!("Load cancelled after {}", self.stats);
        }
        Ok(())
    }

    fn stats(&self) -> LoadStats {
        self.stats
    }

    async fn close(&mut self) -> Result<()> {
        log::info!("Load finished: {}", self.stats);
        self.sink.close().await
    }
}
