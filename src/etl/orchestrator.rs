//! Pipeline orchestration: one extractor, one transformer, one loader, retried

use super::stream::{ErrorStream, StreamError};
use super::{
    CancelReason, Extractor, Loader, PipelineError, RetryPolicy, Stage, StageError, Transformer,
};
use crate::config::PipelineConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where the orchestrator is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Initializing,
    Running,
    BackingOff,
    Succeeded,
    Failed,
}

/// Summary of a successful run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Records the loader persisted
    pub loaded: u64,
    /// Records the loader failed to persist
    pub failed: u64,
    /// Records skipped upstream because of row faults
    pub rejected: u64,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} loaded, {} failed, {} rejected in {} attempt(s)",
            self.loaded, self.failed, self.rejected, self.attempts
        )
    }
}

/// Orchestrates an extract → transform → load run with retries
///
/// # Type Parameters
/// - `E`: Extractor type
/// - `T`: Transformer type (must transform from E::Item)
/// - `L`: Loader type (must load T::Output)
///
/// # Example
/// ```no_run
/// use shardflow::config::PipelineConfig;
/// use shardflow::etl::{Orchestrator, Passthrough};
/// use shardflow::sink::{PostgresSink, UpsertLoader};
/// use shardflow::source::ShardedExtractor;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> eyre::Result<()> {
/// let config = PipelineConfig::from_file("config.yaml")?;
/// let mut orchestrator = Orchestrator::new(
///     config,
///     ShardedExtractor::new(),
///     Passthrough::new(),
///     UpsertLoader::new(PostgresSink::new()),
/// )?;
///
/// let report = orchestrator.execute(&CancellationToken::new()).await?;
/// println!("{}", report);
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator<E, T, L> {
    config: PipelineConfig,
    policy: RetryPolicy,
    state: RunState,
    extractor: E,
    transformer: T,
    loader: L,
}

impl<E, T, L> Orchestrator<E, T, L>
where
    E: Extractor,
    T: Transformer<Input = E::Item>,
    L: Loader<Item = T::Output>,
{
    /// Create a new orchestrator
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] if the configuration is invalid
    pub fn new(
        config: PipelineConfig,
        extractor: E,
        transformer: T,
        loader: L,
    ) -> Result<Self, PipelineError> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(format!("{:#}", e)))?;
        let policy = RetryPolicy::from(&config.pipeline);

        Ok(Self {
            config,
            policy,
            state: RunState::Idle,
            extractor,
            transformer,
            loader,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn transformer(&self) -> &T {
        &self.transformer
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Run the pipeline, retrying failed attempts per the retry policy
    ///
    /// Each attempt initializes all three components, streams records from
    /// the extractor through the transformer into the loader, and closes all
    /// three again. The attempt ends on the first fatal fault from any stage.
    ///
    /// # Errors
    /// - [`PipelineError::Cancelled`] if `cancel` fires or the configured
    ///   timeout elapses, including while waiting to retry
    /// - [`PipelineError::Exhausted`] once every attempt has failed
    pub async fn execute(&mut self, cancel: &CancellationToken) -> Result<RunReport, PipelineError> {
        let name = self.config.pipeline.name.clone();
        // A timeout too large to represent means no deadline
        let deadline = self
            .config
            .pipeline
            .timeout
            .and_then(|t| Instant::now().checked_add(t));
        let retries = self.policy.retries;
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        log::info!("Starting pipeline '{}'", name);

        loop {
            attempt += 1;
            log::debug!("Pipeline '{}' attempt {}/{}", name, attempt, max_attempts);

            let err = match self.run_attempt(cancel, deadline).await {
                Ok(mut report) => {
                    report.attempts = attempt;
                    self.state = RunState::Succeeded;
                    log::info!("Pipeline '{}' succeeded: {}", name, report);
                    return Ok(report);
                }
                Err(err) => err,
            };

            self.state = RunState::Failed;
            if !err.is_retryable() {
                log::error!("Pipeline '{}' stopped: {}", name, err);
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(PipelineError::Exhausted {
                    attempts: attempt,
                    retries,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(attempt);
            log::warn!(
                "Retry attempt {}/{} in {:?} after error: {}",
                attempt,
                retries,
                delay,
                err
            );
            self.state = RunState::BackingOff;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(CancelReason::Stopped)),
                _ = deadline_elapsed(deadline) => return Err(self.cancelled(CancelReason::TimedOut)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn cancelled(&mut self, reason: CancelReason) -> PipelineError {
        self.state = RunState::Failed;
        PipelineError::Cancelled(reason)
    }

    /// One Init → Run → Close cycle
    async fn run_attempt(
        &mut self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<RunReport, PipelineError> {
        let attempt_cancel = cancel.child_token();

        self.state = RunState::Initializing;
        let outcome = match self.init_components(&attempt_cancel, deadline).await {
            Ok(()) => {
                self.state = RunState::Running;
                self.run_stages(&attempt_cancel, deadline).await
            }
            Err(e) => Err(e),
        };

        // Unwind whatever is still running before releasing connections
        attempt_cancel.cancel();
        self.close_components().await;

        outcome
    }

    async fn init_components(
        &mut self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<(), PipelineError> {
        let init = async {
            self.extractor
                .init(&self.config)
                .await
                .map_err(|cause| PipelineError::Init {
                    stage: Stage::Extract,
                    cause,
                })?;
            self.transformer
                .init(&self.config)
                .await
                .map_err(|cause| PipelineError::Init {
                    stage: Stage::Transform,
                    cause,
                })?;
            self.loader
                .init(&self.config)
                .await
                .map_err(|cause| PipelineError::Init {
                    stage: Stage::Load,
                    cause,
                })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled(CancelReason::Stopped)),
            _ = deadline_elapsed(deadline) => Err(PipelineError::Cancelled(CancelReason::TimedOut)),
            result = init => result,
        }
    }

    async fn run_stages(
        &mut self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<RunReport, PipelineError> {
        let abort_on_row_error = self.config.pipeline.abort_on_row_error;
        let mut rejected = 0u64;

        let (records, extract_errors) = self.extractor.extract(cancel.clone());
        let (transformed, transform_errors) = self.transformer.transform(cancel.clone(), records);
        let mut extract_errors = Some(extract_errors);
        let mut transform_errors = Some(transform_errors);

        {
            let load = self.loader.load(cancel.clone(), transformed);
            tokio::pin!(load);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled(CancelReason::Stopped)),
                    _ = deadline_elapsed(deadline) => return Err(PipelineError::Cancelled(CancelReason::TimedOut)),
                    fault = next_fault(&mut extract_errors) => if let Some(fault) = fault {
                        absorb(Stage::Extract, fault, abort_on_row_error, &mut rejected)?;
                    },
                    fault = next_fault(&mut transform_errors) => if let Some(fault) = fault {
                        absorb(Stage::Transform, fault, abort_on_row_error, &mut rejected)?;
                    },
                    result = &mut load => {
                        result.map_err(|e| PipelineError::Stage(StageError::fatal(Stage::Load, e)))?;
                        // Loaders return early, without error, when cancelled
                        if cancel.is_cancelled() {
                            return Err(PipelineError::Cancelled(CancelReason::Stopped));
                        }
                        break;
                    }
                }
            }
        }

        // The loader saw the end of its input, so upstream is finishing too.
        // Faults still queued upstream must not be mistaken for success.
        while extract_errors.is_some() || transform_errors.is_some() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled(CancelReason::Stopped)),
                _ = deadline_elapsed(deadline) => return Err(PipelineError::Cancelled(CancelReason::TimedOut)),
                fault = next_fault(&mut extract_errors) => if let Some(fault) = fault {
                    absorb(Stage::Extract, fault, abort_on_row_error, &mut rejected)?;
                },
                fault = next_fault(&mut transform_errors) => if let Some(fault) = fault {
                    absorb(Stage::Transform, fault, abort_on_row_error, &mut rejected)?;
                },
            }
        }

        let stats = self.loader.stats();
        Ok(RunReport {
            attempts: 0,
            loaded: stats.loaded,
            failed: stats.failed,
            rejected,
        })
    }

    async fn close_components(&mut self) {
        if let Err(e) = self.extractor.close().await {
            log::error!("Error closing extractor: {:#}", e);
        }
        if let Err(e) = self.transformer.close().await {
            log::error!("Error closing transformer: {:#}", e);
        }
        if let Err(e) = self.loader.close().await {
            log::error!("Error closing loader: {:#}", e);
        }
    }
}

/// Next fault from an error stream; pends forever once the stream is closed
async fn next_fault(stream: &mut Option<ErrorStream>) -> Option<StreamError> {
    let Some(rx) = stream else {
        return std::future::pending().await;
    };
    let fault = rx.recv().await;
    if fault.is_none() {
        *stream = None;
    }
    fault
}

/// Count a tolerated row fault, or turn the fault into the attempt's error
fn absorb(
    stage: Stage,
    fault: StreamError,
    abort_on_row_error: bool,
    rejected: &mut u64,
) -> Result<(), PipelineError> {
    if fault.is_fatal() || abort_on_row_error {
        return Err(StageError::new(stage, fault).into());
    }
    *rejected += 1;
    log::warn!("Skipped record during {}: {:#}", stage, fault.into_report());
    Ok(())
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
