//! Errors surfaced by the orchestrator

use super::StreamError;
use thiserror::Error;

/// The pipeline stage an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Extract => write!(f, "extraction"),
            Stage::Transform => write!(f, "transformation"),
            Stage::Load => write!(f, "loading"),
        }
    }
}

/// A fault tagged with the stage that produced it
///
/// The cause is carried as an opaque report; the orchestrator only surfaces it.
#[derive(Debug, Error)]
#[error("{stage} error: {cause:#}")]
pub struct StageError {
    pub stage: Stage,
    pub cause: eyre::Report,
}

impl StageError {
    pub fn new(stage: Stage, fault: StreamError) -> Self {
        Self::fatal(stage, fault.into_report())
    }

    pub fn fatal(stage: Stage, cause: eyre::Report) -> Self {
        Self { stage, cause }
    }
}

/// Why an attempt stopped without a stage failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled the run
    Stopped,
    /// The configured overall timeout elapsed
    TimedOut,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Stopped => write!(f, "cancelled"),
            CancelReason::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Terminal outcome of [`Orchestrator::execute`](super::Orchestrator::execute)
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or invalid configuration; never retried
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A component failed to initialize (typically a connection failure)
    #[error("{stage} initialization failed: {cause:#}")]
    Init { stage: Stage, cause: eyre::Report },
    /// A running stage reported a fatal fault
    #[error(transparent)]
    Stage(#[from] StageError),
    /// The run was cancelled or timed out; never retried
    #[error("pipeline {0}")]
    Cancelled(CancelReason),
    /// Every attempt failed
    #[error("pipeline failed after {attempts} attempt(s) ({retries} retries), last error: {last}")]
    Exhausted {
        attempts: u32,
        retries: u32,
        #[source]
        last: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Whether another attempt may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Init { .. } | PipelineError::Stage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        let init = PipelineError::Init {
            stage: Stage::Extract,
            cause: eyre::eyre!("connection refused"),
        };
        assert!(init.is_retryable());
        assert!(!PipelineError::Config("x".into()).is_retryable());
        assert!(!PipelineError::Cancelled(CancelReason::Stopped).is_retryable());
    }

    #[test]
    fn test_exhausted_display_mentions_retries() {
        let err = PipelineError::Exhausted {
            attempts: 4,
            retries: 3,
            last: Box::new(PipelineError::Stage(StageError::fatal(
                Stage::Load,
                eyre::eyre!("connection reset"),
            ))),
        };
        assert_eq!(
            err.to_string(),
            "pipeline failed after 4 attempt(s) (3 retries), last error: loading error: connection reset"
        );
    }

    #[test]
    fn test_stage_error_keeps_chain() {
        let source = eyre::eyre!("socket closed").wrap_err("query failed on shard 2");
        let err = StageError::fatal(Stage::Extract, source);
        assert_eq!(
            err.to_string(),
            "extraction error: query failed on shard 2: socket closed"
        );
    }

    #[test]
    fn test_exhausted_chains_to_last_attempt() {
        use std::error::Error as _;

        let err = PipelineError::Exhausted {
            attempts: 2,
            retries: 1,
            last: Box::new(PipelineError::Init {
                stage: Stage::Load,
                cause: eyre::eyre!("connection refused"),
            }),
        };
        let last = err.source().unwrap();
        assert_eq!(last.to_string(), "loading initialization failed: connection refused");
        assert!(last.source().is_none());
    }

    #[test]
    fn test_cancel_display() {
        assert_eq!(
            PipelineError::Cancelled(CancelReason::Stopped).to_string(),
            "pipeline cancelled"
        );
        assert_eq!(
            PipelineError::Cancelled(CancelReason::TimedOut).to_string(),
            "pipeline timed out"
        );
    }

    #[test]
    fn test_stage_error_converts_transparently() {
        let err: PipelineError = StageError::fatal(Stage::Transform, eyre::eyre!("bad row")).into();
        assert_eq!(err.to_string(), "transformation error: bad row");
        assert!(err.is_retryable());
    }
}
