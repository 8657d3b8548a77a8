//! Core ETL (Extract, Transform, Load) abstractions
//!
//! This module provides the stream-based stage traits and the
//! [`Orchestrator`] that wires them together:
//!
//! ```text
//! shard 1 ─┐
//! shard 2 ─┼─▶ Extractor ─▶ Transformer ─▶ Loader
//! shard N ─┘       │             │            │
//!                  └─ errors ────┴─ errors ───┴─ completion ─▶ Orchestrator
//! ```

mod error;
mod extract;
mod load;
mod orchestrator;
mod retry;
mod stream;
mod transform;

pub use error::{CancelReason, PipelineError, Stage, StageError};
pub use extract::Extractor;
pub use load::{LoadStats, Loader};
pub use orchestrator::{Orchestrator, RunReport, RunState};
pub use retry::RetryPolicy;
pub use stream::{
    ErrorStream, Halted, RecordStream, StreamError, closed_error_stream, error_channel,
    record_channel, recv_or_cancel, send_or_cancel,
};
pub use transform::{MapTransformer, Passthrough, RecordTransformer, Transformer};
