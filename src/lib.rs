//! shardflow
//!
//! Retrying extract → transform → load pipelines that fan in rows from a
//! sharded relational source and upsert them into a sink table

pub mod cli;
pub mod config;
pub mod etl;
pub mod scaffold;
pub mod sink;
pub mod source;
pub mod sql;
pub mod transform;

/// A record moving through the pipeline: column name → JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

// Re-exports for convenience
pub use config::PipelineConfig;
pub use etl::{Extractor, Loader, Orchestrator, PipelineError, RunReport, Transformer};
pub use scaffold::Generator;
pub use sink::{PostgresSink, UpsertLoader};
pub use source::ShardedExtractor;
