//! CLI helper functions

use crate::{
    config::PipelineConfig,
    etl::{MapTransformer, Orchestrator, RunReport},
    scaffold::Generator,
    sink::{PostgresSink, UpsertLoader},
    source::ShardedExtractor,
    transform::ColumnTransforms,
};
use eyre::{Context, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// The pipeline the `run` command executes
pub type PostgresPipeline =
    Orchestrator<ShardedExtractor, MapTransformer<ColumnTransforms>, UpsertLoader<PostgresSink>>;

const SUPPORTED_TYPES: &[&str] = &["postgres"];

/// Load and validate a pipeline configuration
///
/// Besides the structural checks in [`PipelineConfig::validate`], the
/// source and sink types must be ones this binary can connect to.
pub fn validate_config(config_path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let config_path = config_path.as_ref();
    let config = PipelineConfig::from_file(config_path)?;

    for (role, kind) in [("source", &config.source.kind), ("sink", &config.sink.kind)] {
        if !SUPPORTED_TYPES.contains(&kind.trim()) {
            eyre::bail!(
                "Unsupported {} type '{}' in {} (supported: {})",
                role,
                kind,
                config_path.display(),
                SUPPORTED_TYPES.join(", ")
            );
        }
    }

    Ok(config)
}

/// Assemble the Postgres-to-Postgres pipeline for `config`
pub fn build_pipeline(config: PipelineConfig) -> Result<PostgresPipeline> {
    let transforms = ColumnTransforms::from_config(&config.transformations);
    log::debug!("{} column transformation(s) configured", transforms.len());

    let pipeline = Orchestrator::new(
        config,
        ShardedExtractor::new(),
        MapTransformer::new(transforms),
        UpsertLoader::new(PostgresSink::new()),
    )?;
    Ok(pipeline)
}

/// Run the pipeline described by `config_path` until it succeeds, exhausts
/// its retries, or `cancel` fires
pub async fn run_pipeline(
    config_path: impl AsRef<Path>,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let config_path = config_path.as_ref();
    let config = validate_config(config_path)?;
    let name = config.pipeline.name.clone();

    log::info!(
        "Running pipeline {} from {}",
        name.bright_white(),
        config_path.display().bright_black()
    );
    log::info!(
        "{} shard(s) → {}",
        config.source.servers.len(),
        config.sink.table.bright_black()
    );

    let mut pipeline = build_pipeline(config)?;
    let report = pipeline
        .execute(cancel)
        .await
        .with_context(|| format!("Pipeline '{}' failed", name))?;

    log::info!(
        "✓ Loaded {} record(s) ({} failed, {} rejected) in {} attempt(s)",
        report.loaded.green(),
        report.failed,
        report.rejected,
        report.attempts
    );
    Ok(report)
}

/// Scaffold `pipelines/<name>/` under `base_dir`
pub fn generate_pipeline(base_dir: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    let dir = Generator::new(base_dir.as_ref(), name).generate()?;
    log::info!("✓ Generated pipeline {} in {}", name, dir.display().bright_black());
    Ok(dir)
}
