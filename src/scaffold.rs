//! Pipeline scaffolding for `shardflow generate`

use eyre::{Context, Result};
use std::path::{Path, PathBuf};

const CONFIG_TEMPLATE: &str = r#"# Pipeline configuration for {name}
pipeline:
  name: "{name}"
  description: "ETL pipeline for {name}"

  # Retries after the first attempt
  retries: 3
  # Examples: "5s", "1m", "2m30s"
  retry_delay: "5s"
  max_retry_delay: "15m"
  exponential_backoff: true
  # Upper bound for the whole run, retries included
  timeout: "1h"

  # Capacity of the bounded record queues
  buffer_size: 1024
  # Fail the attempt on the first rejected row instead of counting it
  abort_on_row_error: false

source:
  type: "postgres"
  servers:
    - "${SHARD1_HOST}:${SHARD1_PORT}"
    - "${SHARD2_HOST}:${SHARD2_PORT}"
  database: "${SOURCE_DB_NAME}"
  user: "${SOURCE_DB_USER}"
  password: "${SOURCE_DB_PASSWORD}"
  tables:
    - "public.events"
  # query: "SELECT * FROM {table} WHERE created_at > now() - interval '1 day'"
  order_by: "id"
  source_column: "source_shard"
  # processed_at_column: "processed_at"
  connect_attempts: 3
  connect_retry_delay: "2s"
  ping_timeout: "10s"

transformations:
  - type: fill_default
    column: "status"
    default_value: "unknown"

sink:
  type: "postgres"
  host: "${SINK_DB_HOST}"
  port: ${SINK_DB_PORT}
  database: "${SINK_DB_NAME}"
  user: "${SINK_DB_USER}"
  password: "${SINK_DB_PASSWORD}"
  table: "public.events"
  conflict_keys:
    - "id"
    - "source_shard"
  # Send rows from some source tables elsewhere
  # table_map:
  #   public.events_archive: "public.events_history"
"#;

const ENV_TEMPLATE: &str = r#"# Credentials for {name}
SHARD1_HOST=localhost
SHARD1_PORT=5432
SHARD2_HOST=localhost
SHARD2_PORT=5433
SOURCE_DB_NAME=app
SOURCE_DB_USER=etl
SOURCE_DB_PASSWORD=

SINK_DB_HOST=localhost
SINK_DB_PORT=5434
SINK_DB_NAME=warehouse
SINK_DB_USER=etl
SINK_DB_PASSWORD=
"#;

const README_TEMPLATE: &str = r#"# {name}

ETL pipeline generated by `shardflow generate`.

## Files

- `config.yaml`: pipeline, source, transformations and sink settings
- `.env`: credentials substituted into `config.yaml` as `${VAR}`

## Usage

```sh
shardflow --env pipelines/{name}/.env validate --config pipelines/{name}/config.yaml
shardflow --env pipelines/{name}/.env run --config pipelines/{name}/config.yaml
```

Set `LOG_LEVEL=debug` or pass `--debug` for per-shard detail.
"#;

/// Section appended to the project `.gitignore` so credentials stay local
const GITIGNORE_SECTION: &str = "# Start shardflow\n.env\npipelines/*/.env\n# End shardflow\n";

/// Writes a new pipeline directory from the built-in templates
pub struct Generator {
    base_dir: PathBuf,
    name: String,
}

impl Generator {
    pub fn new(base_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            name: name.into(),
        }
    }

    /// Directory the pipeline is written to
    pub fn pipeline_dir(&self) -> PathBuf {
        self.base_dir.join("pipelines").join(&self.name)
    }

    /// Create `pipelines/<name>/` with its config, env file and README
    ///
    /// # Errors
    /// Fails if the name is not a plain identifier or the directory exists
    pub fn generate(&self) -> Result<PathBuf> {
        validate_name(&self.name)?;

        let dir = self.pipeline_dir();
        if dir.exists() {
            eyre::bail!("Pipeline directory already exists: {}", dir.display());
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        for (filename, template) in [
            ("config.yaml", CONFIG_TEMPLATE),
            (".env", ENV_TEMPLATE),
            ("README.md", README_TEMPLATE),
        ] {
            let path = dir.join(filename);
            std::fs::write(&path, template.replace("{name}", &self.name))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::debug!("Wrote {}", path.display());
        }

        self.ignore_env_files()?;
        Ok(dir)
    }

    /// Append [`GITIGNORE_SECTION`] to `<base_dir>/.gitignore` unless present
    fn ignore_env_files(&self) -> Result<()> {
        let path = self.base_dir.join(".gitignore");
        let existing = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let header = GITIGNORE_SECTION.lines().next().unwrap_or_default();
        if existing.lines().any(|line| line.trim() == header) {
            log::debug!("{} already ignores env files", path.display());
            return Ok(());
        }

        let separator = match existing.is_empty() || existing.ends_with('\n') {
            true => "",
            false => "\n",
        };
        std::fs::write(&path, format!("{existing}{separator}{GITIGNORE_SECTION}"))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Added env files to {}", path.display());
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        eyre::bail!("Pipeline name is required");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        eyre::bail!(
            "Invalid pipeline name '{}': use letters, digits, '-' or '_'",
            name
        );
    }
    Ok(())
}
