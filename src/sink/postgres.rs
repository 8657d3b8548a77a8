//! Postgres upsert sink

use super::{Sink, WriteError};
use crate::Row;
use crate::config::SinkConfig;
use crate::sql::quote_ident;
use eyre::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;

/// Writes rows with `INSERT ... ON CONFLICT (<keys>) DO UPDATE`
#[derive(Debug, Default)]
pub struct PostgresSink {
    pool: Option<PgPool>,
    conflict_keys: Vec<String>,
}

impl PostgresSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.pool.is_some()
    }
}

impl Sink for PostgresSink {
    async fn open(&mut self, config: &SinkConfig) -> Result<()> {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port);
        if !config.database.is_empty() {
            options = options.database(&config.database);
        }
        if let Some(user) = &config.user {
            options = options.username(user);
        }
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        log::info!("Connecting to sink at {}:{}", config.host, config.port);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| {
                format!("Failed to connect to sink at {}:{}", config.host, config.port)
            })?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("Sink ping failed")?;

        self.conflict_keys = config.conflict_keys.clone();
        self.pool = Some(pool);
        Ok(())
    }

    async fn upsert(&self, table: &str, row: &Row) -> Result<(), WriteError> {
        let Some(pool) = &self.pool else {
            return Err(WriteError::Connection(eyre::eyre!("Sink is not open")));
        };

        if let Some(key) = self.conflict_keys.iter().find(|key| !row.contains_key(*key)) {
            return Err(WriteError::Row(eyre::eyre!(
                "Row is missing conflict key '{}'",
                key
            )));
        }

        let columns: Vec<&str> = row.keys().map(String::as_str).collect();
        let statement = upsert_statement(table, &self.conflict_keys, &columns);

        sqlx::query(&statement)
            .bind(Json(row))
            .execute(pool)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            log::debug!("Closed sink connection");
        }
        Ok(())
    }
}

/// Build the upsert for one row shape
///
/// The row travels as a single `jsonb` parameter and is expanded with
/// `jsonb_populate_record`, so column types follow the target table.
/// Columns are emitted in sorted order. When every column is a conflict key
/// there is nothing to update and the statement ends in `DO NOTHING`.
pub fn upsert_statement(table: &str, conflict_keys: &[String], columns: &[&str]) -> String {
    let mut columns: Vec<&str> = columns.to_vec();
    columns.sort_unstable();
    columns.dedup();

    let table = quote_ident(table);
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let keys = conflict_keys
        .iter()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .filter(|c| !conflict_keys.iter().any(|k| k == *c))
        .map(|c| {
            let c = quote_ident(c);
            format!("{} = EXCLUDED.{}", c, c)
        })
        .collect::<Vec<_>>();

    let action = match updates.is_empty() {
        true => "DO NOTHING".to_string(),
        false => format!("DO UPDATE SET {}", updates.join(", ")),
    };

    format!(
        "INSERT INTO {table} ({column_list}) SELECT {column_list} FROM jsonb_populate_record(NULL::{table}, $1) ON CONFLICT ({keys}) {action}"
    )
}

/// Split driver errors into row-local rejections and lost connections
fn classify(error: sqlx::Error) -> WriteError {
    let connection_lost = match &error {
        // SQLSTATE class 08 (connection exception) and 57 (operator intervention)
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with("08") || code.starts_with("57")),
        sqlx::Error::Encode(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. } => false,
        _ => true,
    };

    let report = eyre::Report::new(error);
    match connection_lost {
        true => WriteError::Connection(report.wrap_err("Sink connection failed")),
        false => WriteError::Row(report.wrap_err("Upsert rejected")),
    }
}
