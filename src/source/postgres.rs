//! Postgres shard client

use super::{Scan, ShardClient, ShardConnector};
use crate::config::{Endpoint, SourceConfig};
use eyre::{Context, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use sqlx::Row as _;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};

/// Connects to Postgres shards with a lazily-filled pool per shard
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl ShardConnector for PgConnector {
    type Client = PgShard;

    async fn connect(&self, endpoint: &Endpoint, source: &SourceConfig) -> Result<PgShard> {
        let mut options = PgConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port);
        if !source.database.is_empty() {
            options = options.database(&source.database);
        }
        if let Some(user) = &source.user {
            options = options.username(user);
        }
        if let Some(password) = &source.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(source.max_connections.max(1))
            .acquire_timeout(source.ping_timeout)
            .connect_lazy_with(options);

        Ok(PgShard { pool })
    }
}

/// Pool connected to one Postgres shard
#[derive(Debug, Clone)]
pub struct PgShard {
    pool: PgPool,
}

impl ShardClient for PgShard {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Ping failed")?;
        Ok(())
    }

    fn scan<'a>(&'a self, query: &'a str) -> BoxStream<'a, Result<Scan>> {
        sqlx::query(query)
            .fetch(&self.pool)
            .map(|row| match row {
                Ok(row) => Ok(decode_row(&row)),
                Err(e) => Err(eyre::Report::new(e).wrap_err("Query failed")),
            })
            .boxed()
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Decode the single `jsonb` column produced by [`build_query`](super::build_query)
fn decode_row(row: &PgRow) -> Scan {
    match row.try_get::<Value, _>(0) {
        Ok(Value::Object(map)) => Scan::Row(map),
        Ok(other) => Scan::Invalid(eyre::eyre!("Expected a JSON object, got {}", other)),
        Err(e) => Scan::Invalid(eyre::Report::new(e).wrap_err("Failed to decode row")),
    }
}
