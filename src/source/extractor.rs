//! Fan-out / fan-in extraction over every (shard × table)

use super::{PgConnector, Scan, ShardClient, ShardConnector, build_query};
use crate::Row;
use crate::config::{Endpoint, PipelineConfig, SourceConfig};
use crate::etl::{
    ErrorStream, Extractor, RecordStream, StreamError, error_channel, record_channel,
    send_or_cancel,
};
use chrono::Utc;
use eyre::{Context, Result};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

struct Shard<C> {
    number: usize,
    endpoint: Endpoint,
    client: Arc<C>,
}

/// Extractor reading every configured table from every shard in parallel
///
/// # Example
/// ```no_run
/// use shardflow::config::PipelineConfig;
/// use shardflow::etl::Extractor;
/// use shardflow::source::ShardedExtractor;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> eyre::Result<()> {
/// let config = PipelineConfig::from_file("config.yaml")?;
/// let mut extractor = ShardedExtractor::new();
/// extractor.init(&config).await?;
///
/// let (mut rows, _errors) = extractor.extract(CancellationToken::new());
/// while let Some(row) = rows.recv().await {
///     println!("{:?}", row);
/// }
/// extractor.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ShardedExtractor<C: ShardConnector = PgConnector> {
    connector: C,
    shards: Vec<Shard<C::Client>>,
    source: Option<SourceConfig>,
    capacity: usize,
    supervisor: Option<JoinHandle<()>>,
}

impl ShardedExtractor<PgConnector> {
    /// Create an extractor for Postgres shards
    pub fn new() -> Self {
        Self::with_connector(PgConnector)
    }
}

impl Default for ShardedExtractor<PgConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ShardConnector> ShardedExtractor<C> {
    /// Create an extractor using a custom shard connector
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            shards: Vec::new(),
            source: None,
            capacity: crate::config::DEFAULT_BUFFER_SIZE,
            supervisor: None,
        }
    }

    /// Number of shards currently holding a connection
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl<C: ShardConnector> Extractor for ShardedExtractor<C> {
    type Item = Row;

    async fn init(&mut self, config: &PipelineConfig) -> Result<()> {
        let source = &config.source;
        self.capacity = config.pipeline.buffer_size;
        self.source = Some(source.clone());

        for (index, endpoint) in source.endpoints()?.into_iter().enumerate() {
            let number = index + 1;
            log::info!("Connecting to shard {} at {}", number, endpoint);

            let client = self
                .connector
                .connect(&endpoint, source)
                .await
                .with_context(|| format!("Failed to connect to shard {} at {}", number, endpoint))?;
            let client = Arc::new(client);

            // Registered before the ping so close() releases it either way
            self.shards.push(Shard {
                number,
                endpoint: endpoint.clone(),
                client: Arc::clone(&client),
            });

            verify_shard(client.as_ref(), number, &endpoint, source).await?;
            log::info!("Connected to shard {} at {}", number, endpoint);
        }

        Ok(())
    }

    fn extract(&mut self, cancel: CancellationToken) -> (RecordStream<Row>, ErrorStream) {
        let (tx, rx) = record_channel(self.capacity);
        let (err_tx, err_rx) = error_channel();

        let Some(source) = &self.source else {
            log::warn!("Extractor used before init, nothing to extract");
            return (rx, err_rx);
        };

        let tables: Vec<Option<String>> = match source.tables() {
            tables if tables.is_empty() => vec![None],
            tables => tables.into_iter().map(|t| Some(t.to_string())).collect(),
        };

        let mut tasks = JoinSet::new();
        for shard in &self.shards {
            for table in &tables {
                let scan = TableScan {
                    shard: shard.number,
                    query: build_query(source, table.as_deref()),
                    source_tag: format!(
                        "{}_shard{}",
                        table.as_deref().unwrap_or("query"),
                        shard.number
                    ),
                    source_column: source.source_column.clone(),
                    processed_at_column: source.processed_at_column.clone(),
                    client: Arc::clone(&shard.client),
                };
                tasks.spawn(scan.run(tx.clone(), err_tx.clone(), cancel.clone()));
            }
        }
        log::debug!(
            "Started {} extraction task(s) across {} shard(s)",
            tasks.len(),
            self.shards.len()
        );

        // The supervisor owns the original senders: both streams close exactly
        // once, after the last task has finished.
        let supervisor = tokio::spawn(async move {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    let fault = StreamError::Fatal(eyre::eyre!("Extraction task panicked: {}", e));
                    let _ = send_or_cancel(&err_tx, fault, &cancel).await;
                }
            }
            log::debug!("All extraction tasks finished");
            drop(tx);
            drop(err_tx);
        });
        self.supervisor = Some(supervisor);

        (rx, err_rx)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(supervisor) = self.supervisor.take() {
            // Aborting the supervisor drops its JoinSet, which aborts every task
            supervisor.abort();
            let _ = supervisor.await;
        }
        self.source = None;

        let mut failures = Vec::new();
        for shard in self.shards.drain(..) {
            match shard.client.close().await {
                Ok(()) => log::debug!("Closed shard {} at {}", shard.number, shard.endpoint),
                Err(e) => failures.push(format!(
                    "shard {} at {}: {:#}",
                    shard.number, shard.endpoint, e
                )),
            }
        }

        if !failures.is_empty() {
            eyre::bail!(
                "Failed to close {} shard connection(s): {}",
                failures.len(),
                failures.join("; ")
            );
        }
        Ok(())
    }
}

/// Ping a shard, retrying a fixed number of times with a fixed delay
async fn verify_shard<S: ShardClient>(
    client: &S,
    number: usize,
    endpoint: &Endpoint,
    source: &SourceConfig,
) -> Result<()> {
    let attempts = source.connect_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match tokio::time::timeout(source.ping_timeout, client.ping()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => eyre::eyre!("Ping timed out after {:?}", source.ping_timeout),
        };

        if attempt >= attempts {
            return Err(err.wrap_err(format!(
                "Shard {} at {} unreachable after {} attempt(s)",
                number, endpoint, attempts
            )));
        }

        log::warn!(
            "Failed to ping shard {} at {} (attempt {}/{}): {:#}",
            number,
            endpoint,
            attempt,
            attempts,
            err
        );
        tokio::time::sleep(source.connect_retry_delay).await;
    }
}

/// One extraction task: a single query against a single shard
struct TableScan<C> {
    shard: usize,
    query: String,
    source_tag: String,
    source_column: Option<String>,
    processed_at_column: Option<String>,
    client: Arc<C>,
}

impl<C: ShardClient> TableScan<C> {
    async fn run(
        self,
        tx: mpsc::Sender<Row>,
        err_tx: mpsc::Sender<StreamError>,
        cancel: CancellationToken,
    ) {
        log::debug!("Shard {}: {}", self.shard, self.query);
        let mut rows = self.client.scan(&self.query);
        let mut count = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = rows.next() => next,
            };

            let sent = match next {
                None => break,
                Some(Ok(Scan::Row(mut row))) => {
                    if let Some(column) = &self.source_column {
                        row.insert(column.clone(), Value::String(self.source_tag.clone()));
                    }
                    if let Some(column) = &self.processed_at_column {
                        row.insert(column.clone(), Value::String(Utc::now().to_rfc3339()));
                    }
                    count += 1;
                    send_or_cancel(&tx, row, &cancel).await
                }
                Some(Ok(Scan::Invalid(e))) => {
                    let fault = StreamError::Row(
                        e.wrap_err(format!("Failed to scan row from {}", self.source_tag)),
                    );
                    send_or_cancel(&err_tx, fault, &cancel).await
                }
                Some(Err(e)) => {
                    let fault = StreamError::Fatal(
                        e.wrap_err(format!("Failed to extract from {}", self.source_tag)),
                    );
                    let _ = send_or_cancel(&err_tx, fault, &cancel).await;
                    return;
                }
            };

            if sent.is_err() {
                return;
            }
        }

        log::info!("Extracted {} record(s) from {}", count, self.source_tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, BoxStream};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone)]
    enum Step {
        Row(i64),
        Invalid,
        Fail,
    }

    #[derive(Default, Clone)]
    struct Calls {
        pings: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        queries: Arc<Mutex<Vec<String>>>,
    }

    struct MockClient {
        steps: Vec<Step>,
        reachable: bool,
        calls: Calls,
    }

    impl ShardClient for MockClient {
        async fn ping(&self) -> Result<()> {
            self.calls.pings.fetch_add(1, Ordering::SeqCst);
            if !self.reachable {
                eyre::bail!("connection refused");
            }
            Ok(())
        }

        fn scan<'a>(&'a self, query: &'a str) -> BoxStream<'a, Result<Scan>> {
            self.calls.queries.lock().unwrap().push(query.to_string());
            stream::iter(self.steps.iter().map(|step| match step {
                Step::Row(id) => {
                    let mut row = Row::new();
                    row.insert("id".to_string(), Value::from(*id));
                    Ok(Scan::Row(row))
                }
                Step::Invalid => Ok(Scan::Invalid(eyre::eyre!("not an object"))),
                Step::Fail => Err(eyre::eyre!("relation does not exist")),
            }))
            .boxed()
        }

        async fn close(&self) -> Result<()> {
            self.calls.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockConnector {
        shards: HashMap<String, (Vec<Step>, bool)>,
        calls: Calls,
    }

    impl MockConnector {
        fn shard(mut self, host: &str, steps: Vec<Step>, reachable: bool) -> Self {
            self.shards.insert(host.to_string(), (steps, reachable));
            self
        }
    }

    impl ShardConnector for MockConnector {
        type Client = MockClient;

        async fn connect(&self, endpoint: &Endpoint, _source: &SourceConfig) -> Result<MockClient> {
            let (steps, reachable) = self
                .shards
                .get(&endpoint.host)
                .cloned()
                .ok_or_else(|| eyre::eyre!("unknown host {}", endpoint.host))?;
            Ok(MockClient {
                steps,
                reachable,
                calls: self.calls.clone(),
            })
        }
    }

    fn config(servers: &[&str], source_extra: &str) -> PipelineConfig {
        let yaml = format!(
            r#"
pipeline:
  name: extract
  buffer_size: 2
source:
  type: postgres
  servers: {}
  connect_attempts: 2
  connect_retry_delay: 1s
{}
sink:
  type: postgres
  table: out
  conflict_keys: [id]
"#,
            serde_json::to_string(servers).unwrap(),
            source_extra
        );
        PipelineConfig::from_yaml(&yaml).unwrap()
    }

    async fn drain(
        mut rows: RecordStream<Row>,
        mut errors: ErrorStream,
    ) -> (Vec<Row>, Vec<StreamError>) {
        let mut collected = Vec::new();
        while let Some(row) = rows.recv().await {
            collected.push(row);
        }
        let mut faults = Vec::new();
        while let Some(fault) = errors.recv().await {
            faults.push(fault);
        }
        (collected, faults)
    }

    fn rows(ids: &[i64]) -> Vec<Step> {
        ids.iter().map(|id| Step::Row(*id)).collect()
    }

    #[tokio::test]
    async fn test_fan_in_across_shards() {
        let connector = MockConnector::default()
            .shard("a", rows(&[1, 2, 3]), true)
            .shard("b", rows(&[4, 5, 6]), true);
        let calls = connector.calls.clone();
        let mut extractor = ShardedExtractor::with_connector(connector);

        let config = config(&["a:1", "b:1"], "  tables: [events]\n  source_column: src");
        extractor.init(&config).await.unwrap();
        assert_eq!(extractor.shard_count(), 2);

        let (rows, errors) = extractor.extract(CancellationToken::new());
        let (rows, faults) = drain(rows, errors).await;

        assert_eq!(rows.len(), 6);
        assert!(faults.is_empty());
        let from_shard2 = rows
            .iter()
            .filter(|row| row["src"] == Value::from("events_shard2"))
            .count();
        assert_eq!(from_shard2, 3);

        extractor.close().await.unwrap();
        assert_eq!(calls.closed.load(Ordering::SeqCst), 2);
        assert_eq!(extractor.shard_count(), 0);
    }

    #[tokio::test]
    async fn test_processed_at_is_stamped() {
        let connector = MockConnector::default().shard("a", rows(&[1, 2]), true);
        let mut extractor = ShardedExtractor::with_connector(connector);

        let before = Utc::now();
        let config = config(&["a:1"], "  table: t\n  processed_at_column: processed_at");
        extractor.init(&config).await.unwrap();
        let (rows, errors) = extractor.extract(CancellationToken::new());
        let (rows, _) = drain(rows, errors).await;

        assert_eq!(rows.len(), 2);
        for row in &rows {
            let stamped = row["processed_at"].as_str().unwrap();
            let stamped = chrono::DateTime::parse_from_rfc3339(stamped).unwrap();
            assert!(stamped.timestamp() >= before.timestamp());
            assert!(!row.contains_key("source_shard"));
        }
        extractor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_one_task_per_shard_and_table() {
        let connector = MockConnector::default()
            .shard("a", rows(&[1]), true)
            .shard("b", rows(&[2]), true);
        let calls = connector.calls.clone();
        let mut extractor = ShardedExtractor::with_connector(connector);

        let config = config(&["a:1", "b:1"], "  table: t1\n  tables: [t2, t1, t3]");
        extractor.init(&config).await.unwrap();
        let (rows, errors) = extractor.extract(CancellationToken::new());
        let (rows, _) = drain(rows, errors).await;

        assert_eq!(rows.len(), 6);
        assert_eq!(calls.queries.lock().unwrap().len(), 6);
        extractor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_row_is_skipped() {
        let connector =
            MockConnector::default().shard("a", vec![Step::Row(1), Step::Invalid, Step::Row(2)], true);
        let mut extractor = ShardedExtractor::with_connector(connector);

        extractor.init(&config(&["a:1"], "  table: t")).await.unwrap();
        let (rows, errors) = extractor.extract(CancellationToken::new());
        let (rows, faults) = drain(rows, errors).await;

        assert_eq!(rows.len(), 2);
        assert_eq!(faults.len(), 1);
        assert!(!faults[0].is_fatal());
        extractor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_failure_is_fatal() {
        let connector =
            MockConnector::default().shard("a", vec![Step::Row(1), Step::Fail, Step::Row(2)], true);
        let mut extractor = ShardedExtractor::with_connector(connector);

        extractor.init(&config(&["a:1"], "  table: t")).await.unwrap();
        let (rows, errors) = extractor.extract(CancellationToken::new());
        let (rows, faults) = drain(rows, errors).await;

        assert_eq!(rows.len(), 1);
        assert_eq!(faults.len(), 1);
        assert!(faults[0].is_fatal());
        assert!(faults[0].to_string().contains("t_shard1"));
        extractor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_without_table_is_labelled() {
        let connector = MockConnector::default().shard("a", rows(&[7]), true);
        let calls = connector.calls.clone();
        let mut extractor = ShardedExtractor::with_connector(connector);

        let config = config(&["a:1"], "  query: SELECT 7 AS id\n  source_column: src");
        extractor.init(&config).await.unwrap();
        let (rows, errors) = extractor.extract(CancellationToken::new());
        let (rows, _) = drain(rows, errors).await;

        assert_eq!(rows[0]["src"], Value::from("query_shard1"));
        assert_eq!(
            calls.queries.lock().unwrap()[0],
            "SELECT to_jsonb(q) AS record FROM (SELECT 7 AS id) AS q"
        );
        extractor.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_shard_keeps_opened_pools_closable() {
        let connector = MockConnector::default()
            .shard("a", rows(&[1]), true)
            .shard("b", rows(&[2]), false);
        let calls = connector.calls.clone();
        let mut extractor = ShardedExtractor::with_connector(connector);

        let err = extractor
            .init(&config(&["a:1", "b:1"], "  table: t"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Shard 2 at b:1 unreachable after 2 attempt(s)"));
        // One ping for shard 1, two for shard 2
        assert_eq!(calls.pings.load(Ordering::SeqCst), 3);
        assert_eq!(extractor.shard_count(), 2);

        extractor.close().await.unwrap();
        assert_eq!(calls.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_producers() {
        let ids: Vec<i64> = (0..100).collect();
        let connector = MockConnector::default().shard("a", rows(&ids), true);
        let mut extractor = ShardedExtractor::with_connector(connector);

        extractor.init(&config(&["a:1"], "  table: t")).await.unwrap();
        let cancel = CancellationToken::new();
        let (mut rows, _errors) = extractor.extract(cancel.clone());

        assert!(rows.recv().await.is_some());
        cancel.cancel();

        let remaining = tokio::time::timeout(Duration::from_secs(5), async {
            let mut n = 0;
            while rows.recv().await.is_some() {
                n += 1;
            }
            n
        })
        .await
        .expect("record stream did not close after cancel");
        assert!(remaining < 99);
        extractor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_extract_before_init_is_empty() {
        let mut extractor = ShardedExtractor::with_connector(MockConnector::default());
        let (rows, errors) = extractor.extract(CancellationToken::new());
        let (rows, faults) = drain(rows, errors).await;
        assert!(rows.is_empty());
        assert!(faults.is_empty());
    }
}
