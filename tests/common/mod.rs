//! Shared fixtures for pipeline tests: a scriptable in-memory database and
//! CSV input generation.

#![allow(dead_code)]

use async_trait::async_trait;
use pg_latency_bench::db::TIME_BUCKET_QUERY_NAME;
use pg_latency_bench::{Connection, Connector, DbError, Query, QueryParser};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::BufReader;

pub const CSV_HEADER: &str = "hostname,start_time,end_time";

/// Decides the outcome of the n-th execution (1-based, across all connections).
pub type ExecScript = dyn Fn(u64) -> Result<Duration, String> + Send + Sync;

/// In-memory stand-in for the database, shared by every mock connection.
pub struct MockDb {
    pub connects: AtomicUsize,
    pub prepares: AtomicUsize,
    pub executions: AtomicU64,
    pub closes: AtomicUsize,
    /// Connection id and query, in execution order.
    pub executed: Mutex<Vec<(usize, Query)>>,
    /// Fail the n-th connect (1-based).
    pub fail_connect_on: Option<usize>,
    pub fail_prepare: bool,
    pub close_delay: Duration,
    pub script: Box<ExecScript>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::with_script(|_| Ok(Duration::ZERO))
    }

    pub fn with_script(
        script: impl Fn(u64) -> Result<Duration, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            connects: AtomicUsize::new(0),
            prepares: AtomicUsize::new(0),
            executions: AtomicU64::new(0),
            closes: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            fail_connect_on: None,
            fail_prepare: false,
            close_delay: Duration::ZERO,
            script: Box::new(script),
        }
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(MockConnector(self.clone()))
    }

    pub fn executed(&self) -> Vec<(usize, Query)> {
        self.executed.lock().unwrap().clone()
    }
}

struct MockConnector(Arc<MockDb>);

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let attempt = self.0.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if self.0.fail_connect_on == Some(attempt) {
            return Err("connection refused".into());
        }
        Ok(Box::new(MockConnection {
            id: attempt,
            db: self.0.clone(),
            prepared: false,
        }))
    }
}

struct MockConnection {
    id: usize,
    db: Arc<MockDb>,
    prepared: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn prepare(&mut self, name: &str, _statement: &str) -> Result<(), DbError> {
        self.db.prepares.fetch_add(1, Ordering::SeqCst);
        if self.db.fail_prepare {
            return Err("relation \"cpu_usage\" does not exist".into());
        }
        assert_eq!(name, TIME_BUCKET_QUERY_NAME);
        self.prepared = true;
        Ok(())
    }

    async fn execute(
        &mut self,
        name: &str,
        hostname: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<(), DbError> {
        assert!(self.prepared, "execute before prepare");
        assert_eq!(name, TIME_BUCKET_QUERY_NAME);
        self.db
            .executed
            .lock()
            .unwrap()
            .push((self.id, Query::new(hostname, start_time, end_time)));

        let n = self.db.executions.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = (self.db.script)(n)?;
        if latency >= Duration::from_millis(1) {
            tokio::time::sleep(latency).await;
        } else if !latency.is_zero() {
            // The tokio timer cannot sleep for less than a millisecond.
            std::thread::sleep(latency);
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        if !self.db.close_delay.is_zero() {
            tokio::time::sleep(self.db.close_delay).await;
        }
        self.db.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `count` records with random one-hour windows in 2017; hostnames come
/// from `hostname(i)`.
pub fn generate_queries(count: usize, seed: u64, hostname: impl Fn(usize) -> String) -> Vec<Query> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let day: u32 = rng.gen_range(1..=28);
            let hour: u32 = rng.gen_range(0..23);
            let minute: u32 = rng.gen_range(0..60);
            Query::new(
                hostname(i),
                format!("2017-01-{:02} {:02}:{:02}:00", day, hour, minute),
                format!("2017-01-{:02} {:02}:{:02}:00", day, hour + 1, minute),
            )
        })
        .collect()
}

pub fn to_csv_lines(queries: &[Query]) -> Vec<String> {
    queries
        .iter()
        .map(|q| format!("{},{},{}", q.hostname, q.start_time, q.end_time))
        .collect()
}

/// Write `lines` after the CSV header to a temporary file.
pub fn write_input(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", CSV_HEADER).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

pub async fn open_input(file: &NamedTempFile) -> QueryParser<BufReader<tokio::fs::File>> {
    let handle = tokio::fs::File::open(file.path()).await.unwrap();
    QueryParser::new(BufReader::new(handle)).await.unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
