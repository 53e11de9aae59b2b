//! Database connections used by the workers.
//!
//! Workers only see the `Connection` and `Connector` traits. `PgConnector`
//! backs them with a real sqlx Postgres connection; tests plug in mocks.

use crate::error::{BenchError, DbError};
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgStatement, PgTypeInfo, Postgres};
use sqlx::{Connection as _, Executor as _, Statement, Type};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Name the benchmark statement is registered under on every connection.
pub const TIME_BUCKET_QUERY_NAME: &str = "cpu-buckets";

/// The benchmark statement: per-minute min/max CPU usage of one host over a time window.
pub const TIME_BUCKET_QUERY_TEXT: &str = r#"SELECT time_bucket('1 minute', ts) as "bucket", min(usage), max(usage)
FROM cpu_usage
WHERE host = $1 AND ts >= $2::timestamptz AND ts <= $3::timestamptz
GROUP BY bucket
ORDER BY bucket ASC;"#;

/// Interval between connection attempts in `wait_for`.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// A single database session owned by one worker.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Register `statement` under `name` for later `execute` calls.
    async fn prepare(&mut self, name: &str, statement: &str) -> Result<(), DbError>;

    /// Run a prepared statement and discard whatever it returns.
    async fn execute(
        &mut self,
        name: &str,
        hostname: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<(), DbError>;

    async fn close(self: Box<Self>) -> Result<(), DbError>;
}

/// Opens new connections; called once per worker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError>;
}

/// Connects to Postgres through sqlx.
#[derive(Debug, Clone)]
pub struct PgConnector {
    url: String,
}

impl PgConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let conn = PgConnection::connect(&self.url).await?;
        Ok(Box::new(PgSession {
            conn,
            statements: HashMap::new(),
        }))
    }
}

/// Statements are prepared with every parameter typed as `text`, matching
/// the string binds in `execute`; the casts in the SQL do the conversion on
/// the server.
///
/// sqlx also caches prepared statements by SQL text, so the parameter types
/// chosen here are the ones every later execution on this connection uses.
struct PgSession {
    conn: PgConnection,
    statements: HashMap<String, PgStatement<'static>>,
}

fn text_parameters() -> [PgTypeInfo; 3] {
    let text = <str as Type<Postgres>>::type_info();
    [text.clone(), text.clone(), text]
}

#[async_trait]
impl Connection for PgSession {
    async fn prepare(&mut self, name: &str, statement: &str) -> Result<(), DbError> {
        let parameters = text_parameters();
        let prepared = (&mut self.conn)
            .prepare_with(statement, &parameters)
            .await?;
        self.statements
            .insert(name.to_string(), Statement::to_owned(&prepared));
        Ok(())
    }

    async fn execute(
        &mut self,
        name: &str,
        hostname: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<(), DbError> {
        let statement = self
            .statements
            .get(name)
            .ok_or_else(|| format!("statement {name} was not prepared"))?;
        statement
            .query()
            .bind(hostname)
            .bind(start_time)
            .bind(end_time)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.conn.close().await?;
        Ok(())
    }
}

/// Try connecting every `retry` until it succeeds or `wait` runs out.
///
/// The probe connection is closed straight away; workers open their own.
pub async fn wait_for(
    connector: &dyn Connector,
    wait: Duration,
    retry: Duration,
) -> Result<(), BenchError> {
    let attempts = async {
        let mut ticker = tokio::time::interval(retry);
        loop {
            ticker.tick().await;
            match connector.connect().await {
                Ok(conn) => return conn.close().await,
                Err(e) => debug!(error = %e, "database not ready"),
            }
        }
    };

    match tokio::time::timeout(wait, attempts).await {
        Ok(Ok(())) => {
            info!("database is accepting connections");
            Ok(())
        }
        Ok(Err(e)) => {
            debug!(error = %e, "failed to close probe connection");
            Err(BenchError::DatabaseUnavailable)
        }
        Err(_) => Err(BenchError::DatabaseUnavailable),
    }
}
