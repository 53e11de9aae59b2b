//! Per-connection query worker.

use crate::db::{Connector, TIME_BUCKET_QUERY_NAME, TIME_BUCKET_QUERY_TEXT};
use crate::error::{BenchError, QueryError};
use crate::query::Query;
use crate::report::QueryResult;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Execute the queries routed to worker `index`, one at a time, on a
/// dedicated connection.
///
/// Returns once `input` is closed and drained. Connect and prepare failures
/// are fatal; a failing query is only reported on `output`. Latency is
/// measured client-side around the execute call, so it includes the network
/// round trip but not the time spent queued.
pub async fn run_queries(
    index: usize,
    connector: Arc<dyn Connector>,
    mut input: mpsc::Receiver<Query>,
    output: mpsc::Sender<QueryResult>,
) -> Result<(), BenchError> {
    let mut conn = connector
        .connect()
        .await
        .map_err(|source| BenchError::Connect {
            worker: index,
            source,
        })?;

    if let Err(source) = conn
        .prepare(TIME_BUCKET_QUERY_NAME, TIME_BUCKET_QUERY_TEXT)
        .await
    {
        if let Err(e) = conn.close().await {
            debug!(worker = index, error = %e, "failed to close connection");
        }
        return Err(BenchError::Prepare {
            worker: index,
            statement: TIME_BUCKET_QUERY_NAME,
            source,
        });
    }
    debug!(worker = index, "worker ready");

    let mut executed = 0u64;
    while let Some(query) = input.recv().await {
        let start = Instant::now();
        // Rows are never fetched: only the server round trip is measured.
        let outcome = conn
            .execute(
                TIME_BUCKET_QUERY_NAME,
                &query.hostname,
                &query.start_time,
                &query.end_time,
            )
            .await;
        let latency = start.elapsed();
        executed += 1;

        let result = QueryResult::executed(
            index,
            outcome.map(|()| latency).map_err(QueryError::Execution),
        );
        if output.send(result).await.is_err() {
            warn!(worker = index, "result stream closed, stopping worker");
            break;
        }
    }

    if let Err(e) = conn.close().await {
        warn!(worker = index, error = %e, "failed to close connection");
    }
    debug!(worker = index, executed, "worker closed");
    Ok(())
}
