//! Routes input records to worker queues.

use crate::error::{BenchError, QueryError};
use crate::query::{Query, QueryParser};
use crate::report::QueryResult;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Counts of what the dispatcher did with the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub routed: u64,
    pub malformed: u64,
}

/// Read every record from `parser` and push it onto the queue of the worker
/// its hostname routes to.
///
/// Sending blocks while the target queue is full. Malformed records skip the
/// workers: their error goes straight to `results`. Dropping `queues` on
/// return is what lets the workers drain and exit; `results` is left open
/// for the workers.
pub async fn dispatch<R>(
    mut parser: QueryParser<R>,
    queues: Vec<mpsc::Sender<Query>>,
    results: mpsc::Sender<QueryResult>,
) -> Result<DispatchSummary, BenchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = DispatchSummary::default();
    let concurrency = queues.len();

    while let Some(record) = parser.next_record().await? {
        match record {
            Ok(query) => {
                let worker = query.route(concurrency);
                if queues[worker].send(query).await.is_err() {
                    debug!(worker, "worker queue closed, stopping dispatch");
                    return Ok(summary);
                }
                summary.routed += 1;
            }
            Err(e) => {
                summary.malformed += 1;
                if results
                    .send(QueryResult::unrouted(QueryError::Parse(e)))
                    .await
                    .is_err()
                {
                    debug!("result stream closed, stopping dispatch");
                    return Ok(summary);
                }
            }
        }
    }

    info!(
        routed = summary.routed,
        malformed = summary.malformed,
        "input exhausted"
    );
    Ok(summary)
}
