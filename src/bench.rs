//! Benchmark orchestration: wires the dispatcher, the workers and the
//! aggregator together and returns the final report.

use crate::db::Connector;
use crate::dispatcher::{dispatch, DispatchSummary};
use crate::error::BenchError;
use crate::query::QueryParser;
use crate::report::{read_results, ErrorSink, QueryResult, Report};
use crate::worker::run_queries;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_WORKER_QUEUE_SIZE: usize = 32;
pub const DEFAULT_RESULT_QUEUE_SIZE: usize = 32;

/// Run-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    /// Number of workers, each with its own connection.
    pub concurrency: usize,
    /// Capacity of each worker's input queue.
    pub worker_queue_size: usize,
    /// Capacity of the shared result queue.
    pub result_queue_size: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl BenchConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            worker_queue_size: DEFAULT_WORKER_QUEUE_SIZE,
            result_queue_size: DEFAULT_RESULT_QUEUE_SIZE,
        }
    }

    pub fn with_worker_queue_size(mut self, size: usize) -> Self {
        self.worker_queue_size = size;
        self
    }

    pub fn with_result_queue_size(mut self, size: usize) -> Self {
        self.result_queue_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.concurrency < 1 {
            return Err(BenchError::InvalidConcurrency);
        }
        if self.worker_queue_size < 1 || self.result_queue_size < 1 {
            return Err(BenchError::InvalidQueueSize);
        }
        Ok(())
    }
}

/// Run every query from `parser` across `config.concurrency` connections.
///
/// Each worker gets its own bounded queue and the dispatcher routes queries
/// by hostname, so all queries for a host run in input order on one
/// connection. Results from every worker are merged into one channel and
/// aggregated as they arrive.
///
/// A worker that cannot connect or prepare aborts the whole run.
pub async fn run_bench<R>(
    config: &BenchConfig,
    parser: QueryParser<R>,
    connector: Arc<dyn Connector>,
    sink: &dyn ErrorSink,
) -> Result<Report, BenchError>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    config.validate()?;
    info!(
        concurrency = config.concurrency,
        worker_queue_size = config.worker_queue_size,
        result_queue_size = config.result_queue_size,
        "starting benchmark"
    );

    let (result_tx, result_rx) = mpsc::channel(config.result_queue_size);
    let mut queues = Vec::with_capacity(config.concurrency);
    let mut workers = JoinSet::new();

    for index in 0..config.concurrency {
        let (queue_tx, queue_rx) = mpsc::channel(config.worker_queue_size);
        queues.push(queue_tx);
        workers.spawn(run_queries(
            index,
            connector.clone(),
            queue_rx,
            result_tx.clone(),
        ));
    }

    let dispatcher = tokio::spawn(dispatch(parser, queues, result_tx.clone()));
    let watcher = tokio::spawn(watch_workers(workers, dispatcher, result_tx));

    let report = read_results(config.concurrency, result_rx, sink).await;
    let summary = watcher.await??;

    info!(
        routed = summary.routed,
        malformed = summary.malformed,
        "benchmark finished"
    );
    Ok(report)
}

/// Wait for every worker to finish, then close the result stream by dropping
/// its last sender.
///
/// On the first fatal worker error everything else is aborted and joined
/// before the stream closes, so neither the dispatcher nor the aggregator
/// is left waiting.
async fn watch_workers(
    mut workers: JoinSet<Result<(), BenchError>>,
    mut dispatcher: JoinHandle<Result<DispatchSummary, BenchError>>,
    results: mpsc::Sender<QueryResult>,
) -> Result<DispatchSummary, BenchError> {
    let mut failure = None;
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined.map_err(BenchError::from).and_then(|outcome| outcome) {
            failure = Some(e);
            break;
        }
    }

    let outcome = match failure {
        Some(e) => {
            error!(error = %e, "aborting benchmark");
            workers.abort_all();
            dispatcher.abort();
            while workers.join_next().await.is_some() {}
            let _ = (&mut dispatcher).await;
            Err(e)
        }
        None => dispatcher.await.map_err(BenchError::from).and_then(|outcome| outcome),
    };

    drop(results);
    outcome
}
