//! Result aggregation and the benchmark report.

use crate::error::QueryError;
use crate::quantile::{Target, TargetedQuantiles};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Quantiles reported, with their rank error tolerance.
pub const LATENCY_TARGETS: [Target; 4] = [
    Target::new(0.50, 0.005),
    Target::new(0.90, 0.001),
    Target::new(0.95, 0.0005),
    Target::new(0.99, 0.0001),
];

/// Outcome of one input record.
#[derive(Debug)]
pub struct QueryResult {
    /// Worker that ran the query; `None` for records that never got routed.
    pub worker: Option<usize>,
    /// Execution latency, or why there is none.
    pub outcome: Result<Duration, QueryError>,
}

impl QueryResult {
    pub fn executed(worker: usize, outcome: Result<Duration, QueryError>) -> Self {
        Self {
            worker: Some(worker),
            outcome,
        }
    }

    pub fn unrouted(error: QueryError) -> Self {
        Self {
            worker: None,
            outcome: Err(error),
        }
    }
}

/// Where the aggregator reports failed records.
pub trait ErrorSink: Send + Sync {
    fn record(&self, worker: Option<usize>, error: &QueryError);
}

/// Logs every failed record at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn record(&self, worker: Option<usize>, error: &QueryError) {
        match worker {
            Some(worker) => warn!(worker, error = %error, "execution error"),
            None => warn!(error = %error, "skipped input record"),
        }
    }
}

/// Raw numbers of a finished run. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "bench_concurrency")]
    pub concurrency: usize,
    #[serde(rename = "bench_duration")]
    pub duration: f64,
    pub queries_per_worker: Vec<u64>,
    #[serde(rename = "queries_error")]
    pub queries_err: u64,
    pub queries_ok: u64,
    #[serde(rename = "min_latency")]
    pub min: f64,
    #[serde(rename = "mean_latency")]
    pub mean: f64,
    #[serde(rename = "median_latency")]
    pub median: f64,
    #[serde(rename = "p90_latency")]
    pub p90: f64,
    #[serde(rename = "p95_latency")]
    pub p95: f64,
    #[serde(rename = "p99_latency")]
    pub p99: f64,
    #[serde(rename = "max_latency")]
    pub max: f64,
    #[serde(rename = "latency_sum")]
    pub sum: f64,
}

impl Report {
    /// Total records accounted for, successful or not.
    pub fn queries_total(&self) -> u64 {
        self.queries_ok + self.queries_err
    }

    /// Failed share of all records in percent, rounded up.
    pub fn error_rate(&self) -> u64 {
        let total = self.queries_total();
        if total == 0 {
            return 0;
        }
        (self.queries_err * 100).div_ceil(total)
    }

    /// Render the report, as pretty JSON when `json` is set.
    pub fn print(&self, w: &mut impl Write, json: bool) -> io::Result<()> {
        if json {
            serde_json::to_writer_pretty(&mut *w, self)?;
            return writeln!(w);
        }
        self.write_text(w)
    }

    fn write_text(&self, w: &mut impl Write) -> io::Result<()> {
        let per_worker = self
            .queries_per_worker
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        writeln!(w)?;
        writeln!(w, "Benchmark duration: {:.3} ms", self.duration)?;
        writeln!(w, "Concurrency Level:  {} workers", self.concurrency)?;
        writeln!(w, "Queries per worker: [{}]", per_worker)?;
        writeln!(w)?;
        writeln!(w, "Completed queries:  {}", self.queries_ok)?;
        writeln!(
            w,
            "Failed queries:     {} ({}% error rate)",
            self.queries_err,
            self.error_rate()
        )?;
        writeln!(w)?;
        writeln!(w, "Measured query latency:")?;
        for (label, value) in [
            ("Min:   ", self.min),
            ("Mean:  ", self.mean),
            ("Median:", self.median),
            ("p90:   ", self.p90),
            ("p95:   ", self.p95),
            ("p99:   ", self.p99),
            ("Max:   ", self.max),
            ("Sum:   ", self.sum),
        ] {
            writeln!(w, "  {} {:.3} ms", label, value)?;
        }
        Ok(())
    }
}

/// Running totals, folded into a `Report` once the stream ends.
struct Aggregator {
    concurrency: usize,
    queries_per_worker: Vec<u64>,
    queries_ok: u64,
    queries_err: u64,
    min: f64,
    max: f64,
    sum: f64,
    quantiles: TargetedQuantiles,
}

impl Aggregator {
    fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            queries_per_worker: vec![0; concurrency],
            queries_ok: 0,
            queries_err: 0,
            min: f64::MAX,
            max: 0.0,
            sum: 0.0,
            quantiles: TargetedQuantiles::new(&LATENCY_TARGETS),
        }
    }

    fn add(&mut self, result: QueryResult, sink: &dyn ErrorSink) {
        if let Some(count) = result
            .worker
            .and_then(|worker| self.queries_per_worker.get_mut(worker))
        {
            *count += 1;
        }

        let latency = match result.outcome {
            Ok(latency) => duration_to_ms(latency),
            Err(e) => {
                sink.record(result.worker, &e);
                self.queries_err += 1;
                return;
            }
        };

        self.queries_ok += 1;
        self.quantiles.insert(latency);
        self.sum += latency;
        self.max = self.max.max(latency);
        self.min = self.min.min(latency);
    }

    fn finish(mut self, elapsed: Duration) -> Report {
        let mut report = Report {
            concurrency: self.concurrency,
            duration: duration_to_ms(elapsed),
            queries_per_worker: self.queries_per_worker,
            queries_err: self.queries_err,
            queries_ok: self.queries_ok,
            min: 0.0,
            mean: 0.0,
            median: 0.0,
            p90: 0.0,
            p95: 0.0,
            p99: 0.0,
            max: 0.0,
            sum: 0.0,
        };
        // Without a single success every latency field stays at zero.
        if self.queries_ok == 0 {
            return report;
        }

        report.min = self.min;
        report.max = self.max;
        report.sum = self.sum;
        report.mean = self.sum / self.queries_ok as f64;
        report.median = self.quantiles.query(0.50);
        report.p90 = self.quantiles.query(0.90);
        report.p95 = self.quantiles.query(0.95);
        report.p99 = self.quantiles.query(0.99);
        report
    }
}

/// Drain `results` until every sender is gone and build the report.
///
/// The run duration is measured from the call until the channel closes.
pub async fn read_results(
    concurrency: usize,
    mut results: mpsc::Receiver<QueryResult>,
    sink: &dyn ErrorSink,
) -> Report {
    let start = Instant::now();
    let mut aggregator = Aggregator::new(concurrency);

    while let Some(result) = results.recv().await {
        aggregator.add(result, sink);
    }

    let report = aggregator.finish(start.elapsed());
    info!(
        ok = report.queries_ok,
        errors = report.queries_err,
        duration_ms = report.duration,
        "result stream closed"
    );
    report
}

fn duration_to_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}
