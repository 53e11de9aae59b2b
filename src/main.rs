use clap::Parser;
use pg_latency_bench::bench::{
    DEFAULT_CONCURRENCY, DEFAULT_RESULT_QUEUE_SIZE, DEFAULT_WORKER_QUEUE_SIZE,
};
use pg_latency_bench::db::DEFAULT_RETRY_INTERVAL;
use pg_latency_bench::{
    run_bench, wait_for, BenchConfig, BenchError, LogSink, PgConnector, QueryParser,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Postgres query latency benchmark for the cpu_usage time_bucket query")]
struct Args {
    /// Input CSV file (hostname,start_time,end_time), '-' for stdin
    #[arg(default_value = "-")]
    input: String,

    /// Number of connections to spread the queries across
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Seconds to wait for the database to accept connections
    #[arg(long, default_value_t = 30)]
    database_wait: u64,

    /// Output the report in JSON format
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Capacity of each worker's query queue
    #[arg(long, default_value_t = DEFAULT_WORKER_QUEUE_SIZE)]
    worker_queue_size: usize,

    /// Capacity of the shared result queue
    #[arg(long, default_value_t = DEFAULT_RESULT_QUEUE_SIZE)]
    result_queue_size: usize,

    /// Enable verbose logging (per-worker lifecycle)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "warn,pg_latency_bench=debug"
    } else {
        "warn,pg_latency_bench=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = BenchConfig::new(args.concurrency)
        .with_worker_queue_size(args.worker_queue_size)
        .with_result_queue_size(args.result_queue_size);
    config.validate()?;

    info!(
        input = %args.input,
        concurrency = config.concurrency,
        database_wait_secs = args.database_wait,
        "--- Postgres query latency benchmark ---"
    );

    let connector = Arc::new(PgConnector::new(args.database_url.as_str()));
    wait_for(
        connector.as_ref(),
        Duration::from_secs(args.database_wait),
        DEFAULT_RETRY_INTERVAL,
    )
    .await?;

    let parser = QueryParser::new(open_input(&args.input).await?).await?;
    let report = run_bench(&config, parser, connector, &LogSink).await?;

    report.print(&mut std::io::stdout().lock(), args.json)?;
    Ok(())
}

async fn open_input(
    path: &str,
) -> Result<Box<dyn AsyncBufRead + Unpin + Send>, BenchError> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .map_err(BenchError::Open)?;
    Ok(Box::new(BufReader::new(file)))
}
