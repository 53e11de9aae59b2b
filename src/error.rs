//! Error types shared by the benchmark pipeline.
//!
//! Errors fall in two buckets: `BenchError` aborts the whole run, while
//! `QueryError` travels on the result channel and only bumps the report's
//! error counter.

/// Error returned by a database driver.
pub type DbError = Box<dyn std::error::Error + Send + Sync>;

/// Fatal errors: any of these aborts the run and no report is produced.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("worker count must be at least 1")]
    InvalidConcurrency,

    #[error("queue capacity must be at least 1")]
    InvalidQueueSize,

    #[error("cannot open input: {0}")]
    Open(#[source] std::io::Error),

    #[error("cannot read input at line {line}: {source}")]
    Read {
        line: usize,
        source: std::io::Error,
    },

    #[error("cannot open input: missing header line")]
    MissingHeader,

    #[error("database unavailable")]
    DatabaseUnavailable,

    #[error("worker {worker} failed to connect: {source}")]
    Connect { worker: usize, source: DbError },

    #[error("worker {worker} failed to prepare statement {statement}: {source}")]
    Prepare {
        worker: usize,
        statement: &'static str,
        source: DbError,
    },

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A malformed input record. Line numbers are 1-based and count the header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("record on line {line}: wrong number of fields")]
    FieldCount { line: usize },

    #[error("record on line {line}: extraneous or missing \" in quoted-field")]
    Quote { line: usize },

    #[error("record on line {line}: invalid UTF-8")]
    Encoding { line: usize },
}

/// Per-record failure, counted in the report without stopping the run.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Execution(DbError),
}
