//! Postgres query latency benchmark.
//!
//! Replays a CSV file of `(hostname, start_time, end_time)` parameters for a
//! fixed TimescaleDB query across a pool of connections. Queries for one
//! hostname always run on the same connection, in input order. Latencies are
//! aggregated on the fly into a [`Report`] with approximate quantiles, so
//! memory use does not grow with the size of the input.
//!
//! ```text
//! input -> dispatcher -> worker queues -> workers -> results -> aggregator -> report
//! ```

pub mod bench;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod quantile;
pub mod query;
pub mod report;
pub mod worker;

pub use bench::{run_bench, BenchConfig};
pub use db::{wait_for, Connection, Connector, PgConnector};
pub use error::{BenchError, DbError, ParseError, QueryError};
pub use query::{route, Query, QueryParser};
pub use report::{read_results, ErrorSink, LogSink, QueryResult, Report};
