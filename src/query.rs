//! Query records, worker routing and the CSV input parser.

use crate::error::{BenchError, ParseError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

const FIELDS_PER_RECORD: usize = 3;
const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// One set of input parameters for the benchmark statement.
///
/// Timestamps are assumed valid and kept as strings; the database casts them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub hostname: String,
    pub start_time: String,
    pub end_time: String,
}

impl Query {
    pub fn new(
        hostname: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
        }
    }

    /// Partition key used for routing.
    pub fn key(&self) -> &str {
        &self.hostname
    }

    /// Index of the worker this query must run on.
    pub fn route(&self, concurrency: usize) -> usize {
        route(self.key(), concurrency)
    }
}

/// Map a partition key to a worker index in `[0, concurrency)`.
///
/// FNV-1a over the key bytes, so the mapping is stable across runs and
/// platforms. `concurrency` must be non-zero.
pub fn route(key: &str, concurrency: usize) -> usize {
    debug_assert!(concurrency > 0, "route called with zero workers");
    let hash = fnv1a_hash(key.as_bytes());
    // FNV's low bits only depend on the low bits of the input bytes.
    let folded = hash ^ (hash >> 32);
    (folded % concurrency as u64) as usize
}

fn fnv1a_hash(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Reads queries one by one from a CSV input with a header line.
pub struct QueryParser<R> {
    input: R,
    buf: Vec<u8>,
    line: usize,
}

impl<R: AsyncBufRead + Unpin> QueryParser<R> {
    /// Wrap `input` and consume its header line.
    pub async fn new(input: R) -> Result<Self, BenchError> {
        let mut parser = Self {
            input,
            buf: Vec::new(),
            line: 0,
        };
        while parser.read_line().await? {
            if !parser.is_blank() {
                return Ok(parser);
            }
        }
        Err(BenchError::MissingHeader)
    }

    /// Return the next record.
    ///
    /// `Ok(None)` marks the end of the input; a malformed record is reported
    /// as `Ok(Some(Err(_)))` so the caller can carry on with the next one.
    /// Only a failing read of the underlying input is an `Err`.
    pub async fn next_record(&mut self) -> Result<Option<Result<Query, ParseError>>, BenchError> {
        while self.read_line().await? {
            if self.is_blank() {
                continue;
            }
            let line = self.line;
            let record = match std::str::from_utf8(&self.buf) {
                Ok(text) => parse_line(text, line),
                Err(_) => Err(ParseError::Encoding { line }),
            };
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Read the next raw line into `buf`, without its `\n`. Returns `false` at
    /// the end of the input.
    async fn read_line(&mut self) -> Result<bool, BenchError> {
        self.buf.clear();
        let read = self
            .input
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(|source| BenchError::Read {
                line: self.line + 1,
                source,
            })?;
        if read == 0 {
            return Ok(false);
        }
        self.line += 1;
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        Ok(true)
    }

    fn is_blank(&self) -> bool {
        self.buf.iter().all(u8::is_ascii_whitespace)
    }
}

fn parse_line(text: &str, line: usize) -> Result<Query, ParseError> {
    let fields = split_fields(text).ok_or(ParseError::Quote { line })?;
    let [hostname, start_time, end_time]: [String; FIELDS_PER_RECORD] = fields
        .try_into()
        .map_err(|_| ParseError::FieldCount { line })?;
    Ok(Query {
        hostname,
        start_time,
        end_time,
    })
}

/// Split one CSV line, honouring double-quoted fields with `""` escapes.
/// Returns `None` on broken quoting.
fn split_fields(line: &str) -> Option<Vec<String>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = Vec::with_capacity(FIELDS_PER_RECORD);
    let mut chars = line.chars().peekable();

    loop {
        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return None,
                }
            }
            match chars.next() {
                Some(',') => fields.push(field),
                None => {
                    fields.push(field);
                    return Some(fields);
                }
                Some(_) => return None,
            }
        } else {
            loop {
                match chars.next() {
                    Some(',') => break,
                    Some('"') => return None,
                    Some(c) => field.push(c),
                    None => {
                        fields.push(field);
                        return Some(fields);
                    }
                }
            }
            fields.push(field);
        }
    }
}
