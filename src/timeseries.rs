//! Timeseries chunking
//!
//! Some APIs refuse to answer a query spanning an arbitrary time range, so a
//! request carrying a [`TimeseriesSpec`] is partitioned into fixed-width
//! `[start, end)` windows. Windows are computed with integer
//! [`chrono::Duration`] arithmetic so long ranges do not drift.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat};

use crate::config::TimeseriesSpec;

/// Chunking errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    /// Range bound parameter absent or repeated
    #[error("missing range bound: {name:?} must appear exactly once in the query (found {found})")]
    MissingRangeBound {
        /// Query parameter name
        name: String,
        /// Number of occurrences found
        found: usize,
    },

    /// Range bound could not be parsed with the layout
    #[error("failed to parse range bound {value:?} with layout {layout:?}: {reason}")]
    RangeParseError {
        /// Raw parameter value
        value: String,
        /// Layout used
        layout: String,
        /// Parser message
        reason: String,
    },

    /// Period is not positive or does not fit a duration
    #[error("invalid chunk period of {0} seconds")]
    InvalidPeriod(i64),
}

/// Time layout used to parse and format range bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeLayout {
    /// RFC3339, e.g. `2023-01-01T00:00:00Z`
    Rfc3339,
    /// A chrono `strftime` pattern
    Pattern(String),
}

impl TimeLayout {
    /// Layout configured on a spec, defaulting to RFC3339.
    pub fn from_spec(spec: &TimeseriesSpec) -> Self {
        match spec.layout.as_deref() {
            None | Some("") | Some("rfc3339") | Some("RFC3339") => TimeLayout::Rfc3339,
            Some(pattern) => TimeLayout::Pattern(pattern.to_string()),
        }
    }

    /// Parse a bound. Patterns without an offset are read as UTC.
    pub fn parse(&self, value: &str) -> Result<DateTime<FixedOffset>, ChunkError> {
        let parse_error = |reason: String| ChunkError::RangeParseError {
            value: value.to_string(),
            layout: self.to_string(),
            reason,
        };

        match self {
            TimeLayout::Rfc3339 => {
                DateTime::parse_from_rfc3339(value).map_err(|e| parse_error(e.to_string()))
            }
            TimeLayout::Pattern(pattern) => {
                let with_offset = match DateTime::parse_from_str(value, pattern) {
                    Ok(dt) => return Ok(dt),
                    Err(e) => e,
                };
                if let Ok(naive) = NaiveDateTime::parse_from_str(value, pattern) {
                    return Ok(naive.and_utc().fixed_offset());
                }
                if let Ok(date) = NaiveDate::parse_from_str(value, pattern) {
                    if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                        return Ok(naive.and_utc().fixed_offset());
                    }
                }
                Err(parse_error(with_offset.to_string()))
            }
        }
    }

    /// Format a bound.
    pub fn format(&self, value: &DateTime<FixedOffset>) -> String {
        match self {
            TimeLayout::Rfc3339 => value.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            TimeLayout::Pattern(pattern) => value.format(pattern).to_string(),
        }
    }
}

impl std::fmt::Display for TimeLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeLayout::Rfc3339 => write!(f, "RFC3339"),
            TimeLayout::Pattern(pattern) => write!(f, "{pattern}"),
        }
    }
}

/// One `[start, end)` window of a timeseries query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Inclusive start
    pub start: DateTime<FixedOffset>,
    /// Exclusive end
    pub end: DateTime<FixedOffset>,
}

impl Chunk {
    /// Window width.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

fn single_value<'a>(query: &'a [(String, String)], name: &str) -> Result<&'a str, ChunkError> {
    let values: Vec<&str> = query
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .collect();
    match values.as_slice() {
        [value] => Ok(*value),
        _ => Err(ChunkError::MissingRangeBound {
            name: name.to_string(),
            found: values.len(),
        }),
    }
}

/// Partition the range named by `spec` in `query` into windows.
///
/// A range whose start is not before its end yields no windows.
pub fn chunk_range(
    query: &[(String, String)],
    spec: &TimeseriesSpec,
) -> Result<Vec<Chunk>, ChunkError> {
    let layout = TimeLayout::from_spec(spec);
    let start = layout.parse(single_value(query, &spec.start_name)?)?;
    let end = layout.parse(single_value(query, &spec.end_name)?)?;
    let period = spec
        .chunk_width()
        .ok_or(ChunkError::InvalidPeriod(spec.period))?;
    Ok(split(start, end, period))
}

/// Split `[start, end)` into windows of `period`; the last one is truncated.
pub fn split(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    period: Duration,
) -> Vec<Chunk> {
    if period <= Duration::zero() || start >= end {
        return Vec::new();
    }

    let capacity = ((end - start).num_seconds() / period.num_seconds().max(1)) as usize + 1;
    let mut chunks = Vec::with_capacity(capacity.min(1 << 16));
    let mut cursor = start;
    while cursor < end {
        let next = match cursor.checked_add_signed(period) {
            Some(next) if next < end => next,
            _ => end,
        };
        chunks.push(Chunk {
            start: cursor,
            end: next,
        });
        cursor = next;
    }
    chunks
}
