use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label carrying the metric name of a series.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Bytes accounted for every sample when estimating payload sizes.
const SAMPLE_SIZE_BYTES: usize = 16;

/// Half-open time interval `[start_ms, end_ms)` in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn width_ms(&self) -> i64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    pub fn is_empty(&self) -> bool {
        self.end_ms <= self.start_ms
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        self.start_ms <= timestamp_ms && timestamp_ms < self.end_ms
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_ms, self.end_ms)
    }
}

/// Renders timestamps for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    Rfc3339,
    Millis,
}

impl TimeFormat {
    pub fn from_human_readable(human_readable: bool) -> Self {
        if human_readable {
            Self::Rfc3339
        } else {
            Self::Millis
        }
    }

    pub fn timestamp(self, timestamp_ms: i64) -> String {
        match self {
            Self::Millis => timestamp_ms.to_string(),
            Self::Rfc3339 => DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
                .map(|instant| instant.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_else(|| timestamp_ms.to_string()),
        }
    }

    pub fn range(self, range: &TimeRange) -> String {
        format!(
            "[{}, {})",
            self.timestamp(range.start_ms),
            self.timestamp(range.end_ms)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// One series as exchanged with the endpoints: a label set and its samples.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: Vec<Label>,
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn new(mut labels: Vec<Label>, samples: Vec<Sample>) -> Self {
        labels.sort();
        Self { labels, samples }
    }

    pub fn metric_name(&self) -> Option<&str> {
        self.label(METRIC_NAME_LABEL)
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.value.as_str())
    }

    /// Estimated in-memory size, used to bound slabs.
    pub fn size_bytes(&self) -> usize {
        let label_bytes: usize = self
            .labels
            .iter()
            .map(|label| label.name.len() + label.value.len())
            .sum();
        label_bytes + self.samples.len() * SAMPLE_SIZE_BYTES
    }
}

pub fn payload_size(series: &[TimeSeries]) -> usize {
    series.iter().map(TimeSeries::size_bytes).sum()
}

pub fn sample_count(series: &[TimeSeries]) -> usize {
    series.iter().map(|series| series.samples.len()).sum()
}

/// Unit of pull work handed out by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub range: TimeRange,
}

/// Unit of push work: the payload of one or more consecutive blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Slab {
    pub first_block: u64,
    pub last_block: u64,
    pub range: TimeRange,
    pub series: Vec<TimeSeries>,
    pub size_bytes: usize,
}

impl Slab {
    pub fn block_count(&self) -> u64 {
        self.last_block - self.first_block + 1
    }

    pub fn sample_count(&self) -> usize {
        sample_count(&self.series)
    }

    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|series| series.samples.is_empty())
    }
}
