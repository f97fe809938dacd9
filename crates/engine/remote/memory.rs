use super::{CheckpointQuery, CheckpointReader, Destination, ReadRequest, Source};
use crate::{
    error::EndpointError,
    types::{Label, METRIC_NAME_LABEL, Sample, TimeRange, TimeSeries},
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Request counters of a [`MemoryStorage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub read_attempts: u64,
    pub write_attempts: u64,
    /// Samples accepted by successful writes, duplicates included.
    pub samples_written: u64,
}

#[derive(Debug)]
struct Fault {
    range: TimeRange,
    error: EndpointError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct Inner {
    series: BTreeMap<Vec<Label>, BTreeMap<i64, f64>>,
    stats: StorageStats,
    read_faults: Vec<Fault>,
    write_faults: Vec<Fault>,
    read_delay: Duration,
    write_delay: Duration,
}

/// In-process storage usable as source, destination and checkpoint reader.
///
/// Samples are keyed by label set and timestamp, so rewriting a sample is
/// idempotent. Selectors are not evaluated: every stored series is returned.
/// Faults can be injected per time range to exercise the failure policies.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(series: impl IntoIterator<Item = TimeSeries>) -> Self {
        let storage = Self::new();
        for series in series {
            storage.insert(series);
        }
        storage
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, series: TimeSeries) {
        let mut inner = self.inner();
        let stored = inner.series.entry(series.labels).or_default();
        for sample in series.samples {
            stored.insert(sample.timestamp_ms, sample.value);
        }
    }

    /// Fails reads overlapping `range`, `times` times or forever with `None`.
    pub fn fail_reads(&self, range: TimeRange, error: EndpointError, times: Option<u32>) {
        self.inner().read_faults.push(Fault {
            range,
            error,
            remaining: times,
        });
    }

    /// Fails writes carrying a sample inside `range`.
    pub fn fail_writes(&self, range: TimeRange, error: EndpointError, times: Option<u32>) {
        self.inner().write_faults.push(Fault {
            range,
            error,
            remaining: times,
        });
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.inner().read_delay = delay;
    }

    /// Holds every write for `delay` before it is applied.
    pub fn set_write_delay(&self, delay: Duration) {
        self.inner().write_delay = delay;
    }

    pub fn stats(&self) -> StorageStats {
        self.inner().stats
    }

    pub fn series(&self) -> Vec<TimeSeries> {
        self.inner()
            .series
            .iter()
            .map(|(labels, samples)| stored_series(labels, samples, None))
            .collect()
    }

    /// Stored series whose metric name is `name`.
    pub fn series_named(&self, name: &str) -> Vec<TimeSeries> {
        self.series()
            .into_iter()
            .filter(|series| series.metric_name() == Some(name))
            .collect()
    }

    /// Distinct stored samples across all series.
    pub fn sample_count(&self) -> usize {
        self.inner().series.values().map(BTreeMap::len).sum()
    }
}

fn stored_series(
    labels: &[Label],
    samples: &BTreeMap<i64, f64>,
    range: Option<&TimeRange>,
) -> TimeSeries {
    let samples = samples
        .iter()
        .filter(|(timestamp, _)| range.is_none_or(|range| range.contains(**timestamp)))
        .map(|(timestamp, value)| Sample::new(*timestamp, *value))
        .collect();
    TimeSeries {
        labels: labels.to_vec(),
        samples,
    }
}

fn overlaps(a: &TimeRange, b: &TimeRange) -> bool {
    a.start_ms < b.end_ms && b.start_ms < a.end_ms
}

/// Consumes the first fault matching `hit` and returns its error.
fn take_fault(
    faults: &mut Vec<Fault>,
    hit: impl Fn(&TimeRange) -> bool,
) -> Option<EndpointError> {
    let position = faults.iter().position(|fault| hit(&fault.range))?;
    let fault = faults.get_mut(position)?;
    let error = fault.error.clone();
    let exhausted = match fault.remaining.as_mut() {
        Some(remaining) => {
            *remaining = remaining.saturating_sub(1);
            *remaining == 0
        }
        None => false,
    };
    if exhausted {
        faults.remove(position);
    }
    Some(error)
}

#[async_trait::async_trait]
impl Source for MemoryStorage {
    async fn read(&self, request: ReadRequest) -> Result<Vec<TimeSeries>, EndpointError> {
        let delay = {
            let mut inner = self.inner();
            inner.stats.read_attempts += 1;
            if let Some(error) =
                take_fault(&mut inner.read_faults, |range| overlaps(range, &request.range))
            {
                return Err(error);
            }
            inner.read_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(self
            .inner()
            .series
            .iter()
            .map(|(labels, samples)| stored_series(labels, samples, Some(&request.range)))
            .filter(|series| !series.samples.is_empty())
            .collect())
    }
}

#[async_trait::async_trait]
impl Destination for MemoryStorage {
    async fn write(&self, series: &[TimeSeries]) -> Result<(), EndpointError> {
        let delay = {
            let mut inner = self.inner();
            inner.stats.write_attempts += 1;
            let hit = |range: &TimeRange| {
                series
                    .iter()
                    .flat_map(|series| &series.samples)
                    .any(|sample| range.contains(sample.timestamp_ms))
            };
            if let Some(error) = take_fault(&mut inner.write_faults, hit) {
                return Err(error);
            }
            inner.write_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.inner().stats.samples_written += crate::types::sample_count(series) as u64;
        for series in series {
            self.insert(series.clone());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CheckpointReader for MemoryStorage {
    async fn latest_checkpoint(
        &self,
        query: &CheckpointQuery,
    ) -> Result<Option<i64>, EndpointError> {
        let start = query.start_s.to_string();
        let end = query.end_s.to_string();
        let latest = self
            .series_named(&query.metric_name)
            .into_iter()
            .filter(|series| {
                series.label("job") == Some(query.job.as_str())
                    && series.label("si") == Some(start.as_str())
                    && series.label("ei") == Some(end.as_str())
            })
            .flat_map(|series| series.samples)
            .map(|sample| sample.value)
            .fold(None, |max: Option<f64>, value| {
                Some(max.map_or(value, |max| max.max(value)))
            });
        Ok(latest.map(|seconds| (seconds * 1000.0).round() as i64))
    }
}
