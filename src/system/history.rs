use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize, Serializer};

use super::memory::MemoryCounters;
use super::process::ProcessIdentity;

/// One observation of one process in one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    /// Tick wall-clock time, milliseconds since the Unix epoch.
    #[serde(rename = "time")]
    pub timestamp: u64,
    #[serde(rename = "cpuUsage", serialize_with = "whole_percent")]
    pub cpu_usage: f64,
    pub memory: MemoryCounters,
}

fn whole_percent<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let rounded = if value.is_finite() { value.round().max(0.0) } else { 0.0 };
    serializer.serialize_u64(rounded as u64)
}

/// Which memory counter decides a process's peak.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakMetric {
    #[default]
    WorkingSet,
    Pagefile,
}

impl PeakMetric {
    pub fn of(self, memory: &MemoryCounters) -> u64 {
        match self {
            PeakMetric::WorkingSet => memory.working_set_size,
            PeakMetric::Pagefile => memory.pagefile_usage,
        }
    }
}

/// Append-only per-identity time series for the whole run.
#[derive(Debug, Default)]
pub struct TimeSeriesStore {
    entries: HashMap<ProcessIdentity, Vec<ProcessSample>>,
}

impl TimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `sample` to the identity's series, keeping timestamps non-decreasing.
    pub fn append(&mut self, identity: ProcessIdentity, sample: ProcessSample) {
        let series = self.entries.entry(identity).or_default();
        match series.last() {
            Some(last) if last.timestamp > sample.timestamp => {
                let at = series.partition_point(|s| s.timestamp <= sample.timestamp);
                series.insert(at, sample);
            }
            _ => series.push(sample),
        }
    }

    pub fn series(&self, identity: &ProcessIdentity) -> Option<&[ProcessSample]> {
        self.entries.get(identity).map(Vec::as_slice)
    }

    pub fn all_series(&self) -> &HashMap<ProcessIdentity, Vec<ProcessSample>> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Every series with its time span and peak, in display order.
    pub fn summaries(&self, metric: PeakMetric) -> Vec<SeriesSummary<'_>> {
        let mut summaries: Vec<SeriesSummary<'_>> = self
            .entries
            .iter()
            .map(|(identity, samples)| SeriesSummary::new(identity, samples, metric))
            .collect();
        summaries.sort();
        summaries
    }
}

/// Derived view of one series used to order artifacts.
#[derive(Clone, Debug)]
pub struct SeriesSummary<'a> {
    pub identity: &'a ProcessIdentity,
    pub samples: &'a [ProcessSample],
    pub start_time: u64,
    pub end_time: u64,
    pub peak: u64,
}

impl<'a> SeriesSummary<'a> {
    fn new(identity: &'a ProcessIdentity, samples: &'a [ProcessSample], metric: PeakMetric) -> Self {
        let mut start_time = u64::MAX;
        let mut end_time = 0;
        let mut peak = 0;
        for sample in samples {
            start_time = start_time.min(sample.timestamp);
            end_time = end_time.max(sample.timestamp);
            peak = peak.max(metric.of(&sample.memory));
        }
        SeriesSummary {
            identity,
            samples,
            start_time,
            end_time,
            peak,
        }
    }

    fn sort_key(&self) -> (u64, u64, u32, u32, &str) {
        (
            self.start_time,
            self.end_time,
            self.identity.pid,
            self.identity.ppid,
            self.identity.name.as_str(),
        )
    }
}

/// Display order: start time, then end time, then pid, then parent pid.
/// The image name breaks the remaining ties so the order is total.
impl Ord for SeriesSummary<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for SeriesSummary<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SeriesSummary<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for SeriesSummary<'_> {}
