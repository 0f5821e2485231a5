use serde::{Deserialize, Serialize};

use crate::error::CollectorError;

use super::process::ProcessEntry;
use super::source::ProcessSource;

/// Memory accounting counters of one process, in bytes (page faults are a count).
///
/// Field order is the order written to the JSON artifact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCounters {
    pub page_fault_count: u64,
    pub peak_working_set_size: u64,
    pub working_set_size: u64,
    pub quota_peak_paged_pool_usage: u64,
    pub quota_paged_pool_usage: u64,
    pub quota_peak_non_paged_pool_usage: u64,
    pub quota_non_paged_pool_usage: u64,
    pub pagefile_usage: u64,
    pub peak_pagefile_usage: u64,
    pub private_usage: u64,
}

/// Reads the counters of every matched process, skipping the ones that
/// cannot be opened this tick.
pub fn sample_matched<'a, S: ProcessSource + ?Sized>(
    source: &mut S,
    matched: impl IntoIterator<Item = &'a ProcessEntry>,
) -> Vec<(&'a ProcessEntry, MemoryCounters)> {
    let mut sampled = Vec::new();
    for entry in matched {
        match source.sample_memory(entry.pid()) {
            Ok(counters) => sampled.push((entry, counters)),
            Err(CollectorError::SampleUnavailable { pid }) => {
                tracing::trace!(pid, "memory counters unavailable");
            }
            Err(err) => {
                tracing::debug!(pid = entry.pid(), error = %err, "memory sampling failed");
            }
        }
    }
    sampled
}
