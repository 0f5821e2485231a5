use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};

use crate::error::CollectorError;
use crate::session_log::SessionLog;

use super::cpu::{CpuEstimator, CpuTimes};
use super::history::{ProcessSample, TimeSeriesStore};
use super::memory;
use super::process::ProcessIdentity;
use super::snapshot::Snapshot;
use super::source::ProcessSource;
use super::subtree;

/// What one tick produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub matched: usize,
    pub sampled: usize,
}

/// Runs ticks against a process source: snapshot, resolve the subtree of the
/// monitored process, sample it and append to the store.
pub struct Collector<S> {
    source: S,
    root_pid: u32,
    self_pid: u32,
    estimator: CpuEstimator,
    store: TimeSeriesStore,
    log: SessionLog,
    log_listing_changes: bool,
    last_listing: Option<Vec<ProcessIdentity>>,
    ticks: u64,
    failed_ticks: u64,
}

impl<S: ProcessSource> Collector<S> {
    pub fn new(source: S, root_pid: u32, self_pid: u32) -> Self {
        let estimator = CpuEstimator::new(source.logical_processors());
        Collector {
            source,
            root_pid,
            self_pid,
            estimator,
            store: TimeSeriesStore::new(),
            log: SessionLog::disabled(),
            log_listing_changes: true,
            last_listing: None,
            ticks: 0,
            failed_ticks: 0,
        }
    }

    pub fn with_session_log(mut self, log: SessionLog) -> Self {
        self.log = log;
        self
    }

    /// Whether to dump the full process list to the session log when it changes.
    pub fn log_process_list_changes(mut self, enabled: bool) -> Self {
        self.log_listing_changes = enabled;
        self
    }

    pub fn root_pid(&self) -> u32 {
        self.root_pid
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks
    }

    pub fn into_parts(self) -> (TimeSeriesStore, SessionLog) {
        (self.store, self.log)
    }

    /// Reads the whole process table.
    pub fn take_snapshot(&mut self) -> Result<Snapshot, CollectorError> {
        let snapshot = Snapshot::from_entries(self.source.enumerate()?);

        if self.log_listing_changes && self.last_listing.as_ref() != Some(&snapshot.listing) {
            tracing::debug!(processes = snapshot.len(), "process list changed");
            self.log.process_list(&snapshot.listing);
            self.last_listing = Some(snapshot.listing.clone());
        }

        Ok(snapshot)
    }

    /// One tick at wall-clock time `at`. Every sample of the tick carries the
    /// same timestamp. An enumeration failure skips the tick.
    pub fn tick(&mut self, at: SystemTime) -> Result<TickSummary, CollectorError> {
        self.ticks += 1;
        let local: DateTime<Local> = at.into();

        let snapshot = match self.take_snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.failed_ticks += 1;
                tracing::warn!(error = %err, "tick skipped");
                self.log.enumeration_failed(&local, &err);
                return Err(err);
            }
        };

        self.log.tick(&local, self.root_pid);

        let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or_default();
        let timestamp = since_epoch.as_millis() as u64;
        let wall_clock = (since_epoch.as_nanos() / 100) as u64;

        let matched: Vec<_> = subtree::resolve(&snapshot, self.root_pid, self.self_pid)
            .into_iter()
            .filter_map(|pid| snapshot.get(pid))
            .collect();
        let seen: HashSet<ProcessIdentity> =
            matched.iter().map(|entry| entry.identity.clone()).collect();

        let sampled = memory::sample_matched(&mut self.source, matched.iter().copied());
        let summary = TickSummary {
            matched: matched.len(),
            sampled: sampled.len(),
        };

        for (entry, counters) in sampled {
            let cpu_usage = self.estimator.sample(
                &entry.identity,
                CpuTimes {
                    wall_clock,
                    kernel: entry.kernel_time,
                    user: entry.user_time,
                },
            );
            self.log.process(&entry.identity, &counters, cpu_usage);
            self.store.append(
                entry.identity.clone(),
                ProcessSample {
                    timestamp,
                    cpu_usage,
                    memory: counters,
                },
            );
        }

        self.estimator.retain(&seen);
        tracing::trace!(matched = summary.matched, sampled = summary.sampled, "tick done");
        Ok(summary)
    }
}
