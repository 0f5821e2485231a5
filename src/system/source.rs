use std::collections::{HashMap, VecDeque};

use crate::error::CollectorError;

use super::memory::MemoryCounters;
use super::process::ProcessEntry;

/// Access to the operating system's process table and per-process counters.
pub trait ProcessSource {
    /// Every process running right now, in the OS's enumeration order.
    fn enumerate(&mut self) -> Result<Vec<ProcessEntry>, CollectorError>;

    /// Current memory counters of `pid`, or `SampleUnavailable`.
    fn sample_memory(&mut self, pid: u32) -> Result<MemoryCounters, CollectorError>;

    fn logical_processors(&self) -> usize;
}

/// A source that replays prepared process tables, one per `enumerate` call.
///
/// Once the script runs out, the last table is repeated. Pids without
/// configured counters report `SampleUnavailable`.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    ticks: VecDeque<Result<Vec<ProcessEntry>, String>>,
    last: Vec<ProcessEntry>,
    memory: HashMap<u32, MemoryCounters>,
    processors: usize,
    enumerations: usize,
}

impl ScriptedSource {
    pub fn new(processors: usize) -> Self {
        ScriptedSource {
            processors,
            ..Default::default()
        }
    }

    pub fn push_tick(&mut self, entries: Vec<ProcessEntry>) -> &mut Self {
        self.ticks.push_back(Ok(entries));
        self
    }

    pub fn push_failure(&mut self, reason: impl Into<String>) -> &mut Self {
        self.ticks.push_back(Err(reason.into()));
        self
    }

    pub fn set_memory(&mut self, pid: u32, counters: MemoryCounters) -> &mut Self {
        self.memory.insert(pid, counters);
        self
    }

    pub fn remove_memory(&mut self, pid: u32) -> &mut Self {
        self.memory.remove(&pid);
        self
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations
    }
}

impl ProcessSource for ScriptedSource {
    fn enumerate(&mut self) -> Result<Vec<ProcessEntry>, CollectorError> {
        self.enumerations += 1;
        match self.ticks.pop_front() {
            Some(Ok(entries)) => {
                self.last = entries.clone();
                Ok(entries)
            }
            Some(Err(reason)) => Err(CollectorError::Enumeration(reason)),
            None => Ok(self.last.clone()),
        }
    }

    fn sample_memory(&mut self, pid: u32) -> Result<MemoryCounters, CollectorError> {
        self.memory
            .get(&pid)
            .copied()
            .ok_or(CollectorError::SampleUnavailable { pid })
    }

    fn logical_processors(&self) -> usize {
        self.processors
    }
}
