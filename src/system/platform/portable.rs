//! Development backend for targets without the native enumeration API.
//!
//! Only what `sysinfo` exposes portably is reported: resident memory as the
//! working set and accumulated CPU time as user time. Other counters are zero.

use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroUsize;
use std::path::Path;
use std::thread;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::{AddressSpace, AttachedProcess, PlatformExtensions};
use crate::error::CollectorError;
use crate::system::memory::MemoryCounters;
use crate::system::process::{ProcessEntry, ProcessIdentity};
use crate::system::source::ProcessSource;

const TICKS_PER_MS: u64 = 10_000;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct Platform;

impl PlatformExtensions for Platform {
    type Attached = PolledProcess;

    fn open_exclusive(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    }

    fn attach(pid: u32) -> Result<PolledProcess, CollectorError> {
        let mut sys = System::new();
        if !refresh_one(&mut sys, pid) {
            return Err(CollectorError::SampleUnavailable { pid });
        }
        Ok(PolledProcess { sys, pid })
    }

    fn address_space() -> Option<AddressSpace> {
        None
    }
}

/// Exit detection by polling; no exit code is available for non-children.
pub struct PolledProcess {
    sys: System,
    pid: u32,
}

impl AttachedProcess for PolledProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn wait(mut self) -> Option<i32> {
        while refresh_one(&mut self.sys, self.pid) {
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        None
    }
}

fn refresh_one(sys: &mut System, pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_some()
}

pub struct NativeSource {
    sys: System,
    processors: usize,
}

impl Default for NativeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeSource {
    pub fn new() -> Self {
        NativeSource {
            sys: System::new(),
            processors: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

impl ProcessSource for NativeSource {
    fn enumerate(&mut self) -> Result<Vec<ProcessEntry>, CollectorError> {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );

        let mut entries: Vec<ProcessEntry> = self
            .sys
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| ProcessEntry {
                identity: ProcessIdentity {
                    pid: pid.as_u32(),
                    ppid: process.parent().map(|p| p.as_u32()).unwrap_or(0),
                    name: process.name().to_string_lossy().to_string(),
                },
                kernel_time: 0,
                user_time: process.accumulated_cpu_time() * TICKS_PER_MS,
            })
            .collect();

        if entries.is_empty() {
            return Err(CollectorError::Enumeration(
                "process table is empty".to_string(),
            ));
        }
        // The OS gives no order here; sort so consecutive listings compare.
        entries.sort_unstable_by_key(ProcessEntry::pid);
        Ok(entries)
    }

    fn sample_memory(&mut self, pid: u32) -> Result<MemoryCounters, CollectorError> {
        let process = self
            .sys
            .process(Pid::from_u32(pid))
            .ok_or(CollectorError::SampleUnavailable { pid })?;
        Ok(MemoryCounters {
            working_set_size: process.memory(),
            ..MemoryCounters::default()
        })
    }

    fn logical_processors(&self) -> usize {
        self.processors
    }
}
