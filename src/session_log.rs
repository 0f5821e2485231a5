use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use sysinfo::System;

use crate::error::CollectorError;
use crate::format::format_bytes;
use crate::system::memory::MemoryCounters;
use crate::system::platform::{self, AddressSpace};
use crate::system::process::ProcessIdentity;

/// Machine facts written once at the top of the session log.
#[derive(Clone, Debug)]
pub struct SessionHeader {
    pub collector_pid: u32,
    pub started_at: DateTime<Local>,
    pub host_name: String,
    pub memory_load_percent: u64,
    pub total_memory: u64,
    pub free_memory: u64,
    pub total_swap: u64,
    pub free_swap: u64,
    pub virtual_memory: Option<AddressSpace>,
}

impl SessionHeader {
    pub fn capture(collector_pid: u32) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let total_memory = sys.total_memory();
        let free_memory = sys.available_memory();
        let memory_load_percent = match total_memory {
            0 => 0,
            total => (total - free_memory.min(total)) * 100 / total,
        };

        SessionHeader {
            collector_pid,
            started_at: Local::now(),
            host_name: System::host_name().unwrap_or_default(),
            memory_load_percent,
            total_memory,
            free_memory,
            total_swap: sys.total_swap(),
            free_swap: sys.free_swap(),
            virtual_memory: platform::address_space(),
        }
    }
}

/// Human-readable, append-only record of a collection run.
///
/// A write failure disables the log for the rest of the run; sampling is
/// never affected by it.
pub struct SessionLog {
    writer: Option<Box<dyn Write + Send>>,
    path: Option<PathBuf>,
}

impl SessionLog {
    pub fn create(path: &Path) -> Result<Self, CollectorError> {
        let file = platform::open_exclusive(path)
            .map_err(|err| CollectorError::io("session log", path, err))?;
        Ok(SessionLog {
            writer: Some(Box::new(BufWriter::new(file))),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        SessionLog {
            writer: Some(Box::new(writer)),
            path: None,
        }
    }

    /// A log that drops everything.
    pub fn disabled() -> Self {
        SessionLog {
            writer: None,
            path: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn header(&mut self, header: &SessionHeader) {
        self.emit(|w| {
            let pid = header.collector_pid;
            writeln!(w, "Onlooker PID: 0x{pid:X} ({pid})")?;
            writeln!(
                w,
                "Time: {} ({})",
                header.started_at.timestamp_millis(),
                header.started_at.format("%Y-%m-%d %H:%M:%S%.3f")
            )?;
            writeln!(w, "Computer name: {}", header.host_name)?;
            writeln!(w, "There is {} percent of memory in use.", header.memory_load_percent)?;
            writeln!(w, "There are {} total of physical memory.", format_bytes(header.total_memory))?;
            writeln!(w, "There are {} free of physical memory.", format_bytes(header.free_memory))?;
            writeln!(w, "There are {} total of paging file.", format_bytes(header.total_swap))?;
            writeln!(w, "There are {} free of paging file.", format_bytes(header.free_swap))?;
            if let Some(space) = header.virtual_memory {
                writeln!(w, "There are {} total of virtual memory.", format_bytes(space.total))?;
                writeln!(w, "There are {} free of virtual memory.", format_bytes(space.available))?;
            }
            writeln!(w)
        });
    }

    pub fn process_list(&mut self, listing: &[ProcessIdentity]) {
        self.emit(|w| {
            writeln!(w, "Updated process list:")?;
            for identity in listing {
                writeln!(
                    w,
                    "  \"{}\" (PID: {}, Parent: {})",
                    identity.name, identity.pid, identity.ppid
                )?;
            }
            Ok(())
        });
    }

    pub fn tick(&mut self, at: &DateTime<Local>, monitored_pid: u32) {
        self.emit(|w| {
            writeln!(
                w,
                "[{}] Tracked processes (monitored: {monitored_pid}):",
                at.format("%H:%M:%S%.3f")
            )
        });
    }

    pub fn process(&mut self, identity: &ProcessIdentity, memory: &MemoryCounters, cpu_usage: f64) {
        self.emit(|w| {
            writeln!(
                w,
                "  {} (PID: {}, Parent: {})",
                identity.name, identity.pid, identity.ppid
            )?;
            writeln!(
                w,
                "    Memory usage: {}, Memory peak: {}, Pagefile usage: {}, Pagefile peak: {} ~ CPU: {:.0}%",
                format_bytes(memory.working_set_size),
                format_bytes(memory.peak_working_set_size),
                format_bytes(memory.pagefile_usage),
                format_bytes(memory.peak_pagefile_usage),
                cpu_usage
            )
        });
    }

    pub fn enumeration_failed(&mut self, at: &DateTime<Local>, error: &CollectorError) {
        self.emit(|w| writeln!(w, "[{}] Tick skipped: {error}", at.format("%H:%M:%S%.3f")));
    }

    pub fn flush(&mut self) {
        self.emit(|_| Ok(()));
    }

    fn emit(&mut self, write: impl FnOnce(&mut dyn Write) -> io::Result<()>) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(err) = write(writer.as_mut()).and_then(|()| writer.flush()) {
            tracing::warn!(
                path = ?self.path,
                error = %err,
                "session log write failed, disabling it"
            );
            self.writer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;

    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tick_lines() {
        let buffer = Shared::default();
        let mut log = SessionLog::from_writer(buffer.clone());
        let at = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + chrono::TimeDelta::milliseconds(7);

        log.tick(&at, 100);
        log.process(
            &ProcessIdentity::new(200, 100, "worker.exe"),
            &MemoryCounters {
                working_set_size: 12 * 1024 * 1024 + 512 * 1024,
                peak_working_set_size: 3 * 1024 * 1024 * 1024,
                pagefile_usage: 1536,
                peak_pagefile_usage: 10,
                ..MemoryCounters::default()
            },
            29.6,
        );

        insta::assert_snapshot!(buffer.text(), @r"
        [03:04:05.007] Tracked processes (monitored: 100):
          worker.exe (PID: 200, Parent: 100)
            Memory usage: 12.500 MB, Memory peak: 3.000 GB, Pagefile usage: 1.500 KB, Pagefile peak: 10.000 B ~ CPU: 30%
        ");
    }

    #[test]
    fn process_list_dump() {
        let buffer = Shared::default();
        let mut log = SessionLog::from_writer(buffer.clone());
        log.process_list(&[
            ProcessIdentity::new(0, 0, ""),
            ProcessIdentity::new(4, 0, "System"),
        ]);

        insta::assert_snapshot!(buffer.text(), @r#"
        Updated process list:
          "" (PID: 0, Parent: 0)
          "System" (PID: 4, Parent: 0)
        "#);
    }

    #[test]
    fn write_failure_disables_log() {
        let mut log = SessionLog::from_writer(Broken);
        assert!(log.is_enabled());
        log.tick(&Local::now(), 1);
        assert!(!log.is_enabled());
        log.tick(&Local::now(), 1);
    }

    #[test]
    fn header_reports_collector_pid_in_hex() {
        let buffer = Shared::default();
        let mut log = SessionLog::from_writer(buffer.clone());
        let mut header = SessionHeader::capture(255);
        header.host_name = "build-agent".to_string();
        log.header(&header);

        let text = buffer.text();
        assert!(text.starts_with("Onlooker PID: 0xFF (255)\n"), "{text}");
        assert!(text.contains("Computer name: build-agent\n"));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn header_lists_virtual_memory_when_known() {
        let header = SessionHeader {
            collector_pid: 16,
            started_at: Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            host_name: "lab".to_string(),
            memory_load_percent: 42,
            total_memory: 8 * 1024 * 1024 * 1024,
            free_memory: 2 * 1024 * 1024 * 1024,
            total_swap: 1024 * 1024 * 1024,
            free_swap: 512 * 1024 * 1024,
            virtual_memory: Some(AddressSpace {
                total: 128 * 1024 * 1024 * 1024 * 1024,
                available: 64 * 1024 * 1024 * 1024 * 1024,
            }),
        };

        let buffer = Shared::default();
        let mut log = SessionLog::from_writer(buffer.clone());
        log.header(&header);
        let text = buffer.text();
        assert!(text.contains("There are 128.000 TB total of virtual memory.\n"), "{text}");
        assert!(text.contains("There are 64.000 TB free of virtual memory.\n"), "{text}");

        let buffer = Shared::default();
        let mut log = SessionLog::from_writer(buffer.clone());
        log.header(&SessionHeader {
            virtual_memory: None,
            ..header
        });
        assert!(!buffer.text().contains("virtual memory"));
    }
}
