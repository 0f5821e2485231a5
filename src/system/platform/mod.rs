use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::CollectorError;

/// OS hooks that sit outside the sampling path.
pub trait PlatformExtensions {
    type Attached: AttachedProcess;

    /// Creates or truncates `path` for writing while refusing other writers.
    fn open_exclusive(path: &Path) -> io::Result<File>;

    /// Opens an already running process so its exit can be awaited.
    fn attach(pid: u32) -> Result<Self::Attached, CollectorError>;

    /// User-mode virtual address space of the calling process, when the OS
    /// reports it.
    fn address_space() -> Option<AddressSpace>;
}

/// Virtual address space sizes in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressSpace {
    pub total: u64,
    pub available: u64,
}

/// A process the caller can block on until it terminates.
pub trait AttachedProcess: Send {
    fn pid(&self) -> u32;

    /// Blocks until the process exits. Returns its exit code when the OS
    /// reports one.
    fn wait(self) -> Option<i32>;
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
mod buffer;
#[cfg(not(target_os = "windows"))]
mod portable;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(not(target_os = "windows"))]
use portable as platform_impl;
#[cfg(target_os = "windows")]
use windows as platform_impl;

/// The process source backed by the running operating system.
pub use platform_impl::NativeSource;

pub type Attached = <platform_impl::Platform as PlatformExtensions>::Attached;

pub fn open_exclusive(path: &Path) -> io::Result<File> {
    platform_impl::Platform::open_exclusive(path)
}

pub fn attach(pid: u32) -> Result<Attached, CollectorError> {
    platform_impl::Platform::attach(pid)
}

pub fn address_space() -> Option<AddressSpace> {
    platform_impl::Platform::address_space()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::source::ProcessSource;

    #[test]
    fn native_source_sees_current_process() {
        let mut source = NativeSource::new();
        let pid = std::process::id();
        let entries = source.enumerate().unwrap();
        assert!(entries.iter().any(|e| e.pid() == pid));
        assert!(source.logical_processors() >= 1);
        let memory = source.sample_memory(pid).unwrap();
        assert!(memory.working_set_size > 0);
    }

    #[test]
    fn sampling_unknown_pid_is_unavailable() {
        let mut source = NativeSource::new();
        source.enumerate().unwrap();
        assert!(matches!(
            source.sample_memory(u32::MAX - 1),
            Err(CollectorError::SampleUnavailable { .. })
        ));
    }

    #[test]
    fn attach_to_missing_pid_fails() {
        assert!(attach(u32::MAX - 1).is_err());
    }

    #[test]
    fn open_exclusive_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.txt");
        std::fs::write(&path, "stale contents").unwrap();
        {
            use std::io::Write;
            let mut file = open_exclusive(&path).unwrap();
            file.write_all(b"new").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }
}
