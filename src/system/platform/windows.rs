use std::fs::{File, OpenOptions};
use std::io;
use std::mem::{size_of, size_of_val, zeroed};
use std::os::windows::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr::null_mut;

use windows_sys::Wdk::System::SystemInformation::{
    NtQuerySystemInformation, SystemProcessInformation,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, HANDLE, WAIT_OBJECT_0,
};
use windows_sys::Win32::Storage::FileSystem::FILE_SHARE_READ;
use windows_sys::Win32::System::ProcessStatus::{
    GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS, PROCESS_MEMORY_COUNTERS_EX,
};
use windows_sys::Win32::System::SystemInformation::{
    GetSystemInfo, GlobalMemoryStatusEx, MEMORYSTATUSEX, SYSTEM_INFO,
};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, INFINITE, OpenProcess, PROCESS_ACCESS_RIGHTS,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SYNCHRONIZE, PROCESS_VM_READ, WaitForSingleObject,
};

use super::{AddressSpace, AttachedProcess, PlatformExtensions, buffer};
use crate::error::CollectorError;
use crate::system::decode::ProcessRecords;
use crate::system::memory::MemoryCounters;
use crate::system::process::ProcessEntry;
use crate::system::source::ProcessSource;

pub struct Platform;

impl PlatformExtensions for Platform {
    type Attached = WaitableProcess;

    fn open_exclusive(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .share_mode(FILE_SHARE_READ)
            .open(path)
    }

    fn attach(pid: u32) -> Result<WaitableProcess, CollectorError> {
        let handle = OwnedHandle::open(PROCESS_SYNCHRONIZE | PROCESS_QUERY_LIMITED_INFORMATION, pid)
            .ok_or(CollectorError::SampleUnavailable { pid })?;
        Ok(WaitableProcess { handle, pid })
    }

    fn address_space() -> Option<AddressSpace> {
        unsafe {
            let mut status = zeroed::<MEMORYSTATUSEX>();
            status.dwLength = size_of::<MEMORYSTATUSEX>() as u32;
            if GlobalMemoryStatusEx(&mut status) == 0 {
                return None;
            }
            Some(AddressSpace {
                total: status.ullTotalVirtual,
                available: status.ullAvailVirtual,
            })
        }
    }
}

/// Process handle closed on drop.
struct OwnedHandle(HANDLE);

// The handle is a kernel object reference, valid from any thread.
unsafe impl Send for OwnedHandle {}

impl OwnedHandle {
    fn open(access: PROCESS_ACCESS_RIGHTS, pid: u32) -> Option<Self> {
        let handle = unsafe { OpenProcess(access, 0, pid) };
        if handle.is_null() {
            None
        } else {
            Some(OwnedHandle(handle))
        }
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

pub struct WaitableProcess {
    handle: OwnedHandle,
    pid: u32,
}

impl AttachedProcess for WaitableProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn wait(self) -> Option<i32> {
        unsafe {
            if WaitForSingleObject(self.handle.0, INFINITE) != WAIT_OBJECT_0 {
                return None;
            }
            let mut code = 0u32;
            if GetExitCodeProcess(self.handle.0, &mut code) == 0 {
                return None;
            }
            Some(code as i32)
        }
    }
}

pub struct NativeSource {
    processors: usize,
}

impl Default for NativeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeSource {
    pub fn new() -> Self {
        let processors = unsafe {
            let mut info = zeroed::<SYSTEM_INFO>();
            GetSystemInfo(&mut info);
            info.dwNumberOfProcessors as usize
        };
        NativeSource {
            processors: processors.max(1),
        }
    }
}

/// Fills a buffer with the `SystemProcessInformation` record chain.
fn query_process_table() -> Result<Vec<u64>, CollectorError> {
    buffer::fill_with_retry(|buf, needed| unsafe {
        match buf {
            None => NtQuerySystemInformation(SystemProcessInformation, null_mut(), 0, needed),
            Some(buf) => {
                let capacity = u32::try_from(size_of_val(&*buf)).unwrap_or(u32::MAX);
                NtQuerySystemInformation(
                    SystemProcessInformation,
                    buf.as_mut_ptr().cast(),
                    capacity,
                    needed,
                )
            }
        }
    })
}

impl ProcessSource for NativeSource {
    fn enumerate(&mut self) -> Result<Vec<ProcessEntry>, CollectorError> {
        let buf = query_process_table()?;
        // SAFETY: u64 storage reinterpreted as its bytes, same allocation and length.
        let bytes = unsafe {
            std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), buf.len() * size_of::<u64>())
        };

        let mut records = ProcessRecords::new(bytes, bytes.as_ptr() as usize);
        let entries: Vec<ProcessEntry> = records.by_ref().collect();
        if records.truncated() {
            tracing::warn!(
                decoded = entries.len(),
                "process record chain ended outside the buffer"
            );
        }
        Ok(entries)
    }

    fn sample_memory(&mut self, pid: u32) -> Result<MemoryCounters, CollectorError> {
        let handle = OwnedHandle::open(PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_VM_READ, pid)
            .ok_or(CollectorError::SampleUnavailable { pid })?;

        let counters = unsafe {
            let mut counters = zeroed::<PROCESS_MEMORY_COUNTERS_EX>();
            counters.cb = size_of::<PROCESS_MEMORY_COUNTERS_EX>() as u32;
            let ok = GetProcessMemoryInfo(
                handle.0,
                (&mut counters as *mut PROCESS_MEMORY_COUNTERS_EX).cast::<PROCESS_MEMORY_COUNTERS>(),
                counters.cb,
            );
            if ok == 0 {
                return Err(CollectorError::SampleUnavailable { pid });
            }
            counters
        };

        Ok(MemoryCounters {
            page_fault_count: u64::from(counters.PageFaultCount),
            peak_working_set_size: counters.PeakWorkingSetSize as u64,
            working_set_size: counters.WorkingSetSize as u64,
            quota_peak_paged_pool_usage: counters.QuotaPeakPagedPoolUsage as u64,
            quota_paged_pool_usage: counters.QuotaPagedPoolUsage as u64,
            quota_peak_non_paged_pool_usage: counters.QuotaPeakNonPagedPoolUsage as u64,
            quota_non_paged_pool_usage: counters.QuotaNonPagedPoolUsage as u64,
            pagefile_usage: counters.PagefileUsage as u64,
            peak_pagefile_usage: counters.PeakPagefileUsage as u64,
            private_usage: counters.PrivateUsage as u64,
        })
    }

    fn logical_processors(&self) -> usize {
        self.processors
    }
}
