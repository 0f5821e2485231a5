//! Decoder for the `SYSTEM_PROCESS_INFORMATION` record chain returned by
//! `NtQuerySystemInformation(SystemProcessInformation)` on 64-bit Windows.
//!
//! Each record starts with a fixed header followed by its thread array. The
//! header's first field is the byte offset of the next record (0 ends the
//! chain). The image name is a `UNICODE_STRING` whose buffer pointer refers to
//! memory inside the same enumeration buffer, so it is resolved relative to the
//! address the buffer lived at when the OS filled it.
//!
//! The decoder is pure byte-slice code: it never dereferences pointers and every
//! offset is checked against the buffer before use.

use super::process::{ProcessEntry, ProcessIdentity};

/// Size of the fixed record header on 64-bit targets.
pub const RECORD_HEADER_SIZE: usize = 256;

pub const NEXT_ENTRY_OFFSET: usize = 0;
pub const USER_TIME: usize = 40;
pub const KERNEL_TIME: usize = 48;
pub const IMAGE_NAME_LENGTH: usize = 56;
pub const IMAGE_NAME_BUFFER: usize = 64;
pub const UNIQUE_PROCESS_ID: usize = 80;
pub const INHERITED_FROM_PROCESS_ID: usize = 88;

/// Lazy, finite iterator over the records of one enumeration buffer.
#[derive(Debug)]
pub struct ProcessRecords<'a> {
    buf: &'a [u8],
    base_address: usize,
    next: Option<usize>,
    truncated: bool,
}

impl<'a> ProcessRecords<'a> {
    /// `base_address` is where `buf` was located when the OS wrote it; it is
    /// only used to turn embedded name pointers back into offsets.
    pub fn new(buf: &'a [u8], base_address: usize) -> Self {
        ProcessRecords {
            buf,
            base_address,
            next: Some(0),
            truncated: false,
        }
    }

    /// True if the chain ended early because a record did not fit the buffer.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn stop(&mut self) -> Option<ProcessEntry> {
        self.truncated = true;
        self.next = None;
        None
    }

    fn image_name(&self, header: &[u8]) -> String {
        let length = usize::from(read_u16(header, IMAGE_NAME_LENGTH));
        let pointer = read_u64(header, IMAGE_NAME_BUFFER);
        if length == 0 || pointer == 0 {
            return String::new();
        }

        let Some(range) = usize::try_from(pointer)
            .ok()
            .and_then(|p| p.checked_sub(self.base_address))
            .and_then(|start| Some(start..start.checked_add(length)?))
            .filter(|r| r.end <= self.buf.len())
        else {
            tracing::trace!(pointer, length, "image name points outside enumeration buffer");
            return String::new();
        };

        let units: Vec<u16> = self.buf[range]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }
}

impl Iterator for ProcessRecords<'_> {
    type Item = ProcessEntry;

    fn next(&mut self) -> Option<ProcessEntry> {
        let offset = self.next.take()?;
        let Some(header) = offset
            .checked_add(RECORD_HEADER_SIZE)
            .and_then(|end| self.buf.get(offset..end))
        else {
            return self.stop();
        };

        let delta = read_u32(header, NEXT_ENTRY_OFFSET) as usize;
        if delta != 0 {
            // A record can never be shorter than its own header.
            if delta < RECORD_HEADER_SIZE {
                return self.stop();
            }
            self.next = offset.checked_add(delta);
        }

        let identity = ProcessIdentity {
            pid: read_u64(header, UNIQUE_PROCESS_ID) as u32,
            ppid: read_u64(header, INHERITED_FROM_PROCESS_ID) as u32,
            name: self.image_name(header),
        };

        Some(ProcessEntry {
            identity,
            kernel_time: read_i64(header, KERNEL_TIME).max(0) as u64,
            user_time: read_i64(header, USER_TIME).max(0) as u64,
        })
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&bytes[at..at + 2]);
    u16::from_le_bytes(raw)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn read_i64(bytes: &[u8], at: usize) -> i64 {
    read_u64(bytes, at) as i64
}
