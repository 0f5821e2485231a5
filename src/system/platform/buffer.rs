//! Size-query / allocate / fill protocol for the process enumeration buffer.
//!
//! Kept free of FFI so the retry rules can be exercised on any target.

use std::mem::size_of;

use crate::error::CollectorError;

pub type NtStatus = i32;

pub const STATUS_SUCCESS: NtStatus = 0;
pub const STATUS_INFO_LENGTH_MISMATCH: NtStatus = 0xC000_0004_u32 as NtStatus;

/// Fills attempted before the tick is given up.
pub const MAX_ENUMERATION_ATTEMPTS: usize = 8;

/// Smallest buffer handed to a fill, whatever size the OS asked for.
const MIN_BUFFER_BYTES: usize = 256;

/// Runs the enumeration call until it fits.
///
/// `query(None, needed)` is the size query and must report a length mismatch;
/// `query(Some(buf), needed)` fills `buf`. Both store the byte count the OS
/// wants in `needed`. A mismatch on the fill means the table grew in between
/// and the whole exchange is repeated. Any other status ends it.
///
/// The buffer is `u64` storage so records stay 8-byte aligned.
pub fn fill_with_retry<Q>(mut query: Q) -> Result<Vec<u64>, CollectorError>
where
    Q: FnMut(Option<&mut [u64]>, &mut u32) -> NtStatus,
{
    let mut needed = 0u32;
    for attempt in 1..=MAX_ENUMERATION_ATTEMPTS {
        let status = query(None, &mut needed);
        if status != STATUS_INFO_LENGTH_MISMATCH {
            return Err(CollectorError::Enumeration(format!(
                "size query failed with NTSTATUS 0x{status:08X}"
            )));
        }

        // Headroom for processes started between the two calls.
        let bytes = (needed as usize).saturating_mul(2).max(MIN_BUFFER_BYTES);
        let mut buf = vec![0u64; bytes.div_ceil(size_of::<u64>())];
        match query(Some(&mut buf), &mut needed) {
            STATUS_SUCCESS => return Ok(buf),
            STATUS_INFO_LENGTH_MISMATCH => {
                tracing::debug!(attempt, needed, "process table grew during enumeration, retrying");
            }
            other => {
                return Err(CollectorError::Enumeration(format!(
                    "enumeration failed with NTSTATUS 0x{other:08X}"
                )));
            }
        }
    }
    Err(CollectorError::Enumeration(format!(
        "buffer still too small after {MAX_ENUMERATION_ATTEMPTS} attempts"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_ACCESS_DENIED: NtStatus = 0xC000_0022_u32 as NtStatus;

    /// Answers size queries with a mismatch and fills from `fills` in order.
    fn scripted(fills: Vec<NtStatus>) -> impl FnMut(Option<&mut [u64]>, &mut u32) -> NtStatus {
        let mut fills = fills.into_iter();
        move |buf: Option<&mut [u64]>, needed: &mut u32| match buf {
            None => {
                *needed = 4096;
                STATUS_INFO_LENGTH_MISMATCH
            }
            Some(buf) => {
                buf[0] = 0xfeed;
                fills.next().unwrap_or(STATUS_INFO_LENGTH_MISMATCH)
            }
        }
    }

    #[test]
    fn grown_table_is_retried_until_it_fits() {
        let mut calls = 0;
        let mut inner = scripted(vec![STATUS_INFO_LENGTH_MISMATCH, STATUS_SUCCESS]);
        let buf = fill_with_retry(|buf, needed| {
            calls += 1;
            inner(buf, needed)
        })
        .unwrap();

        assert_eq!(calls, 4);
        assert_eq!(buf[0], 0xfeed);
        assert!(buf.len() * size_of::<u64>() >= 4096);
    }

    #[test]
    fn persistent_mismatch_gives_up_after_max_attempts() {
        let mut fills = 0;
        let mut inner = scripted(Vec::new());
        let result = fill_with_retry(|buf, needed| {
            if buf.is_some() {
                fills += 1;
            }
            inner(buf, needed)
        });

        assert!(matches!(result, Err(CollectorError::Enumeration(_))));
        assert_eq!(fills, MAX_ENUMERATION_ATTEMPTS);
    }

    #[test]
    fn other_fill_status_fails_immediately() {
        let mut fills = 0;
        let mut inner = scripted(vec![STATUS_ACCESS_DENIED, STATUS_SUCCESS]);
        let result = fill_with_retry(|buf, needed| {
            if buf.is_some() {
                fills += 1;
            }
            inner(buf, needed)
        });

        assert!(matches!(result, Err(CollectorError::Enumeration(_))));
        assert_eq!(fills, 1);
    }

    #[test]
    fn failed_size_query_fails_immediately() {
        let mut calls = 0;
        let result = fill_with_retry(|_, _| {
            calls += 1;
            STATUS_ACCESS_DENIED
        });

        assert!(matches!(result, Err(CollectorError::Enumeration(_))));
        assert_eq!(calls, 1);
    }
}
