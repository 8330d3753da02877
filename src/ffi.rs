//! C ABI export consumed by the display driver
//!
//! ```c
//! int GetTelemetry(char* buffer, int maxLen);
//! ```
//!
//! The buffer is zero-filled, then receives `"<cpu>;<gpu>;<fps>;"` truncated
//! to `maxLen - 1` bytes plus a terminating NUL. The return value is the full
//! packet length, or a negative status code (see
//! [`TelemetryError::status_code`](crate::TelemetryError::status_code)).
//!
//! The reader behind the export is process-wide and guarded by a mutex, so
//! concurrent callers never observe a mapping being released mid-read.

use crate::reader::TelemetryReader;
use crate::source::{InstallLocator, SegmentSource};
use crate::{DefaultLocator, DefaultSource, TelemetryError};
use std::ffi::{c_char, c_int};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

static READER: Mutex<Option<TelemetryReader<DefaultSource, DefaultLocator>>> = Mutex::new(None);

/// Fill `buffer` with the current telemetry packet.
///
/// # Safety
///
/// `buffer` must be valid for writes of `max_len` bytes, or `max_len` must be 0.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetTelemetry(buffer: *mut c_char, max_len: c_int) -> c_int {
    // SAFETY: forwarded caller contract
    unsafe { export_packet(buffer, max_len) }
}

/// Legacy name of [`GetTelemetry`] kept for existing display drivers.
///
/// # Safety
///
/// Same contract as [`GetTelemetry`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetAfterburnerData(buffer: *mut c_char, max_len: c_int) -> c_int {
    // SAFETY: forwarded caller contract
    unsafe { export_packet(buffer, max_len) }
}

unsafe fn export_packet(buffer: *mut c_char, max_len: c_int) -> c_int {
    // SAFETY: forwarded caller contract
    let out = match unsafe { caller_buffer(buffer, max_len) } {
        Ok(out) => out,
        Err(e) => {
            debug!(code = e.status_code(), "Rejected export call: {}", e);
            return e.status_code();
        }
    };

    let mut guard = READER.lock().unwrap_or_else(PoisonError::into_inner);
    let reader = guard
        .get_or_insert_with(|| TelemetryReader::new(DefaultSource::default(), DefaultLocator::default()));
    poll_into(reader, out)
}

/// Borrow the caller's buffer, rejecting null pointers and negative lengths.
unsafe fn caller_buffer<'a>(buffer: *mut c_char, max_len: c_int) -> Result<&'a mut [u8], TelemetryError> {
    let len = usize::try_from(max_len)
        .map_err(|_| TelemetryError::invalid_argument(format!("negative buffer length {}", max_len)))?;
    if len == 0 {
        let empty: &'a mut [u8] = &mut [];
        return Ok(empty);
    }
    if buffer.is_null() {
        return Err(TelemetryError::invalid_argument("null buffer"));
    }
    // SAFETY: caller guarantees `buffer` is writable for `max_len` bytes
    Ok(unsafe { std::slice::from_raw_parts_mut(buffer.cast::<u8>(), len) })
}

/// Poll `reader` and write the outcome into `out` using the export's conventions.
///
/// `out` is zero-filled first, on success and failure alike.
pub fn poll_into<S, L>(reader: &mut TelemetryReader<S, L>, out: &mut [u8]) -> c_int
where
    S: SegmentSource,
    L: InstallLocator,
{
    out.fill(0);
    match reader.poll() {
        Ok(report) => write_packet(out, &report.packet()),
        Err(e) => {
            debug!(code = e.status_code(), "Telemetry poll failed: {}", e);
            e.status_code()
        }
    }
}

/// Copy `packet` into `out` NUL-terminated, truncating like `lstrcpyn`.
///
/// Returns the untruncated packet length.
pub fn write_packet(out: &mut [u8], packet: &str) -> c_int {
    let bytes = packet.as_bytes();
    if let Some(room) = out.len().checked_sub(1) {
        let copied = bytes.len().min(room);
        out[..copied].copy_from_slice(&bytes[..copied]);
        out[copied..].fill(0);
    }
    c_int::try_from(bytes.len()).unwrap_or(c_int::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{
        STATUS_INTERNAL, STATUS_INVALID_ARGUMENT, STATUS_PRODUCER_NOT_INSTALLED,
        STATUS_PRODUCER_NOT_RUNNING, STATUS_UNINITIALIZED_MEMORY,
    };
    use crate::layout::{ENTRY_V1_SIZE, GpuScope, SourceId};
    use crate::test_utils::{FixedLocator, LayoutBuilder, ScriptedSource};
    use std::path::PathBuf;

    fn reader_with(image: Option<Vec<u8>>, installed: bool) -> TelemetryReader<ScriptedSource, FixedLocator> {
        let source = ScriptedSource::new();
        match image {
            Some(image) => source.push(image),
            None => source.push_closed(),
        }
        let path = installed.then(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")));
        TelemetryReader::new(source, FixedLocator::new(path))
    }

    fn sample_image() -> Vec<u8> {
        LayoutBuilder::new()
            .gpu("GPU0")
            .entry(SourceId::CpuTemperature, GpuScope::Global, 52.0)
            .entry(SourceId::GpuTemperature, GpuScope::Gpu(0), 71.25)
            .entry(SourceId::Framerate, GpuScope::Global, 59.97)
            .build()
    }

    #[test]
    fn writes_nul_terminated_packet() {
        let mut reader = reader_with(Some(sample_image()), true);
        let mut out = [0xAAu8; 64];

        let len = poll_into(&mut reader, &mut out);

        let packet = b"52.00;71.25;59.97;";
        assert_eq!(len as usize, packet.len());
        assert_eq!(&out[..packet.len()], packet);
        assert!(out[packet.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn truncates_but_returns_full_length() {
        let mut reader = reader_with(Some(sample_image()), true);
        let mut out = [0xAAu8; 8];

        let len = poll_into(&mut reader, &mut out);

        assert_eq!(len, 18);
        assert_eq!(&out, b"52.00;7\0");
    }

    #[test]
    fn empty_buffer_still_reports_length() {
        assert_eq!(write_packet(&mut [], "1.00;2.00;3.00;"), 15);
        let mut one = [0xAAu8; 1];
        assert_eq!(write_packet(&mut one, "1.00;2.00;3.00;"), 15);
        assert_eq!(one, [0]);
    }

    #[test]
    fn failures_zero_the_buffer_and_return_codes() {
        let cases = [
            (Some(LayoutBuilder::new().signature(0).build()), true, STATUS_UNINITIALIZED_MEMORY),
            (None, false, STATUS_PRODUCER_NOT_INSTALLED),
            (None, true, STATUS_PRODUCER_NOT_RUNNING),
        ];
        for (image, installed, expected) in cases {
            let mut reader = reader_with(image, installed);
            let mut out = [0xAAu8; 16];

            assert_eq!(poll_into(&mut reader, &mut out), expected);
            assert!(out.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn short_entry_stride_in_v2_memory_is_internal_error() {
        let image = LayoutBuilder::new()
            .entry_stride(ENTRY_V1_SIZE as u32)
            .gpu("GPU0")
            .entry(SourceId::CpuTemperature, GpuScope::Global, 48.0)
            .entry(SourceId::Framerate, GpuScope::Global, 60.0)
            .build();
        let mut reader = reader_with(Some(image), true);
        let mut out = [0xAAu8; 32];

        assert_eq!(poll_into(&mut reader, &mut out), STATUS_INTERNAL);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn concurrent_exports_each_get_a_whole_result() {
        const THREADS: usize = 8;
        const CALLS: usize = 25;

        let results: Vec<Vec<(c_int, [c_char; 64])>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        (0..CALLS)
                            .map(|_| {
                                let mut out = [0x55 as c_char; 64];
                                let code = unsafe { GetTelemetry(out.as_mut_ptr(), out.len() as c_int) };
                                (code, out)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("export thread panicked")).collect()
        });

        for (code, out) in results.into_iter().flatten() {
            if code < 0 {
                assert!(out.iter().all(|&b| b == 0), "failure left bytes in buffer");
                #[cfg(not(windows))]
                assert_eq!(code, STATUS_PRODUCER_NOT_INSTALLED);
            } else {
                let written = (code as usize).min(out.len() - 1);
                assert!(out[..written].iter().all(|&b| b != 0));
                assert!(out[written..].iter().all(|&b| b == 0));
            }
        }
    }

    #[test]
    fn rejects_unusable_caller_buffers() {
        let mut out = [0 as c_char; 4];
        unsafe {
            assert_eq!(GetTelemetry(std::ptr::null_mut(), 16), STATUS_INVALID_ARGUMENT);
            assert_eq!(GetTelemetry(out.as_mut_ptr(), -1), STATUS_INVALID_ARGUMENT);
        }
    }
}
