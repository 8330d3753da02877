//! Read-only view of a named file mapping

use super::wide_string;
use crate::layout::MAHM_SHARED_MEMORY_NAME;
use crate::source::{Segment, SegmentSource};
use crate::{Result, TelemetryError};
use std::ffi::c_void;
use std::ptr::NonNull;
use tracing::{debug, trace};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Memory::{
    FILE_MAP_READ, MEMORY_BASIC_INFORMATION, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
    OpenFileMappingW, UnmapViewOfFile, VirtualQuery,
};
use windows::core::PCWSTR;

/// A mapped view and the mapping handle behind it.
///
/// Both are released on drop.
pub struct MappedView {
    mapping: HANDLE,
    base: NonNull<u8>,
    len: usize,
}

impl MappedView {
    /// Open the named mapping and map all of it for reading
    pub fn open(name: &str) -> Result<Self> {
        trace!(name, "Opening file mapping");

        let mapping = unsafe {
            let wide_name = wide_string(name);
            OpenFileMappingW(FILE_MAP_READ.0, false, PCWSTR::from_raw(wide_name.as_ptr()))
                .map_err(|e| TelemetryError::windows_api_error("OpenFileMappingW", e))?
        };

        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, 0) };
        let Some(base) = NonNull::new(view.Value as *mut u8) else {
            let win_err = windows::core::Error::from_thread();
            unsafe {
                let _ = CloseHandle(mapping);
            }
            return Err(TelemetryError::windows_api_error("MapViewOfFile", win_err));
        };

        // The producer sizes the mapping for its current entry counts; the
        // region size is the only upper bound we can trust.
        let mut info = MEMORY_BASIC_INFORMATION::default();
        let written = unsafe {
            VirtualQuery(
                Some(base.as_ptr() as *const c_void),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if written == 0 {
            let win_err = windows::core::Error::from_thread();
            unsafe {
                let _ = UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: base.as_ptr() as *mut _ });
                let _ = CloseHandle(mapping);
            }
            return Err(TelemetryError::windows_api_error("VirtualQuery", win_err));
        }

        debug!(name, len = info.RegionSize, "Mapped shared memory view");
        Ok(Self { mapping, base, len: info.RegionSize })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Segment for MappedView {
    fn bytes(&self) -> &[u8] {
        // SAFETY: base..base+len is the committed view returned by VirtualQuery
        // and stays mapped until drop.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }
}

impl Drop for MappedView {
    fn drop(&mut self) {
        unsafe {
            let addr = MEMORY_MAPPED_VIEW_ADDRESS { Value: self.base.as_ptr() as *mut _ };
            let _ = UnmapViewOfFile(addr);
            let _ = CloseHandle(self.mapping);
        }
    }
}

// SAFETY: The view only holds a kernel handle and a read-only pointer into
// process-wide mapped memory; neither is tied to the creating thread.
unsafe impl Send for MappedView {}

/// Opens MSI Afterburner's `MAHMSharedMemory` mapping
#[derive(Debug, Clone)]
pub struct SharedMemorySource {
    name: String,
}

impl SharedMemorySource {
    /// Source for a differently named mapping
    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SharedMemorySource {
    fn default() -> Self {
        Self::with_name(MAHM_SHARED_MEMORY_NAME)
    }
}

impl SegmentSource for SharedMemorySource {
    type Segment = MappedView;

    fn open(&mut self) -> Result<Self::Segment> {
        MappedView::open(&self.name)
    }
}
