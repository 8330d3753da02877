//! MSI Afterburner shared memory and registry access
//!
//! Win32 implementations of the reader's OS seams:
//!
//! - [`SharedMemorySource`] opens the `MAHMSharedMemory` file mapping read-only
//!   and maps the whole view, sized with `VirtualQuery` so the layout view can
//!   bounds-check every record against it.
//! - [`RegistryInstallLocator`] reads the producer's `InstallPath` from
//!   `HKLM\Software\MSI\Afterburner`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mahm_telemetry::TelemetryReader;
//! use mahm_telemetry::windows::{RegistryInstallLocator, SharedMemorySource};
//!
//! let mut reader = TelemetryReader::new(SharedMemorySource::default(), RegistryInstallLocator::default());
//! let report = reader.poll()?;
//! println!("{}", report.packet());
//! ```

mod mapping;
mod registry;

pub use mapping::{MappedView, SharedMemorySource};
pub use registry::RegistryInstallLocator;

/// Convert string to null-terminated wide string for Windows APIs
fn wide_string(s: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}
