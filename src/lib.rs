//! MSI Afterburner hardware monitoring telemetry for external displays.
//!
//! MSI Afterburner publishes its monitoring data into the `MAHMSharedMemory`
//! file mapping. This crate maps that segment read-only, validates the
//! versioned variable-stride layout, and extracts CPU temperature, GPU
//! temperature and framerate for a display driver.
//!
//! # Features
//!
//! - **C ABI export**: `GetTelemetry(char*, int)` for display drivers (see [`ffi`])
//! - **Self-healing**: reconnects when the producer marks its memory dead
//! - **Bounds-checked parsing**: producer-declared strides and counts are
//!   validated against the mapped region before any record is read
//! - **Cross-platform testing**: synthetic images via `test_utils`
//!
//! ## Example
//!
//! ```rust,no_run
//! use mahm_telemetry::{TelemetryError, default_reader};
//!
//! fn main() -> mahm_telemetry::Result<()> {
//!     let mut reader = default_reader();
//!     match reader.poll() {
//!         Ok(report) => println!("{}", report.packet()),
//!         Err(TelemetryError::ProducerNotRunning) => println!("Start MSI Afterburner"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
pub mod layout;
pub mod report;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Connection lifecycle
pub mod connection;
pub mod reader;
pub mod source;

// Exported C ABI
pub mod ffi;

// Platform-specific modules
#[cfg(windows)]
pub mod windows;

// Core exports
pub use error::*;
pub use layout::{LayoutView, Signature, SourceId};
pub use reader::TelemetryReader;
pub use report::Report;
pub use source::{InstallLocator, Segment, SegmentSource};

/// Segment source for the running platform
#[cfg(windows)]
pub type DefaultSource = windows::SharedMemorySource;
/// Install locator for the running platform
#[cfg(windows)]
pub type DefaultLocator = windows::RegistryInstallLocator;

/// Segment source for the running platform
#[cfg(not(windows))]
pub type DefaultSource = source::UnsupportedSource;
/// Install locator for the running platform
#[cfg(not(windows))]
pub type DefaultLocator = source::NoInstallLocator;

/// Reader wired to the platform's shared memory and install-path lookup.
///
/// On platforms other than Windows the segment never opens and every poll
/// reports [`TelemetryError::ProducerNotInstalled`].
pub fn default_reader() -> TelemetryReader<DefaultSource, DefaultLocator> {
    TelemetryReader::new(DefaultSource::default(), DefaultLocator::default())
}
