//! Seams between the reader and the operating system
//!
//! The reader never touches Win32 directly. It asks a [`SegmentSource`] for a
//! mapped [`Segment`] and an [`InstallLocator`] for the producer's install
//! directory. On Windows these are backed by file mappings and the registry;
//! elsewhere (and in tests) by in-memory stand-ins.

use crate::Result;
use std::path::PathBuf;

/// A mapped view of the producer's shared memory.
///
/// Dropping the segment releases the view and its handle.
pub trait Segment {
    /// The whole mapped region, header first
    fn bytes(&self) -> &[u8];
}

impl Segment for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

/// Opens the producer's shared memory segment by its well-known name.
pub trait SegmentSource {
    type Segment: Segment;

    /// Open and map the segment.
    ///
    /// Returns an error when the segment does not exist (producer not
    /// running) or cannot be mapped.
    fn open(&mut self) -> Result<Self::Segment>;
}

/// Looks up where the producer is installed.
pub trait InstallLocator {
    /// Installed directory, or `None` when the producer is not installed
    fn install_path(&mut self) -> Option<PathBuf>;
}

/// Segment source for platforms without the producer
#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct UnsupportedSource;

#[cfg(not(windows))]
impl SegmentSource for UnsupportedSource {
    type Segment = Vec<u8>;

    fn open(&mut self) -> Result<Self::Segment> {
        Err(crate::TelemetryError::unsupported_platform("Hardware monitoring shared memory", "Windows"))
    }
}

/// Install locator for platforms without the producer
#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct NoInstallLocator;

#[cfg(not(windows))]
impl InstallLocator for NoInstallLocator {
    fn install_path(&mut self) -> Option<PathBuf> {
        None
    }
}
