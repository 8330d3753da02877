//! Poll state machine over the producer's shared memory
//!
//! Each [`TelemetryReader::poll`] call:
//!
//! 1. resolves (and caches) the producer's install path,
//! 2. connects if not already connected,
//! 3. reconnects once if the producer marked the memory dead,
//! 4. validates the signature and layout and extracts a [`Report`].
//!
//! Failures are returned immediately; the caller polls again on its own schedule.

use crate::connection::Connection;
use crate::layout::{LayoutView, Signature};
use crate::report::Report;
use crate::source::{InstallLocator, SegmentSource};
use crate::{Result, TelemetryError};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Polls MSI Afterburner's shared memory for the display report
pub struct TelemetryReader<S: SegmentSource, L: InstallLocator> {
    connection: Connection<S>,
    locator: L,
    install_path: Option<PathBuf>,
}

impl<S: SegmentSource, L: InstallLocator> TelemetryReader<S, L> {
    /// Create a disconnected reader. Nothing is opened until the first poll.
    pub fn new(source: S, locator: L) -> Self {
        Self { connection: Connection::new(source), locator, install_path: None }
    }

    /// Read the current CPU temperature, GPU temperature and framerate.
    ///
    /// # Errors
    ///
    /// - [`TelemetryError::UninitializedMemory`] when mapped memory is not signed `'MAHM'`
    /// - [`TelemetryError::ProducerNotInstalled`] when nothing is mapped and no install path exists
    /// - [`TelemetryError::ProducerNotRunning`] when nothing is mapped but the producer is installed
    /// - [`TelemetryError::Layout`] or [`TelemetryError::Memory`] when the header
    ///   describes tables that do not fit the mapped region
    pub fn poll(&mut self) -> Result<Report> {
        let installed = self.resolve_install_path().is_some();

        if !self.connection.is_connected() {
            self.connection.connect();
        }

        if self.connection.signature() == Some(Signature::Dead) {
            warn!("Hardware monitoring shared memory marked dead, reconnecting");
            self.connection.connect();
        }

        let Some(region) = self.connection.region() else {
            return Err(if installed {
                TelemetryError::ProducerNotRunning
            } else {
                TelemetryError::ProducerNotInstalled
            });
        };

        let signature = Signature::peek(region);
        if signature != Signature::Valid {
            trace!(?signature, "Connected to unsigned shared memory");
            return Err(TelemetryError::UninitializedMemory { signature: signature.raw() });
        }

        let view = LayoutView::new(region)?;
        Ok(Report::extract(&view))
    }

    /// Map the producer's memory, replacing any current mapping
    pub fn connect(&mut self) {
        self.connection.connect();
    }

    /// Release the mapping. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    /// Whether the shared memory is currently mapped
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Install path as of the last poll
    pub fn install_path(&self) -> Option<&Path> {
        self.install_path.as_deref()
    }

    /// Look the install path up once, then keep it while it still exists on disk.
    fn resolve_install_path(&mut self) -> Option<&Path> {
        if self.install_path.is_none() {
            self.install_path = self.locator.install_path();
            if let Some(path) = &self.install_path {
                debug!(path = %path.display(), "Resolved producer install path");
            }
        }

        let missing = self
            .install_path
            .as_ref()
            .and_then(|path| std::fs::metadata(path).err().map(|source| (path.clone(), source)));
        if let Some((path, source)) = missing {
            let error = TelemetryError::InstallPath { path, source };
            debug!("Discarding cached install path: {}", error);
            self.install_path = None;
        }

        self.install_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{GpuScope, MAHM_VERSION_1_0, MAHM_VERSION_2_0, SourceId};
    use crate::test_utils::{FixedLocator, LayoutBuilder, ScriptedSource};
    use anyhow::Result;
    use proptest::prelude::*;

    fn installed() -> FixedLocator {
        FixedLocator::new(Some(PathBuf::from(env!("CARGO_MANIFEST_DIR"))))
    }

    fn sample_image() -> Vec<u8> {
        LayoutBuilder::new()
            .gpu("GPU0")
            .gpu("GPU1")
            .entry(SourceId::CpuTemperature, GpuScope::Global, 48.0)
            .entry(SourceId::GpuTemperature, GpuScope::Gpu(1), 66.5)
            .entry(SourceId::Framerate, GpuScope::Global, 143.9)
            .build()
    }

    #[test]
    fn reads_report_from_valid_memory() -> Result<()> {
        let source = ScriptedSource::new();
        source.push(sample_image());
        let mut reader = TelemetryReader::new(source.clone(), installed());

        let report = reader.poll()?;

        assert_eq!(report.packet(), "48.00;66.50;143.90;");
        assert!(reader.is_connected());
        assert_eq!(source.opens(), 1);
        Ok(())
    }

    #[test]
    fn stays_connected_across_polls() -> Result<()> {
        let source = ScriptedSource::new();
        source.push(sample_image());
        let mut reader = TelemetryReader::new(source.clone(), installed());

        reader.poll()?;
        reader.poll()?;
        reader.poll()?;

        assert_eq!(source.opens(), 1);
        assert_eq!(source.live(), 1);
        Ok(())
    }

    #[test]
    fn dead_memory_triggers_exactly_one_reconnect() -> Result<()> {
        let source = ScriptedSource::new();
        source.push(LayoutBuilder::new().signature(0xDEAD).build());
        source.push(sample_image());
        let mut reader = TelemetryReader::new(source.clone(), installed());

        let report = reader.poll()?;

        assert_eq!(report.framerate, 143.9);
        assert_eq!(source.opens(), 2);
        assert_eq!(source.releases(), 1);
        assert_eq!(source.live(), 1);
        Ok(())
    }

    #[test]
    fn still_dead_after_reconnect_reports_uninitialized() {
        let source = ScriptedSource::new();
        source.push(LayoutBuilder::new().signature(0xDEAD).build());
        let mut reader = TelemetryReader::new(source.clone(), installed());

        let result = reader.poll();

        assert!(matches!(result, Err(TelemetryError::UninitializedMemory { signature: 0xDEAD })));
        assert_eq!(source.opens(), 2);
    }

    #[test]
    fn producer_restart_heals_without_consumer_restart() -> Result<()> {
        let source = ScriptedSource::new();
        source.push(sample_image());
        let mut reader = TelemetryReader::new(source.clone(), installed());
        reader.poll()?;

        // Producer unloads: the mapping we hold is now marked dead and a fresh
        // open finds the restarted producer's memory.
        source.mark_live_dead();
        source.push(LayoutBuilder::new().entry(SourceId::Framerate, GpuScope::Global, 30.0).build());

        let report = reader.poll()?;
        assert_eq!(report.framerate, 30.0);
        assert_eq!(source.opens(), 2);
        Ok(())
    }

    #[test]
    fn unsigned_memory_is_uninitialized() {
        let source = ScriptedSource::new();
        source.push(LayoutBuilder::new().signature(0).build());
        let mut reader = TelemetryReader::new(source.clone(), installed());

        assert!(matches!(reader.poll(), Err(TelemetryError::UninitializedMemory { signature: 0 })));
        // No self-heal for memory that is merely not ready yet
        assert_eq!(source.opens(), 1);
        assert!(reader.is_connected());
    }

    #[test]
    fn missing_segment_and_install_path_is_not_installed() {
        let source = ScriptedSource::new();
        source.push_closed();
        let mut reader = TelemetryReader::new(source, FixedLocator::new(None));

        assert!(matches!(reader.poll(), Err(TelemetryError::ProducerNotInstalled)));
    }

    #[test]
    fn missing_segment_with_install_path_is_not_running() {
        let source = ScriptedSource::new();
        source.push_closed();
        let mut reader = TelemetryReader::new(source, installed());

        assert!(matches!(reader.poll(), Err(TelemetryError::ProducerNotRunning)));
        assert!(reader.install_path().is_some());
    }

    #[test]
    fn vanished_install_path_counts_as_not_installed() {
        let source = ScriptedSource::new();
        source.push_closed();
        let gone = std::env::temp_dir().join("mahm-telemetry-does-not-exist-7f3a");
        let locator = FixedLocator::new(Some(gone));
        let mut reader = TelemetryReader::new(source, locator.clone());

        assert!(matches!(reader.poll(), Err(TelemetryError::ProducerNotInstalled)));
        assert!(reader.install_path().is_none());
        // Cache was cleared, so the next poll looks the path up again
        let _ = reader.poll();
        assert_eq!(locator.lookups(), 2);
    }

    #[test]
    fn install_path_is_looked_up_once() {
        let source = ScriptedSource::new();
        source.push_closed();
        let locator = installed();
        let mut reader = TelemetryReader::new(source, locator.clone());

        for _ in 0..3 {
            let _ = reader.poll();
        }
        assert_eq!(locator.lookups(), 1);
    }

    #[test]
    fn producer_starting_later_is_picked_up() -> Result<()> {
        let source = ScriptedSource::new();
        source.push_closed();
        let mut reader = TelemetryReader::new(source.clone(), installed());
        assert!(matches!(reader.poll(), Err(TelemetryError::ProducerNotRunning)));

        source.push(sample_image());
        assert_eq!(reader.poll()?.cpu_temperature, 48.0);
        Ok(())
    }

    #[test]
    fn oversized_entry_count_fails_closed() {
        let source = ScriptedSource::new();
        source.push(
            LayoutBuilder::new()
                .entry(SourceId::Framerate, GpuScope::Global, 60.0)
                .declared_entries(u32::MAX)
                .build(),
        );
        let mut reader = TelemetryReader::new(source, installed());

        assert!(matches!(reader.poll(), Err(TelemetryError::Layout { .. })));
    }

    #[test]
    fn explicit_disconnect_is_idempotent() -> Result<()> {
        let source = ScriptedSource::new();
        source.push(sample_image());
        let mut reader = TelemetryReader::new(source.clone(), installed());
        reader.poll()?;

        reader.disconnect();
        reader.disconnect();

        assert!(!reader.is_connected());
        assert_eq!(source.releases(), 1);
        assert_eq!(source.live(), 0);
        Ok(())
    }

    #[test]
    fn pre_v2_memory_reports_zero_gpu_temperature() -> Result<()> {
        let source = ScriptedSource::new();
        source.push(
            LayoutBuilder::new()
                .version(MAHM_VERSION_1_0)
                .gpu("GPU0")
                .entry(SourceId::GpuTemperature, GpuScope::Gpu(0), 80.0)
                .entry(SourceId::Framerate, GpuScope::Global, 59.97)
                .build(),
        );
        let mut reader = TelemetryReader::new(source, installed());

        let report = reader.poll()?;
        assert_eq!(report.gpu_temperature, 0.0);
        assert_eq!(report.packet(), "0.00;0.00;59.97;");
        Ok(())
    }

    proptest! {
        #[test]
        fn foreign_signatures_are_uninitialized(
            signature in any::<u32>().prop_filter("not MAHM or dead", |s| {
                *s != crate::layout::MAHM_SIGNATURE && *s != crate::layout::MAHM_DEAD_SIGNATURE
            })
        ) {
            let source = ScriptedSource::new();
            source.push(LayoutBuilder::new().signature(signature).build());
            let mut reader = TelemetryReader::new(source.clone(), installed());

            let result = reader.poll();
            let uninitialized = matches!(
                result,
                Err(TelemetryError::UninitializedMemory { signature: s }) if s == signature
            );
            prop_assert!(uninitialized, "got {:?}", result);
            prop_assert_eq!(source.opens(), 1);
        }

        #[test]
        fn valid_v2_memory_yields_three_fields(
            version in MAHM_VERSION_2_0..=u32::MAX,
            cpu in any::<f32>().prop_filter("finite", |v| v.is_finite()),
            fps in any::<f32>().prop_filter("finite", |v| v.is_finite()),
        ) {
            let source = ScriptedSource::new();
            source.push(
                LayoutBuilder::new()
                    .version(version)
                    .gpu("GPU0")
                    .entry(SourceId::CpuTemperature, GpuScope::Global, cpu)
                    .entry(SourceId::Framerate, GpuScope::Global, fps)
                    .build(),
            );
            let mut reader = TelemetryReader::new(source, installed());

            let packet = reader.poll().map_err(|e| TestCaseError::fail(e.to_string()))?.packet();
            let fields: Vec<&str> = packet.split(';').collect();
            prop_assert_eq!(fields.len(), 4);
            prop_assert_eq!(fields[3], "");
            prop_assert!(fields[..3].iter().all(|f| !f.is_empty()));
        }
    }
}
