//! Aggregated telemetry values extracted from one poll

use crate::layout::{GpuScope, LayoutView, SourceId};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Format of the producer poll time, e.g. `19.10.2026 14:03:59`
pub const POLL_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// The three values the display shows, plus when the producer sampled them.
///
/// Values default to `0.0` when the producer does not publish the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Report {
    /// Degrees Celsius
    pub cpu_temperature: f32,
    /// Degrees Celsius
    pub gpu_temperature: f32,
    /// Frames per second
    pub framerate: f32,
    /// Producer poll time as a unix timestamp
    pub timestamp: i64,
}

impl Report {
    /// Walk a validated layout and pick out CPU/GPU temperature and framerate.
    ///
    /// Global entries supply CPU temperature and framerate. GPU temperature
    /// comes from entries scoped to each GPU index in turn, so with several
    /// GPUs the highest-indexed one that reports wins. The per-GPU pass only
    /// runs on v2.0+ memory. Unknown sources are skipped.
    pub fn extract(view: &LayoutView<'_>) -> Self {
        let mut report = Report { timestamp: i64::from(view.header().time), ..Default::default() };

        for gpu in view.gpu_entries() {
            for entry in view.entries() {
                if entry.scope() != Some(GpuScope::Gpu(gpu.index())) {
                    continue;
                }
                if entry.source_id() == Some(SourceId::GpuTemperature) {
                    report.gpu_temperature = entry.data();
                }
            }
        }

        for entry in view.entries() {
            if entry.scope() != Some(GpuScope::Global) {
                continue;
            }
            match entry.source_id() {
                Some(SourceId::Framerate) => report.framerate = entry.data(),
                Some(SourceId::CpuTemperature) => report.cpu_temperature = entry.data(),
                _ => {}
            }
        }

        trace!(
            cpu = report.cpu_temperature,
            gpu = report.gpu_temperature,
            fps = report.framerate,
            "Extracted report"
        );
        report
    }

    /// Display packet: `"<cpu>;<gpu>;<fps>;"` with two decimals each
    pub fn packet(&self) -> String {
        format!("{:.2};{:.2};{:.2};", self.cpu_temperature, self.gpu_temperature, self.framerate)
    }

    /// Producer poll time in the local timezone
    pub fn poll_time(&self) -> Option<DateTime<Local>> {
        DateTime::from_timestamp(self.timestamp, 0).map(|utc| utc.with_timezone(&Local))
    }

    /// Producer poll time formatted with [`POLL_TIME_FORMAT`]
    pub fn formatted_poll_time(&self) -> Option<String> {
        self.poll_time().map(|time| time.format(POLL_TIME_FORMAT).to_string())
    }
}
