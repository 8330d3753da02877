//! Test utilities: synthetic MAHM images and in-memory OS seams
//!
//! [`LayoutBuilder`] produces byte-exact shared memory images the way the
//! producer lays them out, so parsing and extraction can be exercised on any
//! platform. [`ScriptedSource`] and [`FixedLocator`] stand in for the file
//! mapping and registry, recording how often they were used.

#![cfg(any(test, feature = "benchmark"))]

use crate::layout::{
    ENTRY_V2_SIZE, GPU_ENTRY_SIZE, GpuScope, HEADER_V1_SIZE, HEADER_V2_SIZE, MAHM_DEAD_SIGNATURE,
    MAHM_SIGNATURE, MAHM_VERSION_2_0, SourceId,
};
use crate::source::{InstallLocator, Segment, SegmentSource};
use crate::{Result, TelemetryError};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const MAX_PATH: usize = 260;

#[derive(Debug, Clone)]
struct EntrySpec {
    name: String,
    units: &'static str,
    source_id: u32,
    gpu: u32,
    data: f32,
    flags: u32,
}

/// Builds shared memory images with producer-style layout.
///
/// Defaults to a valid v2.0 header with v2.0 strides and no records. Counts
/// written to the header follow the added records unless overridden with
/// [`LayoutBuilder::declared_entries`] / [`LayoutBuilder::declared_gpus`],
/// which is how tests fake a corrupt producer.
#[derive(Debug, Clone)]
pub struct LayoutBuilder {
    signature: u32,
    version: u32,
    header_size: Option<u32>,
    time: i32,
    entry_stride: u32,
    gpu_stride: u32,
    entries: Vec<EntrySpec>,
    gpus: Vec<String>,
    declared_entries: Option<u32>,
    declared_gpus: Option<u32>,
    entry_flags: u32,
}

impl Default for LayoutBuilder {
    fn default() -> Self {
        Self {
            signature: MAHM_SIGNATURE,
            version: MAHM_VERSION_2_0,
            header_size: None,
            time: 0,
            entry_stride: ENTRY_V2_SIZE as u32,
            gpu_stride: GPU_ENTRY_SIZE as u32,
            entries: Vec::new(),
            gpus: Vec::new(),
            declared_entries: None,
            declared_gpus: None,
            entry_flags: 0,
        }
    }
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signature(mut self, signature: u32) -> Self {
        self.signature = signature;
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Override `dwHeaderSize`; defaults to the size for the chosen version
    pub fn header_size(mut self, header_size: u32) -> Self {
        self.header_size = Some(header_size);
        self
    }

    pub fn time(mut self, time: i32) -> Self {
        self.time = time;
        self
    }

    pub fn entry_stride(mut self, stride: u32) -> Self {
        self.entry_stride = stride;
        self
    }

    pub fn gpu_stride(mut self, stride: u32) -> Self {
        self.gpu_stride = stride;
        self
    }

    /// `dwFlags` written to entries added after this call
    pub fn entry_flags(mut self, flags: u32) -> Self {
        self.entry_flags = flags;
        self
    }

    /// Add a monitoring entry named after its source
    pub fn entry(self, source: SourceId, scope: GpuScope, data: f32) -> Self {
        let (name, units) = match source {
            SourceId::GpuTemperature => ("GPU temperature", "°C"),
            SourceId::CpuTemperature => ("CPU temperature", "°C"),
            SourceId::Framerate => ("Framerate", "FPS"),
            SourceId::Other(_) => ("Other", ""),
        };
        self.named_entry(name, units, source, scope, data)
    }

    pub fn named_entry(
        mut self,
        name: &str,
        units: &'static str,
        source: SourceId,
        scope: GpuScope,
        data: f32,
    ) -> Self {
        self.entries.push(EntrySpec {
            name: name.to_string(),
            units,
            source_id: source.raw(),
            gpu: scope.raw(),
            data,
            flags: self.entry_flags,
        });
        self
    }

    /// Add a GPU entry with the given device name
    pub fn gpu(mut self, device: &str) -> Self {
        self.gpus.push(device.to_string());
        self
    }

    /// Write this `dwNumEntries` regardless of the entries added
    pub fn declared_entries(mut self, count: u32) -> Self {
        self.declared_entries = Some(count);
        self
    }

    /// Write this `dwNumGpuEntries` regardless of the GPUs added
    pub fn declared_gpus(mut self, count: u32) -> Self {
        self.declared_gpus = Some(count);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let has_gpu_table = self.version >= MAHM_VERSION_2_0;
        let natural_header = if has_gpu_table { HEADER_V2_SIZE } else { HEADER_V1_SIZE };
        let header_size = self.header_size.unwrap_or(natural_header as u32);
        let entry_stride = self.entry_stride as usize;
        let gpu_stride = self.gpu_stride as usize;

        // Records start at the declared header size; a bogus (small) value
        // still gets a full header so the header fields can be written.
        let entries_offset = (header_size as usize).max(natural_header);
        let gpus_offset = entries_offset + self.entries.len() * entry_stride;
        let gpu_records = if has_gpu_table { self.gpus.len() } else { 0 };
        let mut image = vec![0u8; gpus_offset + gpu_records * gpu_stride];

        put_u32(&mut image, 0, self.signature);
        put_u32(&mut image, 4, self.version);
        put_u32(&mut image, 8, header_size);
        put_u32(&mut image, 12, self.declared_entries.unwrap_or(self.entries.len() as u32));
        put_u32(&mut image, 16, self.entry_stride);
        put_u32(&mut image, 20, self.time as u32);
        if has_gpu_table {
            put_u32(&mut image, 24, self.declared_gpus.unwrap_or(self.gpus.len() as u32));
            put_u32(&mut image, 28, self.gpu_stride);
        }

        for (index, entry) in self.entries.iter().enumerate() {
            let base = entries_offset + index * entry_stride;
            let record = &mut image[base..base + entry_stride];
            put_str(record, 0, &entry.name);
            put_str(record, MAX_PATH, entry.units);
            put_str(record, 2 * MAX_PATH, &format!("{} (localized)", entry.name));
            put_str(record, 3 * MAX_PATH, entry.units);
            put_u32(record, 5 * MAX_PATH, entry.data.to_bits());
            put_u32(record, 5 * MAX_PATH + 4, 0f32.to_bits());
            put_u32(record, 5 * MAX_PATH + 8, 100f32.to_bits());
            put_u32(record, 5 * MAX_PATH + 12, entry.flags);
            put_u32(record, 5 * MAX_PATH + 16, entry.gpu);
            put_u32(record, 5 * MAX_PATH + 20, entry.source_id);
        }

        for (index, device) in self.gpus.iter().take(gpu_records).enumerate() {
            let base = gpus_offset + index * gpu_stride;
            let record = &mut image[base..base + gpu_stride];
            put_str(record, 0, &format!("VEN_10DE&DEV_{:04X}", index));
            put_str(record, MAX_PATH, "GeForce");
            put_str(record, 2 * MAX_PATH, device);
            put_str(record, 3 * MAX_PATH, "560.94");
            put_str(record, 4 * MAX_PATH, "94.02.42.00.A8");
            put_u32(record, 5 * MAX_PATH, 8192);
        }

        image
    }
}

// Writes that would land past a short record are dropped, so callers can
// build deliberately undersized strides.
fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    if let Some(slot) = buf.get_mut(offset..offset + 4) {
        slot.copy_from_slice(&value.to_le_bytes());
    }
}

fn put_str(buf: &mut [u8], offset: usize, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(MAX_PATH - 1);
    if let Some(slot) = buf.get_mut(offset..offset + len) {
        slot.copy_from_slice(&bytes[..len]);
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<Option<Vec<u8>>>,
    current: Option<Option<Vec<u8>>>,
    opens: usize,
    releases: usize,
    live: usize,
}

/// In-memory segment source fed from a script of images.
///
/// Each `open` consumes the next scripted step: an image, or a closed segment
/// ([`ScriptedSource::push_closed`]). Once the script runs out the last step
/// repeats, so a producer that stays up keeps serving the same image.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    state: Arc<Mutex<ScriptState>>,
    killed_through: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an image for the next open
    pub fn push(&self, image: Vec<u8>) {
        self.lock().queue.push_back(Some(image));
    }

    /// Queue a failed open (mapping does not exist)
    pub fn push_closed(&self) {
        self.lock().queue.push_back(None);
    }

    /// Make every segment handed out so far read as `0xDEAD`, like a producer unloading
    pub fn mark_live_dead(&self) {
        let opens = self.lock().opens;
        self.killed_through.store(opens, Ordering::SeqCst);
    }

    /// Number of open attempts, successful or not
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Number of segments released
    pub fn releases(&self) -> usize {
        self.lock().releases
    }

    /// Number of segments currently mapped
    pub fn live(&self) -> usize {
        self.lock().live
    }
}

impl SegmentSource for ScriptedSource {
    type Segment = ScriptedSegment;

    fn open(&mut self) -> Result<Self::Segment> {
        let mut state = self.lock();
        state.opens += 1;
        if let Some(step) = state.queue.pop_front() {
            state.current = Some(step);
        }

        let Some(Some(image)) = state.current.clone() else {
            return Err(TelemetryError::ProducerNotRunning);
        };
        state.live += 1;

        let mut dead_image = image.clone();
        if let Some(signature) = dead_image.get_mut(0..4) {
            signature.copy_from_slice(&MAHM_DEAD_SIGNATURE.to_le_bytes());
        }

        Ok(ScriptedSegment {
            image,
            dead_image,
            sequence: state.opens,
            killed_through: Arc::clone(&self.killed_through),
            state: Arc::clone(&self.state),
        })
    }
}

/// Segment handed out by [`ScriptedSource`]
#[derive(Debug)]
pub struct ScriptedSegment {
    image: Vec<u8>,
    dead_image: Vec<u8>,
    sequence: usize,
    killed_through: Arc<AtomicUsize>,
    state: Arc<Mutex<ScriptState>>,
}

impl Segment for ScriptedSegment {
    fn bytes(&self) -> &[u8] {
        if self.sequence <= self.killed_through.load(Ordering::SeqCst) {
            &self.dead_image
        } else {
            &self.image
        }
    }
}

impl Drop for ScriptedSegment {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.live -= 1;
        state.releases += 1;
    }
}

/// Install locator returning a fixed answer and counting lookups
#[derive(Debug, Clone)]
pub struct FixedLocator {
    path: Option<PathBuf>,
    lookups: Arc<AtomicUsize>,
}

impl FixedLocator {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path, lookups: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl InstallLocator for FixedLocator {
    fn install_path(&mut self) -> Option<PathBuf> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.path.clone()
    }
}
