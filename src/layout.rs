//! MAHM shared memory format structures and the validated read-only view
//!
//! MSI Afterburner publishes hardware monitoring data into a named file
//! mapping with the following layout:
//!
//! 1. **Header** - 24 bytes in v1.0, 32 bytes in v2.0 (`dwHeaderSize` is authoritative)
//! 2. **Entry table** - `dwNumEntries` records of `dwEntrySize` bytes each
//! 3. **GPU table** (v2.0+) - `dwNumGpuEntries` records of `dwGpuEntrySize` bytes each
//!
//! Record strides come from the header and grow between producer releases, so
//! fields are always addressed relative to the declared stride and never via a
//! fixed struct size. [`LayoutView::new`] checks every declared table against
//! the length of the mapped region before any record is addressed.

use crate::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Name of the producer's file mapping object
pub const MAHM_SHARED_MEMORY_NAME: &str = "MAHMSharedMemory";
/// `'MAHM'` as a little-endian DWORD multi-char literal
pub const MAHM_SIGNATURE: u32 = 0x4D41_484D;
/// Written by the producer when it unloads and tears the segment down
pub const MAHM_DEAD_SIGNATURE: u32 = 0xDEAD;
/// Shared memory format v1.0
pub const MAHM_VERSION_1_0: u32 = 0x0001_0000;
/// Shared memory format v2.0, the first with GPU entries
pub const MAHM_VERSION_2_0: u32 = 0x0002_0000;
/// `dwGpu` value marking an entry that is not scoped to a GPU
pub const GLOBAL_GPU_INDEX: u32 = 0xFFFF_FFFF;

const MAX_PATH: usize = 260;

pub const HEADER_V1_SIZE: usize = 24;
pub const HEADER_V2_SIZE: usize = 32;

// Entry: szSrcName, szSrcUnits, szLocalizedSrcName, szLocalizedSrcUnits,
// szRecommendedFormat, then the scalar fields.
const ENTRY_SRC_NAME_OFFSET: usize = 0;
const ENTRY_SRC_UNITS_OFFSET: usize = MAX_PATH;
const ENTRY_LOCALIZED_NAME_OFFSET: usize = 2 * MAX_PATH;
const ENTRY_DATA_OFFSET: usize = 5 * MAX_PATH;
const ENTRY_MIN_LIMIT_OFFSET: usize = ENTRY_DATA_OFFSET + 4;
const ENTRY_MAX_LIMIT_OFFSET: usize = ENTRY_DATA_OFFSET + 8;
const ENTRY_FLAGS_OFFSET: usize = ENTRY_DATA_OFFSET + 12;
const ENTRY_GPU_OFFSET: usize = ENTRY_DATA_OFFSET + 16;
const ENTRY_SRC_ID_OFFSET: usize = ENTRY_DATA_OFFSET + 20;
pub const ENTRY_V1_SIZE: usize = ENTRY_GPU_OFFSET;
pub const ENTRY_V2_SIZE: usize = ENTRY_SRC_ID_OFFSET + 4;

// GPU entry: szGpuId, szFamily, szDevice, szDriver, szBIOS, dwMemAmount.
const GPU_ID_OFFSET: usize = 0;
const GPU_FAMILY_OFFSET: usize = MAX_PATH;
const GPU_DEVICE_OFFSET: usize = 2 * MAX_PATH;
const GPU_DRIVER_OFFSET: usize = 3 * MAX_PATH;
const GPU_BIOS_OFFSET: usize = 4 * MAX_PATH;
const GPU_MEM_AMOUNT_OFFSET: usize = 5 * MAX_PATH;
pub const GPU_ENTRY_SIZE: usize = GPU_MEM_AMOUNT_OFFSET + 4;

/// Liveness state encoded in `dwSignature`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum Signature {
    /// Zeroed memory: the producer created the mapping but has not signed it yet
    Uninitialized,
    /// `'MAHM'`
    Valid,
    /// `0xDEAD`: the producer unloaded
    Dead,
    /// Anything else
    Unknown(u32),
}

impl Signature {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Signature::Uninitialized,
            MAHM_SIGNATURE => Signature::Valid,
            MAHM_DEAD_SIGNATURE => Signature::Dead,
            other => Signature::Unknown(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Signature::Uninitialized => 0,
            Signature::Valid => MAHM_SIGNATURE,
            Signature::Dead => MAHM_DEAD_SIGNATURE,
            Signature::Unknown(raw) => raw,
        }
    }

    /// Read the signature from the first DWORD of a mapped region.
    ///
    /// A region too short to hold a signature counts as uninitialized.
    pub fn peek(region: &[u8]) -> Self {
        read_u32_le(region, 0).map(Signature::from_raw).unwrap_or(Signature::Uninitialized)
    }
}

/// Monitoring source identifier (`dwSrcId`)
///
/// Only the sources this crate reports on are named; everything else is
/// carried through as [`SourceId::Other`] and ignored by extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum SourceId {
    GpuTemperature,
    Framerate,
    CpuTemperature,
    Other(u32),
}

impl SourceId {
    pub const GPU_TEMPERATURE: u32 = 0x0000_0000;
    pub const FRAMERATE: u32 = 0x0000_0050;
    pub const CPU_TEMPERATURE: u32 = 0x0000_0080;

    pub fn from_raw(raw: u32) -> Self {
        match raw {
            Self::GPU_TEMPERATURE => SourceId::GpuTemperature,
            Self::FRAMERATE => SourceId::Framerate,
            Self::CPU_TEMPERATURE => SourceId::CpuTemperature,
            other => SourceId::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            SourceId::GpuTemperature => Self::GPU_TEMPERATURE,
            SourceId::Framerate => Self::FRAMERATE,
            SourceId::CpuTemperature => Self::CPU_TEMPERATURE,
            SourceId::Other(raw) => raw,
        }
    }
}

/// Which GPU an entry belongs to (`dwGpu`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuScope {
    Global,
    Gpu(u32),
}

impl GpuScope {
    pub fn from_raw(raw: u32) -> Self {
        if raw == GLOBAL_GPU_INDEX { GpuScope::Global } else { GpuScope::Gpu(raw) }
    }

    pub fn raw(self) -> u32 {
        match self {
            GpuScope::Global => GLOBAL_GPU_INDEX,
            GpuScope::Gpu(index) => index,
        }
    }
}

/// Shared memory header (matches MAHM_SHARED_MEMORY_HEADER)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMemoryHeader {
    pub signature: Signature,
    pub version: u32,
    pub header_size: u32,
    pub num_entries: u32,
    pub entry_size: u32,
    /// Last polling time, 32-bit `time_t`
    pub time: i32,
    /// Zero before v2.0
    pub num_gpu_entries: u32,
    /// Zero before v2.0
    pub gpu_entry_size: u32,
}

impl SharedMemoryHeader {
    pub fn parse(region: &[u8]) -> Result<Self> {
        // struct MAHM_SHARED_MEMORY_HEADER {
        //   DWORD dwSignature;      // offset 0
        //   DWORD dwVersion;        // offset 4
        //   DWORD dwHeaderSize;     // offset 8
        //   DWORD dwNumEntries;     // offset 12
        //   DWORD dwEntrySize;      // offset 16
        //   LONG  time;             // offset 20
        //   DWORD dwNumGpuEntries;  // offset 24, v2.0+
        //   DWORD dwGpuEntrySize;   // offset 28, v2.0+
        // }
        let signature = Signature::from_raw(read_u32_le(region, 0)?);
        let version = read_u32_le(region, 4)?;
        let header_size = read_u32_le(region, 8)?;
        let num_entries = read_u32_le(region, 12)?;
        let entry_size = read_u32_le(region, 16)?;
        let time = read_i32_le(region, 20)?;

        let (num_gpu_entries, gpu_entry_size) = if version >= MAHM_VERSION_2_0 {
            (read_u32_le(region, 24)?, read_u32_le(region, 28)?)
        } else {
            (0, 0)
        };

        Ok(Self {
            signature,
            version,
            header_size,
            num_entries,
            entry_size,
            time,
            num_gpu_entries,
            gpu_entry_size,
        })
    }

    /// GPU entries are available only in v2.0 and newer
    pub fn supports_gpu_entries(&self) -> bool {
        self.version >= MAHM_VERSION_2_0
    }
}

/// Read-only typed view over a mapped MAHM region.
///
/// Construction validates the declared table geometry against the region, so
/// every record handed out by the view lies fully inside it.
#[derive(Debug, Clone, Copy)]
pub struct LayoutView<'a> {
    region: &'a [u8],
    header: SharedMemoryHeader,
    entries_offset: usize,
    gpu_entries_offset: usize,
}

impl<'a> LayoutView<'a> {
    pub fn new(region: &'a [u8]) -> Result<Self> {
        let header = SharedMemoryHeader::parse(region)?;

        let minimum_header =
            if header.supports_gpu_entries() { HEADER_V2_SIZE } else { HEADER_V1_SIZE };
        let entries_offset = header.header_size as usize;
        if entries_offset < minimum_header {
            return Err(reject(
                "header size",
                format!("dwHeaderSize {} below the {} byte minimum", entries_offset, minimum_header),
            ));
        }

        // v2.0 entries carry dwGpu and dwSrcId; without them no value can be attributed
        let minimum_entry =
            if header.supports_gpu_entries() { ENTRY_V2_SIZE } else { ENTRY_V1_SIZE };
        let entries_end = table_end(
            "entry table",
            entries_offset,
            header.num_entries,
            header.entry_size,
            minimum_entry,
            region.len(),
        )?;

        let gpu_entries_offset = entries_end;
        if header.supports_gpu_entries() {
            table_end(
                "GPU table",
                gpu_entries_offset,
                header.num_gpu_entries,
                header.gpu_entry_size,
                GPU_ENTRY_SIZE,
                region.len(),
            )?;
        }

        trace!(
            version = header.version,
            num_entries = header.num_entries,
            entry_size = header.entry_size,
            num_gpu_entries = header.num_gpu_entries,
            region_len = region.len(),
            "Validated MAHM layout"
        );

        Ok(Self { region, header, entries_offset, gpu_entries_offset })
    }

    pub fn header(&self) -> &SharedMemoryHeader {
        &self.header
    }

    pub fn region_len(&self) -> usize {
        self.region.len()
    }

    pub fn entry_count(&self) -> usize {
        self.header.num_entries as usize
    }

    /// Number of GPU entries, zero for pre-v2.0 memory
    pub fn gpu_count(&self) -> usize {
        if self.header.supports_gpu_entries() { self.header.num_gpu_entries as usize } else { 0 }
    }

    pub fn entry(&self, index: usize) -> Option<MonitoringEntry<'a>> {
        if index >= self.entry_count() {
            return None;
        }
        let stride = self.header.entry_size as usize;
        let start = self.entries_offset + index * stride;
        self.region.get(start..start + stride).map(|bytes| MonitoringEntry { index, bytes })
    }

    pub fn entries(&self) -> impl Iterator<Item = MonitoringEntry<'a>> + '_ {
        (0..self.entry_count()).filter_map(move |index| self.entry(index))
    }

    pub fn gpu_entry(&self, index: usize) -> Option<GpuEntry<'a>> {
        if index >= self.gpu_count() {
            return None;
        }
        let stride = self.header.gpu_entry_size as usize;
        let start = self.gpu_entries_offset + index * stride;
        self.region.get(start..start + stride).map(|bytes| GpuEntry { index: index as u32, bytes })
    }

    pub fn gpu_entries(&self) -> impl Iterator<Item = GpuEntry<'a>> + '_ {
        (0..self.gpu_count()).filter_map(move |index| self.gpu_entry(index))
    }
}

/// One monitoring data source record
#[derive(Debug, Clone, Copy)]
pub struct MonitoringEntry<'a> {
    index: usize,
    bytes: &'a [u8],
}

impl MonitoringEntry<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source_name(&self) -> String {
        field_string(self.bytes, ENTRY_SRC_NAME_OFFSET)
    }

    pub fn units(&self) -> String {
        field_string(self.bytes, ENTRY_SRC_UNITS_OFFSET)
    }

    pub fn localized_name(&self) -> String {
        field_string(self.bytes, ENTRY_LOCALIZED_NAME_OFFSET)
    }

    pub fn data(&self) -> f32 {
        field_f32(self.bytes, ENTRY_DATA_OFFSET)
    }

    pub fn min_limit(&self) -> f32 {
        field_f32(self.bytes, ENTRY_MIN_LIMIT_OFFSET)
    }

    pub fn max_limit(&self) -> f32 {
        field_f32(self.bytes, ENTRY_MAX_LIMIT_OFFSET)
    }

    pub fn flags(&self) -> u32 {
        field_u32(self.bytes, ENTRY_FLAGS_OFFSET)
    }

    /// GPU scope, absent when the stride predates v2.0 entries
    pub fn scope(&self) -> Option<GpuScope> {
        read_u32_le(self.bytes, ENTRY_GPU_OFFSET).ok().map(GpuScope::from_raw)
    }

    /// Source id, absent when the stride predates v2.0 entries
    pub fn source_id(&self) -> Option<SourceId> {
        read_u32_le(self.bytes, ENTRY_SRC_ID_OFFSET).ok().map(SourceId::from_raw)
    }
}

/// One GPU description record
#[derive(Debug, Clone, Copy)]
pub struct GpuEntry<'a> {
    index: u32,
    bytes: &'a [u8],
}

impl GpuEntry<'_> {
    /// Index that scoped monitoring entries refer to via `dwGpu`
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn gpu_id(&self) -> String {
        field_string(self.bytes, GPU_ID_OFFSET)
    }

    pub fn family(&self) -> String {
        field_string(self.bytes, GPU_FAMILY_OFFSET)
    }

    pub fn device(&self) -> String {
        field_string(self.bytes, GPU_DEVICE_OFFSET)
    }

    pub fn driver(&self) -> String {
        field_string(self.bytes, GPU_DRIVER_OFFSET)
    }

    pub fn bios(&self) -> String {
        field_string(self.bytes, GPU_BIOS_OFFSET)
    }

    /// Dedicated memory in MB
    pub fn memory_amount(&self) -> u32 {
        field_u32(self.bytes, GPU_MEM_AMOUNT_OFFSET)
    }
}

/// End offset of a `count * stride` table starting at `start`, checked against the region.
fn table_end(
    context: &str,
    start: usize,
    count: u32,
    stride: u32,
    minimum_stride: usize,
    region_len: usize,
) -> Result<usize> {
    if count > 0 && (stride as usize) < minimum_stride {
        return Err(reject(
            context,
            format!("stride {} below the {} byte minimum", stride, minimum_stride),
        ));
    }

    let end = (count as usize)
        .checked_mul(stride as usize)
        .and_then(|len| start.checked_add(len))
        .ok_or_else(|| {
            reject(context, format!("{} records of {} bytes overflow the address space", count, stride))
        })?;

    if end > region_len {
        return Err(reject(
            context,
            format!(
                "table ends at {} past the {} byte region (offset={}, count={}, stride={})",
                end, region_len, start, count, stride
            ),
        ));
    }
    Ok(end)
}

fn reject(context: &str, details: String) -> TelemetryError {
    warn!("Rejecting MAHM {}: {}", context, details);
    TelemetryError::layout(context, details)
}

/// Safe byte parsing helpers with bounds checking
fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = offset
        .checked_add(4)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| TelemetryError::memory_access_error(offset, data.len()))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i32_le(data: &[u8], offset: usize) -> Result<i32> {
    read_u32_le(data, offset).map(|raw| raw as i32)
}

// Record fields below the validated minimum stride are always in bounds.
fn field_u32(record: &[u8], offset: usize) -> u32 {
    read_u32_le(record, offset).unwrap_or_default()
}

fn field_f32(record: &[u8], offset: usize) -> f32 {
    f32::from_bits(field_u32(record, offset))
}

fn field_string(record: &[u8], offset: usize) -> String {
    let bytes = record.get(offset..offset + MAX_PATH).unwrap_or_default();
    let null_pos = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..null_pos]).into_owned()
}
