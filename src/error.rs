//! Error types for shared memory telemetry reads.
//!
//! Every failure the reader can hit is a [`TelemetryError`]. The three
//! producer-state variants (`UninitializedMemory`, `ProducerNotInstalled`,
//! `ProducerNotRunning`) are the ones a caller is expected to see in normal
//! operation; they are all transient and the caller simply polls again later.
//!
//! ## Error Categories
//!
//! - **Producer State**: the producer is missing, stopped, or still initializing
//! - **Layout Errors**: the header describes tables that do not fit the mapping
//! - **Argument Errors**: the C caller handed us an unusable buffer
//! - **Windows API Errors**: platform-specific Windows operation failures
//!
//! ## Exported status codes
//!
//! The C export reports errors as negative integers via
//! [`TelemetryError::status_code`]:
//!
//! ```rust
//! use mahm_telemetry::TelemetryError;
//!
//! let error = TelemetryError::ProducerNotRunning;
//! assert_eq!(error.status_code(), -3);
//! assert!(error.is_retryable());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

#[cfg(windows)]
use windows_core as core;

/// Result type alias for telemetry operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Status code for memory that is mapped but not signed `'MAHM'`.
pub const STATUS_UNINITIALIZED_MEMORY: i32 = -1;
/// Status code for a producer with no install path.
pub const STATUS_PRODUCER_NOT_INSTALLED: i32 = -2;
/// Status code for an installed producer without a live segment.
pub const STATUS_PRODUCER_NOT_RUNNING: i32 = -3;
/// Status code for a null or negative-length caller buffer.
pub const STATUS_INVALID_ARGUMENT: i32 = -4;
/// Status code for every other failure.
pub const STATUS_INTERNAL: i32 = -5;

/// Main error type for telemetry operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("Connected to uninitialized hardware monitoring shared memory (signature {signature:#010x})")]
    UninitializedMemory { signature: u32 },

    #[error("Hardware monitoring producer is not installed")]
    ProducerNotInstalled,

    #[error("Hardware monitoring producer is installed but not running")]
    ProducerNotRunning,

    #[error("Shared memory layout rejected in {context}: {details}")]
    Layout { context: String, details: String },

    #[error("Memory access out of bounds at offset {offset:#x} (region is {len} bytes)")]
    Memory { offset: usize, len: usize },

    #[error("Invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("Install path {path} is not accessible")]
    InstallPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },

    #[error("Windows API error: {operation}")]
    #[cfg(windows)]
    WindowsApi {
        operation: String,
        #[source]
        source: core::Error,
    },
}

impl TelemetryError {
    /// Returns whether this error is potentially recoverable by polling again.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::UninitializedMemory { .. } => true,
            TelemetryError::ProducerNotInstalled => true,
            TelemetryError::ProducerNotRunning => true,
            TelemetryError::Layout { .. } => true,
            TelemetryError::Memory { .. } => true,
            TelemetryError::InvalidArgument { .. } => false,
            TelemetryError::InstallPath { .. } => true,
            TelemetryError::UnsupportedPlatform { .. } => false,
            #[cfg(windows)]
            TelemetryError::WindowsApi { .. } => true,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TelemetryError::UninitializedMemory { .. } => vec![
                "Wait for MSI Afterburner to finish starting up",
                "Enable hardware monitoring in MSI Afterburner settings",
            ],
            TelemetryError::ProducerNotInstalled => vec![
                "Install MSI Afterburner",
                "Check that the Software\\MSI\\Afterburner registry key exists",
            ],
            TelemetryError::ProducerNotRunning => vec![
                "Start MSI Afterburner",
                "Check Windows permissions for shared memory access",
            ],
            TelemetryError::Layout { .. } | TelemetryError::Memory { .. } => vec![
                "Restart MSI Afterburner",
                "Check MSI Afterburner version compatibility",
            ],
            TelemetryError::InvalidArgument { .. } => vec![
                "Pass a non-null buffer",
                "Pass a non-negative buffer length",
            ],
            TelemetryError::InstallPath { .. } => vec![
                "Reinstall MSI Afterburner",
                "Check file system permissions on the install directory",
            ],
            TelemetryError::UnsupportedPlatform { .. } => vec![
                "Run the reader on Windows alongside MSI Afterburner",
                "Use the synthetic layout builder for cross-platform testing",
            ],
            #[cfg(windows)]
            TelemetryError::WindowsApi { .. } => vec![
                "Check Windows API permissions",
                "Verify system resources availability",
            ],
        }
    }

    /// Maps this error onto the negative status code returned by the C export.
    pub fn status_code(&self) -> i32 {
        match self {
            TelemetryError::UninitializedMemory { .. } => STATUS_UNINITIALIZED_MEMORY,
            TelemetryError::ProducerNotInstalled => STATUS_PRODUCER_NOT_INSTALLED,
            TelemetryError::ProducerNotRunning => STATUS_PRODUCER_NOT_RUNNING,
            TelemetryError::InvalidArgument { .. } => STATUS_INVALID_ARGUMENT,
            _ => STATUS_INTERNAL,
        }
    }

    /// Helper constructor for layout validation errors.
    pub fn layout(context: impl Into<String>, details: impl Into<String>) -> Self {
        TelemetryError::Layout { context: context.into(), details: details.into() }
    }

    /// Helper constructor for out-of-bounds reads.
    pub fn memory_access_error(offset: usize, len: usize) -> Self {
        TelemetryError::Memory { offset, len }
    }

    /// Helper constructor for invalid caller arguments.
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        TelemetryError::InvalidArgument { details: details.into() }
    }

    /// Helper constructor for Windows API errors.
    #[cfg(windows)]
    pub fn windows_api_error(operation: impl Into<String>, source: core::Error) -> Self {
        TelemetryError::WindowsApi { operation: operation.into(), source }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        TelemetryError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }
}

#[cfg(windows)]
impl From<core::Error> for TelemetryError {
    fn from(err: core::Error) -> Self {
        TelemetryError::WindowsApi {
            operation: "Unknown Windows operation".to_string(),
            source: err,
        }
    }
}
