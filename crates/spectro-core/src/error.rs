//! Error types for the spectrometer acquisition core.
//!
//! Two layers of error live here:
//!
//! - **`DeviceFault`**: what a device handle returns when a single SDK call does
//!   not report success. It carries the device, the SDK operation name and the
//!   raw vendor code so nothing is lost on the way up.
//! - **`SpectroError`**: the error type of every session-level operation. Device
//!   faults are wrapped, never swallowed; argument and lifecycle problems get
//!   their own variants.
//!
//! Acquisition outcomes (`Aborted`, a non-success status during polling) are *not*
//! errors. They travel in [`AcquisitionResult`](crate::data::AcquisitionResult).

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Device Faults
// =============================================================================

/// Which half of the instrument a fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Area-scan CCD detector.
    Detector,
    /// Dispersive spectrograph (grating, slit, wavelength drive).
    Spectrograph,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceKind::Detector => "detector",
            DeviceKind::Spectrograph => "spectrograph",
        };
        write!(f, "{}", label)
    }
}

/// A device call that returned a non-success vendor code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{device} {operation} failed with code {code}")]
pub struct DeviceFault {
    /// Device that reported the fault.
    pub device: DeviceKind,
    /// SDK operation name, e.g. `"SetImage"`.
    pub operation: &'static str,
    /// Raw vendor status code.
    pub code: i32,
}

impl DeviceFault {
    /// Fault reported by the detector.
    pub fn detector(operation: &'static str, code: i32) -> Self {
        Self {
            device: DeviceKind::Detector,
            operation,
            code,
        }
    }

    /// Fault reported by the spectrograph.
    pub fn spectrograph(operation: &'static str, code: i32) -> Self {
        Self {
            device: DeviceKind::Spectrograph,
            operation,
            code,
        }
    }
}

/// Result of a single device handle call.
pub type DeviceResult<T> = std::result::Result<T, DeviceFault>;

// =============================================================================
// Session Errors
// =============================================================================

/// Convenience alias for session-level results.
pub type SpectroResult<T> = std::result::Result<T, SpectroError>;

/// Primary error type for spectrometer operations.
///
/// # Error Categories
///
/// 1. **Lifecycle** - `InitializationFailure`, `SessionAlreadyOpen`, `SessionClosed`
///    - Occur while opening or after closing a session
///    - Recovery: fix the hardware/claim situation and open a new session
///
/// 2. **Hardware** - `Device`, `CalibrationLength`
///    - A device rejected a command or returned malformed data
///    - Recovery: surfaced to the caller as-is; nothing in the core retries
///
/// 3. **Arguments** - `InvalidWindow`, `InvalidGeometry`, `InvalidParameter`, `Configuration`
///    - The request could not be turned into a legal device command
///    - Recovery: correct the request
#[derive(Error, Debug)]
pub enum SpectroError {
    /// One of the two devices failed to initialize.
    ///
    /// **Error Type**: Fatal for this open attempt. Any device that did open has
    /// already been released when this error is returned, so no partial session
    /// exists.
    ///
    /// **Recovery Strategy**: Check power, cabling and that no other process owns
    /// the hardware, then open again.
    #[error("Failed to initialize {device}: {fault}")]
    InitializationFailure {
        /// Device that failed to come up.
        device: DeviceKind,
        /// Underlying SDK fault.
        fault: DeviceFault,
    },

    /// A live session already owns this device.
    ///
    /// **Error Type**: Permanent while the other session lives.
    ///
    /// **Recovery Strategy**: Share the existing session (it is `Send + Sync`)
    /// instead of opening a second one, or close it first.
    #[error("Device '{device_id}' is already owned by an open session")]
    SessionAlreadyOpen {
        /// Identifier of the contested device.
        device_id: String,
    },

    /// The session was closed; its devices are released.
    #[error("Session is closed")]
    SessionClosed,

    /// A device command failed outside of acquisition polling.
    #[error("Device error: {0}")]
    Device(#[from] DeviceFault),

    /// A requested ROI violates the detector bounds.
    ///
    /// # Example
    ///
    /// ```rust
    /// use spectro_core::geometry::RoiWindow;
    ///
    /// // Columns start at 1, so a zero column is rejected.
    /// assert!(RoiWindow::new(0, 10, 1, 10, 512, 512).is_err());
    /// ```
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// Detector geometry reported by the device is unusable (zero size, non-positive pixel pitch).
    #[error("Invalid detector geometry: {0}")]
    InvalidGeometry(String),

    /// A parameter value cannot be sent to the hardware.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The spectrograph returned a calibration of the wrong length.
    #[error("Calibration has {actual} entries, expected {expected}")]
    CalibrationLength {
        /// Detector width in pixels.
        expected: usize,
        /// Number of wavelengths returned.
        actual: usize,
    },

    /// Settings failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl SpectroError {
    /// Vendor code carried by this error, if it came from a device.
    pub fn device_code(&self) -> Option<i32> {
        match self {
            SpectroError::InitializationFailure { fault, .. } => Some(fault.code),
            SpectroError::Device(fault) => Some(fault.code),
            _ => None,
        }
    }
}
