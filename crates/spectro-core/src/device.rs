//! Device handle traits.
//!
//! `Detector` and `Spectrograph` are the command/query surface the acquisition
//! core consumes from the vendor SDKs. Each method maps to exactly one SDK call
//! and returns the raw outcome; no method retries, sleeps or caches.
//!
//! Handles are synchronous: SDK calls are short and blocking. All scheduling
//! (mutual exclusion, polling, settle delays) belongs to the session that owns
//! the handles.

use crate::error::DeviceResult;
use crate::geometry::RoiWindow;
use serde::{Deserialize, Serialize};

// =============================================================================
// Status Codes
// =============================================================================

/// Andor SDK success code.
pub const DRV_SUCCESS: i32 = 20002;
/// Detector is exposing or reading out.
pub const DRV_ACQUIRING: i32 = 20072;
/// Detector is idle; a started acquisition has completed.
pub const DRV_IDLE: i32 = 20073;
/// Cooler is off.
pub const DRV_TEMP_OFF: i32 = 20034;
/// Temperature reached the set point but is not yet stable.
pub const DRV_TEMP_NOT_STABILIZED: i32 = 20035;
/// Temperature is stable at the set point.
pub const DRV_TEMP_STABILIZED: i32 = 20036;
/// Temperature has not reached the set point.
pub const DRV_TEMP_NOT_REACHED: i32 = 20037;
/// Shamrock SDK success code.
pub const SHAMROCK_SUCCESS: i32 = 20202;

// =============================================================================
// Detector Settings
// =============================================================================

/// Detector read-out mode (`SetReadMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadMode {
    /// Full vertical binning.
    FullVerticalBinning,
    /// Multi-track.
    MultiTrack,
    /// Random-track.
    RandomTrack,
    /// Single-track.
    SingleTrack,
    /// Image; the mode used for every geometry in this crate.
    Image,
}

impl ReadMode {
    /// SDK integer for this mode.
    pub fn code(self) -> i32 {
        match self {
            ReadMode::FullVerticalBinning => 0,
            ReadMode::MultiTrack => 1,
            ReadMode::RandomTrack => 2,
            ReadMode::SingleTrack => 3,
            ReadMode::Image => 4,
        }
    }
}

/// Detector acquisition mode (`SetAcquisitionMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionKind {
    /// One exposure per `StartAcquisition`.
    SingleScan,
    /// Accumulated exposures.
    Accumulate,
    /// Kinetic series.
    Kinetics,
    /// Fast kinetics.
    FastKinetics,
    /// Continuous until aborted.
    RunTillAbort,
}

impl AcquisitionKind {
    /// SDK integer for this mode.
    pub fn code(self) -> i32 {
        match self {
            AcquisitionKind::SingleScan => 1,
            AcquisitionKind::Accumulate => 2,
            AcquisitionKind::Kinetics => 3,
            AcquisitionKind::FastKinetics => 4,
            AcquisitionKind::RunTillAbort => 5,
        }
    }
}

/// Shutter behaviour (`SetShutter` mode argument).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutterMode {
    /// Opened and closed around each exposure.
    Auto,
    /// Permanently open.
    Open,
    /// Permanently closed.
    Closed,
}

impl ShutterMode {
    /// SDK integer for this mode.
    pub fn code(self) -> i32 {
        match self {
            ShutterMode::Auto => 0,
            ShutterMode::Open => 1,
            ShutterMode::Closed => 2,
        }
    }
}

/// Arguments of `SetShutter(typ, mode, closingtime, openingtime)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutterConfig {
    /// TTL level that opens the shutter (`true` = high).
    pub ttl_high: bool,
    /// Shutter mode.
    pub mode: ShutterMode,
    /// Closing time in milliseconds.
    pub closing_ms: i32,
    /// Opening time in milliseconds.
    pub opening_ms: i32,
}

impl ShutterConfig {
    /// Shutter driven automatically around exposures.
    pub fn auto(transfer_ms: i32) -> Self {
        Self {
            ttl_high: true,
            mode: ShutterMode::Auto,
            closing_ms: transfer_ms,
            opening_ms: transfer_ms,
        }
    }

    /// Shutter held open.
    pub fn open() -> Self {
        Self {
            ttl_high: true,
            mode: ShutterMode::Open,
            closing_ms: 0,
            opening_ms: 0,
        }
    }
}

/// Sensor temperature with the SDK's temperature status code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Sensor temperature in °C.
    pub celsius: f32,
    /// One of the `DRV_TEMP_*` codes.
    pub status: i32,
}

impl TemperatureReading {
    /// Whether the cooler reports a stable set point.
    pub fn is_stabilized(&self) -> bool {
        self.status == DRV_TEMP_STABILIZED
    }
}

// =============================================================================
// Spectrograph Settings
// =============================================================================

/// Description of one grating on the turret (`GetGratingInfo`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GratingInfo {
    /// Groove density in lines/mm.
    pub lines_per_mm: f32,
    /// Blaze wavelength label, e.g. `"500nm"`.
    pub blaze: String,
    /// Home position in motor steps.
    pub home: i32,
    /// Offset in motor steps.
    pub offset: i32,
}

// =============================================================================
// Device Traits
// =============================================================================

/// Command surface of the CCD detector.
///
/// Indices and windows follow the SDK convention (1-based, inclusive).
pub trait Detector: Send {
    /// Stable identifier of the physical device (serial number).
    fn device_id(&self) -> String;

    /// `Initialize`: power up and load the head configuration.
    fn initialize(&mut self) -> DeviceResult<()>;
    /// `ShutDown`: release the device.
    fn shutdown(&mut self) -> DeviceResult<()>;

    /// `SetTemperature`: cooler set point in °C.
    fn set_temperature(&mut self, celsius: i32) -> DeviceResult<()>;
    /// `CoolerON`.
    fn cooler_on(&mut self) -> DeviceResult<()>;
    /// `GetTemperatureF`.
    fn temperature(&mut self) -> DeviceResult<TemperatureReading>;

    /// `SetReadMode`.
    fn set_read_mode(&mut self, mode: ReadMode) -> DeviceResult<()>;
    /// `SetAcquisitionMode`.
    fn set_acquisition_mode(&mut self, mode: AcquisitionKind) -> DeviceResult<()>;
    /// `SetExposureTime`, seconds.
    fn set_exposure_time(&mut self, seconds: f32) -> DeviceResult<()>;
    /// `SetShutter`.
    fn set_shutter(&mut self, shutter: ShutterConfig) -> DeviceResult<()>;
    /// `SetHSSpeed(type, index)`.
    fn set_hs_speed(&mut self, output_amplifier: i32, index: i32) -> DeviceResult<()>;
    /// `SetVSSpeed(index)`.
    fn set_vs_speed(&mut self, index: i32) -> DeviceResult<()>;

    /// `GetDetector`: `(width, height)` in pixels.
    fn detector_size(&mut self) -> DeviceResult<(u32, u32)>;
    /// `GetPixelSize`: `(width, height)` in µm.
    fn pixel_size(&mut self) -> DeviceResult<(f32, f32)>;
    /// `GetBitDepth` of the active AD channel.
    fn bit_depth(&mut self) -> DeviceResult<u32>;

    /// `SetImage(1, 1, minCol, maxCol, minRow, maxRow)`, no binning.
    fn set_image_window(&mut self, window: RoiWindow) -> DeviceResult<()>;

    /// `StartAcquisition`.
    fn start_acquisition(&mut self) -> DeviceResult<()>;
    /// `GetStatus`: raw status code.
    fn status(&mut self) -> DeviceResult<i32>;
    /// `GetAcquiredData`: exactly `len` samples, row-major.
    fn acquired_data(&mut self, len: usize) -> DeviceResult<Vec<i32>>;
    /// `AbortAcquisition`.
    fn abort_acquisition(&mut self) -> DeviceResult<()>;
}

/// Command surface of the spectrograph.
pub trait Spectrograph: Send {
    /// Stable identifier of the physical device (serial number).
    fn device_id(&self) -> String;

    /// `ShamrockInitialize`.
    fn initialize(&mut self) -> DeviceResult<()>;
    /// `ShamrockClose`.
    fn shutdown(&mut self) -> DeviceResult<()>;

    /// `ShamrockSetNumberPixels`.
    fn set_number_pixels(&mut self, pixels: u32) -> DeviceResult<()>;
    /// `ShamrockSetPixelWidth`, µm.
    fn set_pixel_width(&mut self, width_um: f32) -> DeviceResult<()>;

    /// `ShamrockGetWavelengthLimits`: usable `(min, max)` nm for a grating (1-based).
    fn wavelength_limits(&mut self, grating: u32) -> DeviceResult<(f32, f32)>;
    /// `ShamrockSetWavelength`, nm.
    fn set_wavelength(&mut self, nm: f32) -> DeviceResult<()>;
    /// `ShamrockGetWavelength`, nm.
    fn wavelength(&mut self) -> DeviceResult<f32>;
    /// `ShamrockGetCalibration`: one wavelength per pixel.
    fn calibration(&mut self, pixels: u32) -> DeviceResult<Vec<f32>>;

    /// `ShamrockAutoSlitSetWidth`, µm.
    fn set_auto_slit_width(&mut self, slit: u32, width_um: f32) -> DeviceResult<()>;
    /// `ShamrockAutoSlitGetWidth`, µm.
    fn auto_slit_width(&mut self, slit: u32) -> DeviceResult<f32>;

    /// `ShamrockGetGrating` (1-based).
    fn grating(&mut self) -> DeviceResult<u32>;
    /// `ShamrockSetGrating` (1-based).
    fn set_grating(&mut self, grating: u32) -> DeviceResult<()>;
    /// `ShamrockGetNumberGratings`.
    fn number_gratings(&mut self) -> DeviceResult<u32>;
    /// `ShamrockGetGratingInfo` (1-based).
    fn grating_info(&mut self, grating: u32) -> DeviceResult<GratingInfo>;
}
