//! Simulated Andor CCD detector.

use crate::common::{FaultPlan, MockRng};
use crate::pattern::{render, PixelPattern};
use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;
use spectro_core::device::{
    AcquisitionKind, Detector, ReadMode, ShutterConfig, TemperatureReading, DRV_ACQUIRING,
    DRV_IDLE, DRV_TEMP_NOT_REACHED, DRV_TEMP_OFF, DRV_TEMP_STABILIZED,
};
use spectro_core::error::{DeviceFault, DeviceResult};
use spectro_core::geometry::RoiWindow;
use std::collections::VecDeque;
use std::sync::Arc;

/// SDK code for calls made before `Initialize`.
pub const DRV_NOT_INITIALIZED: i32 = 20075;
/// SDK code for an out-of-range first parameter.
pub const DRV_P1INVALID: i32 = 20066;

/// Degrees moved toward the set point per temperature query.
const COOLING_STEP_C: f32 = 10.0;

/// Configuration for the simulated detector.
#[derive(Debug, Clone, Deserialize)]
pub struct MockDetectorConfig {
    /// Serial number; sessions use it to enforce exclusive ownership.
    #[serde(default = "default_serial")]
    pub serial: String,
    /// Sensor columns (default: 512)
    #[serde(default = "default_size")]
    pub width: u32,
    /// Sensor rows (default: 512)
    #[serde(default = "default_size")]
    pub height: u32,
    /// Pixel width in µm (default: 16)
    #[serde(default = "default_pixel_um")]
    pub pixel_width_um: f32,
    /// Pixel height in µm (default: 16)
    #[serde(default = "default_pixel_um")]
    pub pixel_height_um: f32,
    /// AD bit depth (default: 16)
    #[serde(default = "default_bit_depth")]
    pub bit_depth: u32,
    /// `GetStatus` calls answered with ACQUIRING before an acquisition completes.
    #[serde(default = "default_acquiring_polls")]
    pub acquiring_polls: u32,
    /// Scene rendered into acquired data.
    #[serde(default)]
    pub pattern: PixelPattern,
    /// Uniform read noise amplitude in counts (0 = noiseless).
    #[serde(default)]
    pub read_noise: i32,
    /// Sensor temperature with the cooler off, °C.
    #[serde(default = "default_ambient")]
    pub ambient_c: f32,
    /// RNG seed for noise.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_serial() -> String {
    format!("CCD-MOCK-{:04}", crate::next_serial())
}
fn default_size() -> u32 {
    512
}
fn default_pixel_um() -> f32 {
    16.0
}
fn default_bit_depth() -> u32 {
    16
}
fn default_acquiring_polls() -> u32 {
    2
}
fn default_ambient() -> f32 {
    20.0
}

impl Default for MockDetectorConfig {
    fn default() -> Self {
        Self {
            serial: default_serial(),
            width: default_size(),
            height: default_size(),
            pixel_width_um: default_pixel_um(),
            pixel_height_um: default_pixel_um(),
            bit_depth: default_bit_depth(),
            acquiring_polls: default_acquiring_polls(),
            pattern: PixelPattern::default(),
            read_noise: 0,
            ambient_c: default_ambient(),
            seed: None,
        }
    }
}

impl MockDetectorConfig {
    /// Default configuration under a different serial number.
    pub fn with_serial(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            ..Self::default()
        }
    }
}

/// One SDK call as seen by the simulated detector.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorCall {
    /// `Initialize`.
    Initialize,
    /// `ShutDown`.
    ShutDown,
    /// `SetTemperature`, setpoint in °C.
    SetTemperature(i32),
    /// `CoolerON`.
    CoolerOn,
    /// `GetTemperatureF`.
    GetTemperature,
    /// `SetReadMode`.
    SetReadMode(ReadMode),
    /// `SetAcquisitionMode`.
    SetAcquisitionMode(AcquisitionKind),
    /// `SetExposureTime`, seconds.
    SetExposureTime(f32),
    /// `SetShutter`.
    SetShutter(ShutterConfig),
    /// `SetHSSpeed`: output amplifier, speed index.
    SetHsSpeed(i32, i32),
    /// `SetVSSpeed`: speed index.
    SetVsSpeed(i32),
    /// `GetDetector`.
    GetDetector,
    /// `GetPixelSize`.
    GetPixelSize,
    /// `GetBitDepth`.
    GetBitDepth,
    /// `SetImage` with the window programmed.
    SetImage(RoiWindow),
    /// `StartAcquisition`.
    StartAcquisition,
    /// `GetStatus`.
    GetStatus,
    /// `GetAcquiredData` with the requested sample count.
    GetAcquiredData(usize),
    /// `AbortAcquisition`.
    AbortAcquisition,
}

#[derive(Debug)]
struct DetectorState {
    initialized: bool,
    window: Option<RoiWindow>,
    exposure_s: f32,
    setpoint_c: i32,
    cooler_on: bool,
    temperature_c: f32,
    acquiring: bool,
    polls_remaining: u32,
    hold: bool,
    status_script: VecDeque<i32>,
    calls: Vec<DetectorCall>,
}

/// Simulated detector.
///
/// Clones share state: keep one clone to script status codes and inspect the
/// call log while another is owned by a session.
#[derive(Clone, Debug)]
pub struct MockDetector {
    config: Arc<MockDetectorConfig>,
    state: Arc<Mutex<DetectorState>>,
    faults: FaultPlan,
    rng: Arc<MockRng>,
}

impl MockDetector {
    /// Create a powered-off detector.
    pub fn new(config: MockDetectorConfig) -> Self {
        let state = DetectorState {
            initialized: false,
            window: None,
            exposure_s: 0.0,
            setpoint_c: 0,
            cooler_on: false,
            temperature_c: config.ambient_c,
            acquiring: false,
            polls_remaining: 0,
            hold: false,
            status_script: VecDeque::new(),
            calls: Vec::new(),
        };
        let rng = Arc::new(MockRng::new(config.seed));
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            faults: FaultPlan::seeded(None),
            rng,
        }
    }

    /// Build from a TOML table.
    pub fn from_toml(config: toml::Value) -> Result<Self, toml::de::Error> {
        Ok(Self::new(config.try_into()?))
    }

    /// Fault injection for this device.
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Queue status codes returned by the next `GetStatus` calls, ahead of
    /// the built-in ACQUIRING/IDLE simulation.
    pub fn script_status(&self, codes: impl IntoIterator<Item = i32>) {
        self.state.lock().status_script.extend(codes);
    }

    /// Keep reporting ACQUIRING until the acquisition is aborted.
    pub fn hold_acquiring(&self, hold: bool) {
        self.state.lock().hold = hold;
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<DetectorCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls matching `predicate`.
    pub fn call_count(&self, predicate: impl Fn(&DetectorCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Window last programmed with `SetImage`.
    pub fn window(&self) -> Option<RoiWindow> {
        self.state.lock().window
    }

    /// Exposure last programmed, seconds.
    pub fn exposure_s(&self) -> f32 {
        self.state.lock().exposure_s
    }

    /// Whether the device is initialized.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Whether an acquisition is running.
    pub fn is_acquiring(&self) -> bool {
        self.state.lock().acquiring
    }

    fn enter(
        &self,
        call: DetectorCall,
        operation: &'static str,
    ) -> DeviceResult<MutexGuard<'_, DetectorState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        self.faults
            .check(operation)
            .map_err(|code| DeviceFault::detector(operation, code))?;
        if !state.initialized && operation != "Initialize" {
            return Err(DeviceFault::detector(operation, DRV_NOT_INITIALIZED));
        }
        Ok(state)
    }
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::new(MockDetectorConfig::default())
    }
}

impl Detector for MockDetector {
    fn device_id(&self) -> String {
        self.config.serial.clone()
    }

    fn initialize(&mut self) -> DeviceResult<()> {
        let mut state = self.enter(DetectorCall::Initialize, "Initialize")?;
        state.initialized = true;
        tracing::debug!(serial = %self.config.serial, "mock detector initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> DeviceResult<()> {
        let mut state = self.enter(DetectorCall::ShutDown, "ShutDown")?;
        state.initialized = false;
        state.acquiring = false;
        state.cooler_on = false;
        Ok(())
    }

    fn set_temperature(&mut self, celsius: i32) -> DeviceResult<()> {
        let mut state = self.enter(DetectorCall::SetTemperature(celsius), "SetTemperature")?;
        state.setpoint_c = celsius;
        Ok(())
    }

    fn cooler_on(&mut self) -> DeviceResult<()> {
        let mut state = self.enter(DetectorCall::CoolerOn, "CoolerON")?;
        state.cooler_on = true;
        Ok(())
    }

    fn temperature(&mut self) -> DeviceResult<TemperatureReading> {
        let ambient = self.config.ambient_c;
        let mut state = self.enter(DetectorCall::GetTemperature, "GetTemperatureF")?;
        let target = if state.cooler_on {
            state.setpoint_c as f32
        } else {
            ambient
        };
        let delta = target - state.temperature_c;
        state.temperature_c += delta.clamp(-COOLING_STEP_C, COOLING_STEP_C);
        let status = if !state.cooler_on {
            DRV_TEMP_OFF
        } else if (state.temperature_c - target).abs() < f32::EPSILON {
            DRV_TEMP_STABILIZED
        } else {
            DRV_TEMP_NOT_REACHED
        };
        Ok(TemperatureReading {
            celsius: state.temperature_c,
            status,
        })
    }

    fn set_read_mode(&mut self, mode: ReadMode) -> DeviceResult<()> {
        self.enter(DetectorCall::SetReadMode(mode), "SetReadMode")?;
        Ok(())
    }

    fn set_acquisition_mode(&mut self, mode: AcquisitionKind) -> DeviceResult<()> {
        self.enter(DetectorCall::SetAcquisitionMode(mode), "SetAcquisitionMode")?;
        Ok(())
    }

    fn set_exposure_time(&mut self, seconds: f32) -> DeviceResult<()> {
        let mut state = self.enter(DetectorCall::SetExposureTime(seconds), "SetExposureTime")?;
        if !(seconds >= 0.0) {
            return Err(DeviceFault::detector("SetExposureTime", DRV_P1INVALID));
        }
        state.exposure_s = seconds;
        Ok(())
    }

    fn set_shutter(&mut self, shutter: ShutterConfig) -> DeviceResult<()> {
        self.enter(DetectorCall::SetShutter(shutter), "SetShutter")?;
        Ok(())
    }

    fn set_hs_speed(&mut self, output_amplifier: i32, index: i32) -> DeviceResult<()> {
        self.enter(DetectorCall::SetHsSpeed(output_amplifier, index), "SetHSSpeed")?;
        if index < 0 {
            return Err(DeviceFault::detector("SetHSSpeed", DRV_P1INVALID));
        }
        Ok(())
    }

    fn set_vs_speed(&mut self, index: i32) -> DeviceResult<()> {
        self.enter(DetectorCall::SetVsSpeed(index), "SetVSSpeed")?;
        if index < 0 {
            return Err(DeviceFault::detector("SetVSSpeed", DRV_P1INVALID));
        }
        Ok(())
    }

    fn detector_size(&mut self) -> DeviceResult<(u32, u32)> {
        self.enter(DetectorCall::GetDetector, "GetDetector")?;
        Ok((self.config.width, self.config.height))
    }

    fn pixel_size(&mut self) -> DeviceResult<(f32, f32)> {
        self.enter(DetectorCall::GetPixelSize, "GetPixelSize")?;
        Ok((self.config.pixel_width_um, self.config.pixel_height_um))
    }

    fn bit_depth(&mut self) -> DeviceResult<u32> {
        self.enter(DetectorCall::GetBitDepth, "GetBitDepth")?;
        Ok(self.config.bit_depth)
    }

    fn set_image_window(&mut self, window: RoiWindow) -> DeviceResult<()> {
        let (width, height) = (self.config.width, self.config.height);
        let mut state = self.enter(DetectorCall::SetImage(window), "SetImage")?;
        if window.max_col() > width || window.max_row() > height {
            return Err(DeviceFault::detector("SetImage", DRV_P1INVALID));
        }
        state.window = Some(window);
        Ok(())
    }

    fn start_acquisition(&mut self) -> DeviceResult<()> {
        let polls = self.config.acquiring_polls;
        let mut state = self.enter(DetectorCall::StartAcquisition, "StartAcquisition")?;
        if state.acquiring {
            return Err(DeviceFault::detector("StartAcquisition", DRV_ACQUIRING));
        }
        state.acquiring = true;
        state.polls_remaining = polls;
        Ok(())
    }

    fn status(&mut self) -> DeviceResult<i32> {
        let mut state = self.enter(DetectorCall::GetStatus, "GetStatus")?;
        if let Some(code) = state.status_script.pop_front() {
            if code != DRV_ACQUIRING {
                state.acquiring = false;
            }
            return Ok(code);
        }
        if !state.acquiring {
            return Ok(DRV_IDLE);
        }
        if state.hold {
            return Ok(DRV_ACQUIRING);
        }
        if state.polls_remaining > 0 {
            state.polls_remaining -= 1;
            return Ok(DRV_ACQUIRING);
        }
        state.acquiring = false;
        Ok(DRV_IDLE)
    }

    fn acquired_data(&mut self, len: usize) -> DeviceResult<Vec<i32>> {
        let (width, height) = (self.config.width, self.config.height);
        let state = self.enter(DetectorCall::GetAcquiredData(len), "GetAcquiredData")?;
        if state.acquiring {
            return Err(DeviceFault::detector("GetAcquiredData", DRV_ACQUIRING));
        }
        let window = match state.window {
            Some(window) => window,
            None => RoiWindow::new(1, width, 1, height, width, height)
                .map_err(|_| DeviceFault::detector("GetAcquiredData", DRV_P1INVALID))?,
        };
        drop(state);

        let mut samples = render(self.config.pattern, &window, width, height);
        samples.resize(len, 0);
        if self.config.read_noise > 0 {
            for sample in samples.iter_mut() {
                *sample += self.rng.noise(self.config.read_noise);
            }
        }
        Ok(samples)
    }

    fn abort_acquisition(&mut self) -> DeviceResult<()> {
        let mut state = self.enter(DetectorCall::AbortAcquisition, "AbortAcquisition")?;
        if !state.acquiring {
            return Err(DeviceFault::detector("AbortAcquisition", DRV_IDLE));
        }
        state.acquiring = false;
        state.hold = false;
        state.status_script.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> MockDetector {
        let mut det = MockDetector::default();
        det.initialize().unwrap();
        det
    }

    #[test]
    fn calls_before_initialize_are_rejected() {
        let mut det = MockDetector::default();
        let err = det.detector_size().unwrap_err();
        assert_eq!(err.code, DRV_NOT_INITIALIZED);
    }

    #[test]
    fn acquisition_completes_after_configured_polls() {
        let mut det = ready();
        det.start_acquisition().unwrap();
        assert_eq!(det.status().unwrap(), DRV_ACQUIRING);
        assert_eq!(det.status().unwrap(), DRV_ACQUIRING);
        assert_eq!(det.status().unwrap(), DRV_IDLE);
        let data = det.acquired_data(512 * 512).unwrap();
        assert_eq!(data.len(), 512 * 512);
        assert_eq!(data[0], 1001);
    }

    #[test]
    fn scripted_codes_take_priority() {
        let mut det = ready();
        det.script_status([DRV_ACQUIRING, 42]);
        det.start_acquisition().unwrap();
        assert_eq!(det.status().unwrap(), DRV_ACQUIRING);
        assert_eq!(det.status().unwrap(), 42);
        assert!(!det.is_acquiring());
    }

    #[test]
    fn window_is_validated_and_read_back() {
        let mut det = ready();
        let roi = RoiWindow::new(131, 411, 1, 512, 512, 512).unwrap();
        det.set_image_window(roi).unwrap();
        assert_eq!(det.window(), Some(roi));

        let too_big = RoiWindow::new(1, 600, 1, 10, 600, 600).unwrap();
        assert_eq!(det.set_image_window(too_big).unwrap_err().code, DRV_P1INVALID);
    }

    #[test]
    fn cooler_converges_to_setpoint() {
        let mut det = ready();
        det.set_temperature(-20).unwrap();
        det.cooler_on().unwrap();
        let mut reading = det.temperature().unwrap();
        for _ in 0..10 {
            reading = det.temperature().unwrap();
        }
        assert!(reading.is_stabilized());
        assert_eq!(reading.celsius, -20.0);
    }

    #[test]
    fn abort_stops_a_held_acquisition() {
        let mut det = ready();
        det.hold_acquiring(true);
        det.start_acquisition().unwrap();
        for _ in 0..5 {
            assert_eq!(det.status().unwrap(), DRV_ACQUIRING);
        }
        det.abort_acquisition().unwrap();
        assert_eq!(det.status().unwrap(), DRV_IDLE);
    }
}
