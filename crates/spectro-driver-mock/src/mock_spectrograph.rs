//! Simulated Shamrock spectrograph.
//!
//! Dispersion is linear around the centre wavelength, derived from groove
//! density, focal length and the pixel width the session programs.

use crate::common::FaultPlan;
use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;
use spectro_core::device::{GratingInfo, Spectrograph};
use spectro_core::error::{DeviceFault, DeviceResult};
use std::collections::HashMap;
use std::sync::Arc;

/// SDK code for calls made before `ShamrockInitialize`.
pub const SHAMROCK_NOT_INITIALIZED: i32 = 20275;
/// SDK code for an out-of-range second parameter (device index is the first).
pub const SHAMROCK_P2INVALID: i32 = 20267;
/// SDK code for an out-of-range third parameter.
pub const SHAMROCK_P3INVALID: i32 = 20268;

/// One grating on the simulated turret.
#[derive(Debug, Clone, Deserialize)]
pub struct MockGrating {
    /// Groove density, lines/mm.
    pub lines_per_mm: f32,
    /// Blaze label.
    pub blaze: String,
    /// Lowest usable centre wavelength, nm.
    pub min_nm: f32,
    /// Highest usable centre wavelength, nm.
    pub max_nm: f32,
}

/// Configuration for the simulated spectrograph.
#[derive(Debug, Clone, Deserialize)]
pub struct MockSpectrographConfig {
    /// Serial number.
    #[serde(default = "default_serial")]
    pub serial: String,
    /// Turret, grating 1 first.
    #[serde(default = "default_gratings")]
    pub gratings: Vec<MockGrating>,
    /// Focal length, mm (default: 303, a Shamrock 303i).
    #[serde(default = "default_focal_length")]
    pub focal_length_mm: f32,
    /// Width of every slit at power-up, µm.
    #[serde(default = "default_slit_width")]
    pub initial_slit_um: f32,
    /// Narrowest settable slit, µm.
    #[serde(default = "default_min_slit")]
    pub min_slit_um: f32,
    /// Widest settable slit, µm.
    #[serde(default = "default_max_slit")]
    pub max_slit_um: f32,
}

fn default_serial() -> String {
    format!("SR-MOCK-{:04}", crate::next_serial())
}
fn default_gratings() -> Vec<MockGrating> {
    vec![
        MockGrating {
            lines_per_mm: 150.0,
            blaze: "500nm".to_string(),
            min_nm: 0.0,
            max_nm: 10_000.0,
        },
        MockGrating {
            lines_per_mm: 600.0,
            blaze: "500nm".to_string(),
            min_nm: 0.0,
            max_nm: 2_500.0,
        },
        MockGrating {
            lines_per_mm: 1200.0,
            blaze: "750nm".to_string(),
            min_nm: 0.0,
            max_nm: 1_250.0,
        },
    ]
}
fn default_focal_length() -> f32 {
    303.0
}
fn default_slit_width() -> f32 {
    100.0
}
fn default_min_slit() -> f32 {
    10.0
}
fn default_max_slit() -> f32 {
    2500.0
}

impl Default for MockSpectrographConfig {
    fn default() -> Self {
        Self {
            serial: default_serial(),
            gratings: default_gratings(),
            focal_length_mm: default_focal_length(),
            initial_slit_um: default_slit_width(),
            min_slit_um: default_min_slit(),
            max_slit_um: default_max_slit(),
        }
    }
}

impl MockSpectrographConfig {
    /// Default configuration under a different serial number.
    pub fn with_serial(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            ..Self::default()
        }
    }
}

/// One SDK call as seen by the simulated spectrograph.
#[derive(Debug, Clone, PartialEq)]
pub enum SpectrographCall {
    /// `ShamrockInitialize`.
    Initialize,
    /// `ShamrockClose`.
    Close,
    /// `ShamrockSetNumberPixels`.
    SetNumberPixels(u32),
    /// `ShamrockSetPixelWidth`, µm.
    SetPixelWidth(f32),
    /// `ShamrockGetWavelengthLimits` for a grating.
    GetWavelengthLimits(u32),
    /// `ShamrockSetWavelength`, nm.
    SetWavelength(f32),
    /// `ShamrockGetWavelength`.
    GetWavelength,
    /// `ShamrockGetCalibration` with the pixel count.
    GetCalibration(u32),
    /// `ShamrockSetAutoSlitWidth`: slit index, µm.
    SetAutoSlitWidth(u32, f32),
    /// `ShamrockGetAutoSlitWidth`: slit index.
    GetAutoSlitWidth(u32),
    /// `ShamrockGetGrating`.
    GetGrating,
    /// `ShamrockSetGrating`, 1-based.
    SetGrating(u32),
    /// `ShamrockGetNumberGratings`.
    GetNumberGratings,
    /// `ShamrockGetGratingInfo` for a grating.
    GetGratingInfo(u32),
}

#[derive(Debug)]
struct SpectrographState {
    initialized: bool,
    grating: u32,
    wavelength_nm: f32,
    pixels: u32,
    pixel_width_um: f32,
    slits: HashMap<u32, f32>,
    calls: Vec<SpectrographCall>,
}

/// Simulated spectrograph. Clones share state.
#[derive(Clone, Debug)]
pub struct MockSpectrograph {
    config: Arc<MockSpectrographConfig>,
    state: Arc<Mutex<SpectrographState>>,
    faults: FaultPlan,
}

impl MockSpectrograph {
    /// Create a powered-off spectrograph on grating 1 at zero order.
    pub fn new(config: MockSpectrographConfig) -> Self {
        let state = SpectrographState {
            initialized: false,
            grating: 1,
            wavelength_nm: 0.0,
            pixels: 0,
            pixel_width_um: 0.0,
            slits: HashMap::new(),
            calls: Vec::new(),
        };
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            faults: FaultPlan::none(),
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

    /// Every call received so far.
    pub fn calls(&self) -> Vec<SpectrographCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls matching `predicate`.
    pub fn call_count(&self, predicate: impl Fn(&SpectrographCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Current centre wavelength, nm.
    pub fn current_wavelength(&self) -> f32 {
        self.state.lock().wavelength_nm
    }

    /// Current width of `slit`, µm.
    pub fn current_slit_width(&self, slit: u32) -> f32 {
        let state = self.state.lock();
        state
            .slits
            .get(&slit)
            .copied()
            .unwrap_or(self.config.initial_slit_um)
    }

    /// Current grating, 1-based.
    pub fn current_grating(&self) -> u32 {
        self.state.lock().grating
    }

    /// Whether the device is initialized.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn enter(
        &self,
        call: SpectrographCall,
        operation: &'static str,
    ) -> DeviceResult<MutexGuard<'_, SpectrographState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        self.faults
            .check(operation)
            .map_err(|code| DeviceFault::spectrograph(operation, code))?;
        if !state.initialized && operation != "ShamrockInitialize" {
            return Err(DeviceFault::spectrograph(operation, SHAMROCK_NOT_INITIALIZED));
        }
        Ok(state)
    }

    fn grating_config(&self, grating: u32, operation: &'static str) -> DeviceResult<&MockGrating> {
        grating
            .checked_sub(1)
            .and_then(|index| self.config.gratings.get(index as usize))
            .ok_or(DeviceFault::spectrograph(operation, SHAMROCK_P2INVALID))
    }
}

impl Default for MockSpectrograph {
    fn default() -> Self {
        Self::new(MockSpectrographConfig::default())
    }
}

impl Spectrograph for MockSpectrograph {
    fn device_id(&self) -> String {
        self.config.serial.clone()
    }

    fn initialize(&mut self) -> DeviceResult<()> {
        let mut state = self.enter(SpectrographCall::Initialize, "ShamrockInitialize")?;
        state.initialized = true;
        tracing::debug!(serial = %self.config.serial, "mock spectrograph initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> DeviceResult<()> {
        let mut state = self.enter(SpectrographCall::Close, "ShamrockClose")?;
        state.initialized = false;
        Ok(())
    }

    fn set_number_pixels(&mut self, pixels: u32) -> DeviceResult<()> {
        let mut state = self.enter(
            SpectrographCall::SetNumberPixels(pixels),
            "ShamrockSetNumberPixels",
        )?;
        if pixels == 0 {
            return Err(DeviceFault::spectrograph(
                "ShamrockSetNumberPixels",
                SHAMROCK_P2INVALID,
            ));
        }
        state.pixels = pixels;
        Ok(())
    }

    fn set_pixel_width(&mut self, width_um: f32) -> DeviceResult<()> {
        let mut state = self.enter(
            SpectrographCall::SetPixelWidth(width_um),
            "ShamrockSetPixelWidth",
        )?;
        if !(width_um > 0.0) {
            return Err(DeviceFault::spectrograph(
                "ShamrockSetPixelWidth",
                SHAMROCK_P2INVALID,
            ));
        }
        state.pixel_width_um = width_um;
        Ok(())
    }

    fn wavelength_limits(&mut self, grating: u32) -> DeviceResult<(f32, f32)> {
        self.enter(
            SpectrographCall::GetWavelengthLimits(grating),
            "ShamrockGetWavelengthLimits",
        )?;
        let g = self.grating_config(grating, "ShamrockGetWavelengthLimits")?;
        Ok((g.min_nm, g.max_nm))
    }

    fn set_wavelength(&mut self, nm: f32) -> DeviceResult<()> {
        let mut state = self.enter(SpectrographCall::SetWavelength(nm), "ShamrockSetWavelength")?;
        // The drive accepts any non-negative position; usable limits are advisory.
        if !(nm >= 0.0) {
            return Err(DeviceFault::spectrograph(
                "ShamrockSetWavelength",
                SHAMROCK_P2INVALID,
            ));
        }
        state.wavelength_nm = nm;
        Ok(())
    }

    fn wavelength(&mut self) -> DeviceResult<f32> {
        let state = self.enter(SpectrographCall::GetWavelength, "ShamrockGetWavelength")?;
        Ok(state.wavelength_nm)
    }

    fn calibration(&mut self, pixels: u32) -> DeviceResult<Vec<f32>> {
        let state = self.enter(
            SpectrographCall::GetCalibration(pixels),
            "ShamrockGetCalibration",
        )?;
        if state.pixel_width_um <= 0.0 || state.pixels == 0 {
            return Err(DeviceFault::spectrograph(
                "ShamrockGetCalibration",
                SHAMROCK_P3INVALID,
            ));
        }
        let (grating, centre, pixel_width_um) =
            (state.grating, state.wavelength_nm, state.pixel_width_um);
        drop(state);

        let g = self.grating_config(grating, "ShamrockGetCalibration")?;
        // nm per pixel = pixel pitch / (groove density * focal length)
        let nm_per_pixel = pixel_width_um * 1000.0 / (g.lines_per_mm * self.config.focal_length_mm);
        let middle = (pixels as f32 - 1.0) / 2.0;
        Ok((0..pixels)
            .map(|i| centre + (i as f32 - middle) * nm_per_pixel)
            .collect())
    }

    fn set_auto_slit_width(&mut self, slit: u32, width_um: f32) -> DeviceResult<()> {
        let (min, max) = (self.config.min_slit_um, self.config.max_slit_um);
        let mut state = self.enter(
            SpectrographCall::SetAutoSlitWidth(slit, width_um),
            "ShamrockSetAutoSlitWidth",
        )?;
        if !(min..=max).contains(&width_um) {
            return Err(DeviceFault::spectrograph(
                "ShamrockSetAutoSlitWidth",
                SHAMROCK_P3INVALID,
            ));
        }
        state.slits.insert(slit, width_um);
        Ok(())
    }

    fn auto_slit_width(&mut self, slit: u32) -> DeviceResult<f32> {
        let initial = self.config.initial_slit_um;
        let state = self.enter(
            SpectrographCall::GetAutoSlitWidth(slit),
            "ShamrockGetAutoSlitWidth",
        )?;
        Ok(state.slits.get(&slit).copied().unwrap_or(initial))
    }

    fn grating(&mut self) -> DeviceResult<u32> {
        let state = self.enter(SpectrographCall::GetGrating, "ShamrockGetGrating")?;
        Ok(state.grating)
    }

    fn set_grating(&mut self, grating: u32) -> DeviceResult<()> {
        self.grating_config(grating, "ShamrockSetGrating")?;
        let mut state = self.enter(SpectrographCall::SetGrating(grating), "ShamrockSetGrating")?;
        state.grating = grating;
        Ok(())
    }

    fn number_gratings(&mut self) -> DeviceResult<u32> {
        self.enter(SpectrographCall::GetNumberGratings, "ShamrockGetNumberGratings")?;
        Ok(self.config.gratings.len() as u32)
    }

    fn grating_info(&mut self, grating: u32) -> DeviceResult<GratingInfo> {
        self.enter(
            SpectrographCall::GetGratingInfo(grating),
            "ShamrockGetGratingInfo",
        )?;
        let g = self.grating_config(grating, "ShamrockGetGratingInfo")?;
        Ok(GratingInfo {
            lines_per_mm: g.lines_per_mm,
            blaze: g.blaze.clone(),
            home: 0,
            offset: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> MockSpectrograph {
        let mut sg = MockSpectrograph::default();
        sg.initialize().unwrap();
        sg.set_number_pixels(512).unwrap();
        sg.set_pixel_width(16.0).unwrap();
        sg
    }

    #[test]
    fn calibration_is_centred_on_the_wavelength() {
        let mut sg = ready();
        sg.set_wavelength(650.0).unwrap();
        let axis = sg.calibration(512).unwrap();
        assert_eq!(axis.len(), 512);
        assert!(axis[0] < 650.0 && axis[511] > 650.0);
        let middle = (axis[255] + axis[256]) / 2.0;
        assert!((middle - 650.0).abs() < 1e-3);
    }

    #[test]
    fn calibration_needs_pixel_setup() {
        let mut sg = MockSpectrograph::default();
        sg.initialize().unwrap();
        assert_eq!(sg.calibration(512).unwrap_err().code, SHAMROCK_P3INVALID);
    }

    #[test]
    fn finer_gratings_disperse_more() {
        let mut sg = ready();
        let coarse = sg.calibration(512).unwrap();
        sg.set_grating(3).unwrap();
        let fine = sg.calibration(512).unwrap();
        assert!(fine[511] - fine[0] < coarse[511] - coarse[0]);
    }

    #[test]
    fn unknown_grating_is_rejected() {
        let mut sg = ready();
        assert_eq!(sg.set_grating(4).unwrap_err().code, SHAMROCK_P2INVALID);
        assert_eq!(sg.set_grating(0).unwrap_err().code, SHAMROCK_P2INVALID);
        assert_eq!(sg.current_grating(), 1);
    }

    #[test]
    fn slit_width_is_bounded() {
        let mut sg = ready();
        assert_eq!(sg.auto_slit_width(1).unwrap(), 100.0);
        sg.set_auto_slit_width(1, 2500.0).unwrap();
        assert_eq!(sg.current_slit_width(1), 2500.0);
        assert!(sg.set_auto_slit_width(1, 5000.0).is_err());
        assert_eq!(sg.current_slit_width(1), 2500.0);
    }

    #[test]
    fn calls_are_logged() {
        let mut sg = ready();
        sg.set_wavelength(500.0).unwrap();
        assert_eq!(
            sg.call_count(|c| matches!(c, SpectrographCall::SetWavelength(_))),
            1
        );
        assert_eq!(sg.calls()[0], SpectrographCall::Initialize);
    }
}
