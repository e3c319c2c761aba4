//! Published session state.

use spectro_core::calibration::CalibrationTable;
use spectro_core::geometry::{DetectorGeometry, RoiWindow};
use spectro_core::mode::AcquisitionMode;
use std::sync::Arc;

/// Immutable snapshot of everything a display or script may want to read.
///
/// Built by the operation holding the session guard and swapped in as a
/// whole, so readers never wait for an acquisition and never see a mode from
/// one transition paired with the ROI of another.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// `false` once the session has been closed.
    pub open: bool,
    /// Sensor geometry, fixed for the session.
    pub geometry: DetectorGeometry,
    /// Mode the detector window was last programmed for.
    pub mode: AcquisitionMode,
    /// Window currently programmed on the detector.
    pub roi: RoiWindow,
    /// Exposure time in seconds.
    pub exposure_s: f64,
    /// 0 at zero order.
    pub centre_wavelength_nm: f64,
    /// Entrance slit, in µm.
    pub slit_width_um: f64,
    /// Active grating, 1-based.
    pub grating: u32,
    /// Bumped by every successful centre-wavelength or grating write.
    pub optics_generation: u64,
    /// Wavelength of each detector column. Stale when its generation is
    /// behind `optics_generation`.
    pub calibration: Arc<CalibrationTable>,
}

impl SessionState {
    /// Whether `calibration` reflects the current optics.
    pub fn calibration_is_current(&self) -> bool {
        self.calibration.generation() == self.optics_generation
    }
}
