//! Session tunables.
//!
//! These are embedded in the application config file, so every field has a
//! serde default and the structs can be deserialized from a partial table.

use serde::{Deserialize, Serialize};
use spectro_core::error::{SpectroError, SpectroResult};
use std::time::Duration;

/// How the session brings the devices up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Switch the detector cooler on at open.
    pub cooler_enabled: bool,
    /// Drive the shutter automatically; otherwise it is held open.
    pub shutter_enabled: bool,
    /// Pause between detector and spectrograph initialization, ms.
    pub settle_delay_ms: u64,
    /// Cooler set point, °C.
    pub target_temperature_c: i32,
    /// Exposure programmed at open, s.
    pub default_exposure_s: f64,
    /// Shutter opening/closing time, ms.
    pub shutter_transfer_ms: i32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cooler_enabled: false,
            shutter_enabled: false,
            settle_delay_ms: 2000,
            target_temperature_c: -60,
            default_exposure_s: 1.0,
            shutter_transfer_ms: 50,
        }
    }
}

/// Optical constants of one physical setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticsSettings {
    /// Widest opening of the entrance slit, µm.
    pub max_slit_width_um: f64,
    /// Extra columns left of the computed slit image.
    pub slit_margin_low_px: i32,
    /// Extra columns right of the computed slit image.
    pub slit_margin_high_px: i32,
    /// Narrowest optically valid single track, rows.
    pub minimum_track_rows: u32,
    /// Saturated rows at the start of a computed track, dropped from data.
    pub track_discard_rows: u32,
    /// Auto-slit index of the entrance slit.
    pub slit_index: u32,
    /// Centre wavelength giving an undispersed slit image, nm.
    pub zero_order_nm: f64,
}

impl Default for OpticsSettings {
    fn default() -> Self {
        Self {
            max_slit_width_um: 2500.0,
            slit_margin_low_px: 47,
            slit_margin_high_px: 77,
            minimum_track_rows: 5,
            track_discard_rows: 3,
            slit_index: 1,
            zero_order_nm: 0.0,
        }
    }
}

/// Poller and frame distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Status poll interval, ms.
    pub poll_interval_ms: u64,
    /// Frames buffered for slow `subscribe_frames` receivers.
    pub frame_channel_capacity: usize,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            frame_channel_capacity: 16,
        }
    }
}

/// Everything `AndorSpectrometer::open_with` needs besides the devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrometerSettings {
    /// Detector setup applied at open.
    pub session: SessionSettings,
    /// Slit and track geometry, zero order.
    pub optics: OpticsSettings,
    /// Polling and frame fan-out.
    pub acquisition: AcquisitionSettings,
}

impl SpectrometerSettings {
    /// Reject values no physical setup can have.
    pub fn validate(&self) -> SpectroResult<()> {
        let invalid = |msg: String| Err(SpectroError::Configuration(msg));

        if !(self.session.default_exposure_s.is_finite() && self.session.default_exposure_s >= 0.0) {
            return invalid(format!(
                "session.default_exposure_s must be non-negative, got {}",
                self.session.default_exposure_s
            ));
        }
        if self.session.shutter_transfer_ms < 0 {
            return invalid(format!(
                "session.shutter_transfer_ms must be non-negative, got {}",
                self.session.shutter_transfer_ms
            ));
        }
        if !(self.optics.max_slit_width_um.is_finite() && self.optics.max_slit_width_um > 0.0) {
            return invalid(format!(
                "optics.max_slit_width_um must be positive, got {}",
                self.optics.max_slit_width_um
            ));
        }
        if self.optics.minimum_track_rows == 0 {
            return invalid("optics.minimum_track_rows must be at least 1".to_string());
        }
        if !(self.optics.zero_order_nm.is_finite() && self.optics.zero_order_nm >= 0.0) {
            return invalid(format!(
                "optics.zero_order_nm must be non-negative, got {}",
                self.optics.zero_order_nm
            ));
        }
        if self.acquisition.poll_interval_ms == 0 {
            return invalid("acquisition.poll_interval_ms must be at least 1".to_string());
        }
        if self.acquisition.frame_channel_capacity == 0 {
            return invalid("acquisition.frame_channel_capacity must be at least 1".to_string());
        }
        Ok(())
    }

    /// Settings with no settle delay and a 1 ms poll, for simulated devices.
    pub fn simulated() -> Self {
        let mut settings = Self::default();
        settings.session.settle_delay_ms = 0;
        settings.acquisition.poll_interval_ms = 1;
        settings
    }

    /// Wait between detector and spectrograph initialization.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.session.settle_delay_ms)
    }

    /// Delay between `GetStatus` polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.acquisition.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_instrument() {
        let settings = SpectrometerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.settle_delay(), Duration::from_secs(2));
        assert_eq!(settings.poll_interval(), Duration::from_millis(10));
        assert_eq!(settings.optics.track_discard_rows, 3);
        assert_eq!(settings.optics.max_slit_width_um, 2500.0);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut settings = SpectrometerSettings::default();
        settings.acquisition.poll_interval_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(SpectroError::Configuration(_))
        ));
    }

    #[test]
    fn negative_exposure_is_rejected() {
        let mut settings = SpectrometerSettings::default();
        settings.session.default_exposure_s = -1.0;
        assert!(settings.validate().is_err());
    }
}
