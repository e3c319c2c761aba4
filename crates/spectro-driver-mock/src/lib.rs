//! Simulated devices for spectro-daq
//!
//! This crate provides a simulated Andor CCD detector and Shamrock
//! spectrograph implementing the [`spectro_core::Detector`] and
//! [`spectro_core::Spectrograph`] traits, so sessions can be exercised
//! without hardware or vendor SDKs.
//!
//! # Available Mock Devices
//!
//! - [`MockDetector`] - 512x512 sensor with scripted status codes, call log and cooler model
//! - [`MockSpectrograph`] - three-grating turret with linear dispersion and auto slits
//!
//! Both are `Clone` with shared state: a test keeps one clone to inspect
//! calls or arm faults while the session owns the other.
//!
//! ```rust,ignore
//! use spectro_driver_mock::{FaultScenario, MockDetector, MockSpectrograph};
//!
//! let detector = MockDetector::default();
//! detector.script_status([20072, 20072, 20073]);
//! detector.faults().inject(FaultScenario::Once { operation: "SetImage", code: 20066 });
//! ```

pub mod common;
mod mock_detector;
mod mock_spectrograph;
pub mod pattern;

use std::sync::atomic::{AtomicU64, Ordering};

pub use common::{FaultPlan, FaultScenario, MockRng};
pub use mock_detector::{
    DetectorCall, MockDetector, MockDetectorConfig, DRV_NOT_INITIALIZED, DRV_P1INVALID,
};
pub use mock_spectrograph::{
    MockGrating, MockSpectrograph, MockSpectrographConfig, SpectrographCall, SHAMROCK_NOT_INITIALIZED,
    SHAMROCK_P2INVALID, SHAMROCK_P3INVALID,
};
pub use pattern::PixelPattern;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Process-unique number for default serials, so independently built mocks
/// never contend for the same session claim.
pub(crate) fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}
