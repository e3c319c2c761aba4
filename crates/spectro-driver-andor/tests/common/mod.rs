//! Shared setup for session integration tests.
//!
//! Every rig gets mock devices with process-unique serials, so tests can run
//! in parallel without contending for device claims.

#![allow(dead_code)] // Not every test file uses every helper

use spectro_driver_andor::{AndorSpectrometer, SpectrometerSettings};
use spectro_driver_mock::{DetectorCall, MockDetector, MockSpectrograph, SpectrographCall};

/// An open session plus handles on its devices.
pub struct TestRig {
    pub session: AndorSpectrometer,
    pub detector: MockDetector,
    pub spectrograph: MockSpectrograph,
}

impl TestRig {
    pub async fn open() -> Self {
        Self::open_with(SpectrometerSettings::simulated()).await
    }

    pub async fn open_with(settings: SpectrometerSettings) -> Self {
        let detector = MockDetector::default();
        let spectrograph = MockSpectrograph::default();
        let session =
            AndorSpectrometer::open_with(detector.clone(), spectrograph.clone(), settings)
                .await
                .expect("mock session should open");
        Self {
            session,
            detector,
            spectrograph,
        }
    }

    pub fn set_image_calls(&self) -> usize {
        self.detector
            .call_count(|c| matches!(c, DetectorCall::SetImage(_)))
    }

    pub fn fetch_calls(&self) -> usize {
        self.detector
            .call_count(|c| matches!(c, DetectorCall::GetAcquiredData(_)))
    }

    pub fn detector_shutdowns(&self) -> usize {
        self.detector
            .call_count(|c| matches!(c, DetectorCall::ShutDown))
    }

    pub fn spectrograph_closes(&self) -> usize {
        self.spectrograph
            .call_count(|c| matches!(c, SpectrographCall::Close))
    }
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
