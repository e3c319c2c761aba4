//! Integration tests for the session lifecycle
//!
//! Tests opening and closing an `AndorSpectrometer` against simulated devices:
//! - Device configuration at open
//! - Initialization failures and partial release
//! - Exclusive device ownership
//! - Idempotent close and drop
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p spectro-driver-andor --test session_test
//! ```

mod common;

use common::{init_tracing, TestRig};
use spectro_core::device::{AcquisitionKind, ReadMode, ShutterConfig};
use spectro_core::error::{DeviceKind, SpectroError};
use spectro_core::geometry::RoiWindow;
use spectro_core::mode::AcquisitionMode;
use spectro_core::capabilities::ExposureControl;
use spectro_driver_andor::{AndorSpectrometer, SpectrometerSettings};
use spectro_driver_mock::{
    DetectorCall, FaultScenario, MockDetector, MockSpectrograph, SpectrographCall,
};
use std::time::{Duration, Instant};

// =============================================================================
// Open
// =============================================================================

#[tokio::test]
async fn open_programs_default_configuration() {
    init_tracing();
    let rig = TestRig::open().await;
    let calls = rig.detector.calls();

    assert_eq!(calls[0], DetectorCall::Initialize);
    assert!(calls.contains(&DetectorCall::SetReadMode(ReadMode::Image)));
    assert!(calls.contains(&DetectorCall::SetAcquisitionMode(AcquisitionKind::SingleScan)));
    assert!(calls.contains(&DetectorCall::SetExposureTime(1.0)));
    assert!(calls.contains(&DetectorCall::SetShutter(ShutterConfig::open())));
    assert!(!calls.contains(&DetectorCall::CoolerOn));

    let full = RoiWindow::new(1, 512, 1, 512, 512, 512).unwrap();
    assert_eq!(rig.detector.window(), Some(full));

    let sg_calls = rig.spectrograph.calls();
    assert!(sg_calls.contains(&SpectrographCall::SetNumberPixels(512)));
    assert!(sg_calls.contains(&SpectrographCall::SetPixelWidth(16.0)));

    let state = rig.session.state();
    assert!(state.open);
    assert_eq!(state.mode, AcquisitionMode::FullImage);
    assert_eq!(state.roi, full);
    assert_eq!((state.geometry.width, state.geometry.height), (512, 512));
    assert_eq!(state.geometry.bit_depth, 16);
    assert_eq!(state.calibration.len(), 512);
    assert!(state.calibration_is_current());
    assert_eq!(rig.session.slit_width_um(), 100.0);
    assert_eq!(rig.session.grating(), 1);
}

#[tokio::test]
async fn open_with_cooler_and_shutter() {
    let mut settings = SpectrometerSettings::simulated();
    settings.session.cooler_enabled = true;
    settings.session.shutter_enabled = true;
    let rig = TestRig::open_with(settings).await;
    let calls = rig.detector.calls();

    assert!(calls.contains(&DetectorCall::SetTemperature(-60)));
    assert!(calls.contains(&DetectorCall::CoolerOn));
    assert!(calls.contains(&DetectorCall::SetShutter(ShutterConfig::auto(50))));

    let reading = rig.session.temperature().await.unwrap();
    assert!(reading.celsius < 20.0, "cooler should pull the sensor down");
}

#[tokio::test]
async fn spectrograph_waits_for_settle_delay() {
    let mut settings = SpectrometerSettings::simulated();
    settings.session.settle_delay_ms = 50;

    let started = Instant::now();
    let rig = TestRig::open_with(settings).await;
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(rig.spectrograph.is_initialized());
}

#[tokio::test]
async fn detector_init_failure_opens_nothing() {
    let detector = MockDetector::default();
    let spectrograph = MockSpectrograph::default();
    detector.faults().inject(FaultScenario::Once {
        operation: "Initialize",
        code: 20992,
    });

    let err = AndorSpectrometer::open_with(
        detector.clone(),
        spectrograph.clone(),
        SpectrometerSettings::simulated(),
    )
    .await
    .err()
    .unwrap();

    match err {
        SpectroError::InitializationFailure { device, fault } => {
            assert_eq!(device, DeviceKind::Detector);
            assert_eq!(fault.code, 20992);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(spectrograph.calls().is_empty());

    // Claims were released: the same devices open on the next attempt.
    let session = AndorSpectrometer::open_with(
        detector.clone(),
        spectrograph.clone(),
        SpectrometerSettings::simulated(),
    )
    .await;
    assert!(session.is_ok());
}

#[tokio::test]
async fn spectrograph_init_failure_releases_detector() {
    let detector = MockDetector::default();
    let spectrograph = MockSpectrograph::default();
    spectrograph.faults().inject(FaultScenario::Always {
        operation: "ShamrockInitialize",
        code: 20201,
    });

    let result =
        AndorSpectrometer::open_with(detector.clone(), spectrograph, SpectrometerSettings::simulated())
            .await;

    assert!(matches!(
        result,
        Err(SpectroError::InitializationFailure {
            device: DeviceKind::Spectrograph,
            ..
        })
    ));
    assert!(!detector.is_initialized());
    assert_eq!(
        detector.call_count(|c| matches!(c, DetectorCall::ShutDown)),
        1
    );
}

#[tokio::test]
async fn cancelled_open_releases_detector() {
    let detector = MockDetector::default();
    let spectrograph = MockSpectrograph::default();
    let mut settings = SpectrometerSettings::simulated();
    settings.session.settle_delay_ms = 200;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        AndorSpectrometer::open_with(detector.clone(), spectrograph.clone(), settings),
    )
    .await;

    assert!(cancelled.is_err());
    assert_eq!(
        detector.call_count(|c| matches!(c, DetectorCall::Initialize)),
        1
    );
    assert_eq!(
        detector.call_count(|c| matches!(c, DetectorCall::ShutDown)),
        1
    );
    assert!(!detector.is_initialized());
    assert!(!spectrograph.is_initialized());

    let reopened =
        AndorSpectrometer::open_with(detector.clone(), spectrograph, SpectrometerSettings::simulated())
            .await;
    assert!(reopened.is_ok());
}

#[tokio::test]
async fn configuration_failure_releases_both_devices() {
    let detector = MockDetector::default();
    let spectrograph = MockSpectrograph::default();
    detector.faults().inject(FaultScenario::Once {
        operation: "GetDetector",
        code: 20013,
    });

    let result = AndorSpectrometer::open_with(
        detector.clone(),
        spectrograph.clone(),
        SpectrometerSettings::simulated(),
    )
    .await;

    match result {
        Err(SpectroError::Device(fault)) => assert_eq!(fault.code, 20013),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("open should fail"),
    }
    assert!(!detector.is_initialized());
    assert!(!spectrograph.is_initialized());
}

#[tokio::test]
async fn invalid_settings_are_rejected_before_touching_hardware() {
    let detector = MockDetector::default();
    let mut settings = SpectrometerSettings::simulated();
    settings.acquisition.poll_interval_ms = 0;

    let result =
        AndorSpectrometer::open_with(detector.clone(), MockSpectrograph::default(), settings).await;

    assert!(matches!(result, Err(SpectroError::Configuration(_))));
    assert!(detector.calls().is_empty());
}

// =============================================================================
// Exclusivity
// =============================================================================

#[tokio::test]
async fn second_session_on_same_detector_is_rejected() {
    let rig = TestRig::open().await;

    let result = AndorSpectrometer::open_with(
        rig.detector.clone(),
        MockSpectrograph::default(),
        SpectrometerSettings::simulated(),
    )
    .await;
    assert!(matches!(
        result,
        Err(SpectroError::SessionAlreadyOpen { .. })
    ));
    // The rejected attempt must not have touched the hardware.
    assert_eq!(
        rig.detector
            .call_count(|c| matches!(c, DetectorCall::Initialize)),
        1
    );

    rig.session.close().await;
    let reopened = AndorSpectrometer::open_with(
        rig.detector.clone(),
        rig.spectrograph.clone(),
        SpectrometerSettings::simulated(),
    )
    .await;
    assert!(reopened.is_ok());
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn close_is_idempotent() {
    let rig = TestRig::open().await;

    rig.session.close().await;
    rig.session.close().await;
    assert_eq!(rig.detector_shutdowns(), 1);
    assert_eq!(rig.spectrograph_closes(), 1);
    assert!(!rig.session.is_open());

    let TestRig {
        session,
        detector,
        spectrograph,
    } = rig;
    drop(session);
    assert_eq!(
        detector.call_count(|c| matches!(c, DetectorCall::ShutDown)),
        1
    );
    assert_eq!(
        spectrograph.call_count(|c| matches!(c, SpectrographCall::Close)),
        1
    );
}

#[tokio::test]
async fn operations_after_close_fail() {
    let rig = TestRig::open().await;
    rig.session.close().await;

    assert!(matches!(
        rig.session.set_full_image().await,
        Err(SpectroError::SessionClosed)
    ));
    assert!(matches!(
        rig.session.take_full_image().await,
        Err(SpectroError::SessionClosed)
    ));
    assert!(matches!(
        rig.session.temperature().await,
        Err(SpectroError::SessionClosed)
    ));
}

#[tokio::test]
async fn drop_without_close_releases_devices() {
    let detector = MockDetector::default();
    let spectrograph = MockSpectrograph::default();
    {
        let _session = AndorSpectrometer::open_with(
            detector.clone(),
            spectrograph.clone(),
            SpectrometerSettings::simulated(),
        )
        .await
        .unwrap();
    }
    assert!(!detector.is_initialized());
    assert!(!spectrograph.is_initialized());

    let again = AndorSpectrometer::open_with(
        detector.clone(),
        spectrograph.clone(),
        SpectrometerSettings::simulated(),
    )
    .await;
    assert!(again.is_ok());
}

#[tokio::test]
async fn shutdown_failure_does_not_stop_teardown() {
    let rig = TestRig::open().await;
    rig.detector.faults().inject(FaultScenario::Always {
        operation: "ShutDown",
        code: 20075,
    });

    rig.session.close().await;
    assert_eq!(rig.spectrograph_closes(), 1);
    assert!(!rig.spectrograph.is_initialized());
    assert!(!rig.session.is_open());
}

// =============================================================================
// Exposure
// =============================================================================

#[tokio::test]
async fn exposure_control_capability() {
    let rig = TestRig::open().await;

    rig.session.set_exposure(0.05).await.unwrap();
    let exposure = rig.session.get_exposure().await.unwrap();
    assert!((exposure - 0.05).abs() < 1e-9);
    assert!((rig.detector.exposure_s() - 0.05).abs() < 1e-6);

    assert!(matches!(
        rig.session.set_exposure_time(-1.0).await,
        Err(SpectroError::InvalidParameter(_))
    ));
    assert!((rig.session.exposure_time() - 0.05).abs() < 1e-9);
}

#[tokio::test]
async fn readout_speed_is_forwarded() {
    let rig = TestRig::open().await;
    rig.session.set_readout_speed(1, 2).await.unwrap();
    let calls = rig.detector.calls();
    assert!(calls.contains(&DetectorCall::SetHsSpeed(0, 1)));
    assert!(calls.contains(&DetectorCall::SetVsSpeed(2)));
}
