//! Andor CCD + Shamrock Spectrograph Session (Componentized)
//!
//! [`AndorSpectrometer`] owns a detector/spectrograph pair for the lifetime of
//! one session and coordinates them:
//! - Connection: device claims, bring-up with settle delay, teardown
//! - Modes: full image, slit image and single-track read-out geometry
//! - Acquisition: the status poller and cross-task abort
//! - State: the snapshot published to display consumers
//!
//! # Concurrency
//!
//! Every hardware interaction runs under one async mutex (the session guard).
//! Composite operations such as [`AndorSpectrometer::take_full_image`] hold it
//! from the mode transition through start, polling and fetch, so no other
//! caller can reprogram the detector mid-acquisition. Callers queue on the
//! guard; nothing is retried. [`AndorSpectrometer::abort_acquisition`] and the
//! state readers never take the guard.
//!
//! ```rust,ignore
//! use spectro_driver_andor::{AndorSpectrometer, SpectrometerSettings};
//!
//! let session = AndorSpectrometer::open_with(detector, spectrograph, SpectrometerSettings::default()).await?;
//! session.set_centre_wavelength(650.0).await?;
//! session.set_single_track(Some((100, 105))).await?;
//! session.set_exposure_time(10.0).await?;
//! let track = session.take_single_track().await?;
//! let axis = session.wavelength_axis();
//! session.close().await;
//! ```

pub mod components;

use async_trait::async_trait;
use chrono::Utc;
use spectro_core::calibration::{CalibrationTable, InvalidRange};
use spectro_core::capabilities::ExposureControl;
use spectro_core::data::{AcquiredFrame, AcquisitionResult, FrameMetadata, Spectrum};
use spectro_core::device::{
    AcquisitionKind, Detector, GratingInfo, ReadMode, ShutterConfig, Spectrograph,
    TemperatureReading,
};
use spectro_core::error::{DeviceFault, SpectroError, SpectroResult};
use spectro_core::geometry::{DetectorGeometry, RoiWindow};
use spectro_core::mode::AcquisitionMode;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

pub use crate::components::acquisition::{AbortSignal, Poller, StatusProtocol};
pub use crate::components::settings::{
    AcquisitionSettings, OpticsSettings, SessionSettings, SpectrometerSettings,
};
pub use crate::components::state::SessionState;

use crate::components::connection::Devices;
use crate::components::modes;

/// Everything behind the session guard.
struct Inner {
    /// `None` once closed.
    devices: Option<Devices>,
    /// Completed acquisitions so far.
    sequence: u64,
}

/// One open detector/spectrograph session.
///
/// Share it between tasks with `Arc`; every method takes `&self`.
pub struct AndorSpectrometer {
    guard: Mutex<Inner>,
    settings: SpectrometerSettings,
    poller: Poller,
    abort: AbortSignal,
    state_tx: watch::Sender<Arc<SessionState>>,
    frame_tx: broadcast::Sender<Arc<AcquiredFrame>>,
    last_frame: parking_lot::Mutex<Option<Arc<AcquiredFrame>>>,
}

impl AndorSpectrometer {
    /// Open a session with default settings.
    ///
    /// Waits the default 2 s settle delay between the two initializations.
    pub async fn open<D, S>(
        detector: D,
        spectrograph: S,
        cooler_enabled: bool,
        shutter_enabled: bool,
    ) -> SpectroResult<Self>
    where
        D: Detector + 'static,
        S: Spectrograph + 'static,
    {
        let mut settings = SpectrometerSettings::default();
        settings.session.cooler_enabled = cooler_enabled;
        settings.session.shutter_enabled = shutter_enabled;
        Self::open_with(detector, spectrograph, settings).await
    }

    /// Open a session.
    ///
    /// Fails with `SessionAlreadyOpen` when a live session owns either device,
    /// and with `InitializationFailure` when either device does not come up.
    /// On any failure every device that was opened has been released again.
    pub async fn open_with<D, S>(
        detector: D,
        spectrograph: S,
        settings: SpectrometerSettings,
    ) -> SpectroResult<Self>
    where
        D: Detector + 'static,
        S: Spectrograph + 'static,
    {
        settings.validate()?;
        let mut devices =
            Devices::bring_up(Box::new(detector), Box::new(spectrograph), settings.settle_delay())
                .await?;

        let state = match configure(&mut devices, &settings) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Session configuration failed, releasing devices");
                devices.release();
                return Err(e);
            }
        };
        tracing::info!(
            width = state.geometry.width,
            height = state.geometry.height,
            centre_nm = state.centre_wavelength_nm,
            grating = state.grating,
            "Spectrometer session open"
        );

        let (state_tx, _) = watch::channel(Arc::new(state));
        let (frame_tx, _) = broadcast::channel(settings.acquisition.frame_channel_capacity);
        Ok(Self {
            guard: Mutex::new(Inner {
                devices: Some(devices),
                sequence: 0,
            }),
            poller: Poller::new(StatusProtocol::ANDOR, settings.poll_interval()),
            settings,
            abort: AbortSignal::new(),
            state_tx,
            frame_tx,
            last_frame: parking_lot::Mutex::new(None),
        })
    }

    /// Release both devices. Idempotent; shutdown failures are only logged.
    ///
    /// Waits for an in-flight acquisition; call [`Self::abort_acquisition`]
    /// first to cut it short.
    pub async fn close(&self) {
        let mut inner = self.guard.lock().await;
        match inner.devices.take() {
            Some(devices) => {
                devices.release();
                let mut draft = self.draft();
                draft.open = false;
                self.publish(draft);
                tracing::info!("Spectrometer session closed");
            }
            None => tracing::debug!("Session already closed"),
        }
    }

    // =========================================================================
    // Mode transitions
    // =========================================================================

    /// Read out the whole sensor.
    pub async fn set_full_image(&self) -> SpectroResult<()> {
        self.with_devices(|devices, draft| {
            modes::apply_full_image(devices.detector.as_mut(), draft)
        })
        .await
    }

    /// Drive to zero order, open the slit fully and read only the slit columns.
    pub async fn set_slit_image(&self) -> SpectroResult<()> {
        let optics = &self.settings.optics;
        self.with_devices(|devices, draft| modes::apply_slit_image(devices, optics, draft))
            .await
    }

    /// Read a narrow band of rows across all columns.
    ///
    /// With `None` the rows are computed from the current slit width and the
    /// configured number of leading rows is dropped from acquired data.
    /// Explicit `(start, stop)` rows (1-based, inclusive) are used as given.
    pub async fn set_single_track(&self, rows: Option<(u32, u32)>) -> SpectroResult<()> {
        let optics = &self.settings.optics;
        self.with_devices(|devices, draft| {
            modes::apply_single_track(devices.detector.as_mut(), optics, rows, draft)
        })
        .await
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Switch to full image if needed and acquire.
    pub async fn take_full_image(&self) -> SpectroResult<AcquisitionResult> {
        self.take_in_mode(
            |mode| matches!(mode, AcquisitionMode::FullImage),
            |devices, _, draft| modes::apply_full_image(devices.detector.as_mut(), draft),
        )
        .await
        .map(|(result, _)| result)
    }

    /// Drive to zero order and the widest slit, then acquire the slit window.
    ///
    /// The transition runs even when the mode is already `SlitImage`: a
    /// wavelength or grating write since then may have left zero order.
    pub async fn take_slit_image(&self) -> SpectroResult<AcquisitionResult> {
        self.take_in_mode(|_| false, modes::apply_slit_image)
            .await
            .map(|(result, _)| result)
    }

    /// Switch to a computed single track if needed and acquire.
    ///
    /// Discard rows are removed from the returned frame.
    pub async fn take_single_track(&self) -> SpectroResult<AcquisitionResult> {
        self.take_in_mode(AcquisitionMode::is_single_track, |devices, optics, draft| {
            modes::apply_single_track(devices.detector.as_mut(), optics, None, draft)
        })
        .await
        .map(|(result, _)| result)
    }

    /// Acquire a single track and bin it into a calibrated spectrum.
    ///
    /// `Ok(None)` when the acquisition was aborted. A terminal status code is
    /// returned as a `Device` error.
    pub async fn take_spectrum(&self) -> SpectroResult<Option<Spectrum>> {
        let (result, state) = self
            .take_in_mode(AcquisitionMode::is_single_track, |devices, optics, draft| {
                modes::apply_single_track(devices.detector.as_mut(), optics, None, draft)
            })
            .await?;
        match result {
            AcquisitionResult::Data(frame) => {
                Ok(Some(Spectrum::from_frame(&frame, &state.calibration)?))
            }
            AcquisitionResult::Aborted => Ok(None),
            AcquisitionResult::DeviceError(code) => {
                Err(DeviceFault::detector("acquisition", code).into())
            }
        }
    }

    /// Acquire a slit image, then put wavelength, slit width and mode back.
    ///
    /// The restore runs even when the acquisition fails; an acquisition error
    /// takes precedence over a restore error.
    pub async fn take_slit_snapshot(&self) -> SpectroResult<AcquisitionResult> {
        let mut inner = self.guard.lock().await;
        let Inner { devices, sequence } = &mut *inner;
        let devices = devices.as_mut().ok_or(SpectroError::SessionClosed)?;
        let optics = &self.settings.optics;

        let prior = self.draft();
        let mut draft = prior.clone();
        let acquired = match modes::apply_slit_image(devices, optics, &mut draft) {
            Ok(()) => {
                self.publish(draft.clone());
                self.acquire_locked(devices, sequence, &draft).await
            }
            Err(e) => Err(e),
        };

        let restored = modes::restore_optics(devices, optics, &prior, &mut draft);
        self.publish(draft);
        let result = acquired?;
        restored?;
        Ok(result)
    }

    /// Ask the in-flight acquisition to stop.
    ///
    /// Does not wait for the guard. The acquiring caller gets `Aborted` within
    /// one poll interval. Without an acquisition in flight this does nothing.
    pub fn abort_acquisition(&self) {
        tracing::info!("Abort requested");
        self.abort.raise();
    }

    // =========================================================================
    // Detector settings
    // =========================================================================

    /// Exposure for subsequent acquisitions, seconds.
    pub async fn set_exposure_time(&self, seconds: f64) -> SpectroResult<()> {
        if !(seconds.is_finite() && seconds >= 0.0) {
            return Err(SpectroError::InvalidParameter(format!(
                "exposure {} s must be non-negative",
                seconds
            )));
        }
        self.with_devices(|devices, draft| {
            devices.detector.set_exposure_time(seconds as f32)?;
            draft.exposure_s = seconds;
            Ok(())
        })
        .await
    }

    /// Horizontal and vertical shift speed indices.
    pub async fn set_readout_speed(&self, hs_index: i32, vs_index: i32) -> SpectroResult<()> {
        self.with_devices(|devices, _| {
            devices.detector.set_hs_speed(0, hs_index)?;
            devices.detector.set_vs_speed(vs_index)?;
            tracing::debug!(hs_index, vs_index, "Readout speed set");
            Ok(())
        })
        .await
    }

    /// Read the sensor temperature and its stabilization status.
    pub async fn temperature(&self) -> SpectroResult<TemperatureReading> {
        self.with_devices(|devices, _| Ok(devices.detector.temperature()?))
            .await
    }

    // =========================================================================
    // Spectrograph settings
    // =========================================================================

    /// Move the grating to `nm` and recompute the calibration.
    ///
    /// The value is applied even when it lies outside the grating's usable
    /// range; that case is returned as `Some(InvalidRange)` and logged.
    pub async fn set_centre_wavelength(&self, nm: f64) -> SpectroResult<Option<InvalidRange>> {
        self.with_devices(|devices, draft| {
            modes::apply_centre_wavelength(devices.spectrograph.as_mut(), nm, draft)
        })
        .await
    }

    /// Set the entrance slit. In single-track mode the track follows.
    pub async fn set_slit_width_um(&self, width_um: f64) -> SpectroResult<()> {
        let optics = &self.settings.optics;
        self.with_devices(|devices, draft| {
            modes::apply_slit_width(devices, optics, width_um, draft)
        })
        .await
    }

    /// Select grating `grating` (1-based) and recompute the calibration.
    pub async fn set_grating(&self, grating: u32) -> SpectroResult<()> {
        self.with_devices(|devices, draft| {
            modes::apply_grating(devices.spectrograph.as_mut(), grating, draft)
        })
        .await
    }

    /// Every grating on the turret, grating 1 first.
    pub async fn gratings(&self) -> SpectroResult<Vec<GratingInfo>> {
        self.with_devices(|devices, _| {
            let count = devices.spectrograph.number_gratings()?;
            let mut gratings = Vec::with_capacity(count as usize);
            for index in 1..=count {
                gratings.push(devices.spectrograph.grating_info(index)?);
            }
            Ok(gratings)
        })
        .await
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Current snapshot.
    pub fn state(&self) -> Arc<SessionState> {
        self.state_tx.borrow().clone()
    }

    /// Receiver notified whenever the snapshot changes.
    pub fn subscribe_state(&self) -> watch::Receiver<Arc<SessionState>> {
        self.state_tx.subscribe()
    }

    /// Most recent completed frame.
    pub fn last_frame(&self) -> Option<Arc<AcquiredFrame>> {
        self.last_frame.lock().clone()
    }

    /// Receiver for every completed frame from now on.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Arc<AcquiredFrame>> {
        self.frame_tx.subscribe()
    }

    /// Calibration table for the current optics.
    pub fn wavelength_axis(&self) -> Arc<CalibrationTable> {
        self.state().calibration.clone()
    }

    /// Whether `table` still describes the current optics.
    pub fn is_calibration_current(&self, table: &CalibrationTable) -> bool {
        table.generation() == self.state().optics_generation
    }

    /// `false` after [`close`](Self::close).
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Sensor size and pixel pitch read at open.
    pub fn geometry(&self) -> DetectorGeometry {
        self.state().geometry
    }

    /// Current acquisition mode.
    pub fn mode(&self) -> AcquisitionMode {
        self.state().mode
    }

    /// Window programmed on the detector.
    pub fn roi(&self) -> RoiWindow {
        self.state().roi
    }

    /// Exposure time in seconds.
    pub fn exposure_time(&self) -> f64 {
        self.state().exposure_s
    }

    /// Centre wavelength in nm; 0 at zero order.
    pub fn centre_wavelength(&self) -> f64 {
        self.state().centre_wavelength_nm
    }

    /// Entrance slit width in µm.
    pub fn slit_width_um(&self) -> f64 {
        self.state().slit_width_um
    }

    /// Active grating, 1-based.
    pub fn grating(&self) -> u32 {
        self.state().grating
    }

    /// Settings the session was opened with.
    pub fn settings(&self) -> &SpectrometerSettings {
        &self.settings
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn draft(&self) -> SessionState {
        SessionState::clone(&self.state_tx.borrow())
    }

    fn publish(&self, draft: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if **current == draft {
                false
            } else {
                *current = Arc::new(draft);
                true
            }
        });
    }

    /// Run a synchronous device operation under the guard.
    ///
    /// The draft is published whether or not `op` succeeds, so the snapshot
    /// keeps matching whatever was written before a failure.
    async fn with_devices<T>(
        &self,
        op: impl FnOnce(&mut Devices, &mut SessionState) -> SpectroResult<T>,
    ) -> SpectroResult<T> {
        let mut inner = self.guard.lock().await;
        let devices = inner.devices.as_mut().ok_or(SpectroError::SessionClosed)?;
        let mut draft = self.draft();
        let result = op(devices, &mut draft);
        self.publish(draft);
        result
    }

    /// Transition with `enter` unless `in_mode` already holds, then acquire,
    /// all in one guard hold.
    async fn take_in_mode(
        &self,
        in_mode: fn(&AcquisitionMode) -> bool,
        enter: impl FnOnce(&mut Devices, &OpticsSettings, &mut SessionState) -> SpectroResult<()>,
    ) -> SpectroResult<(AcquisitionResult, SessionState)> {
        let mut inner = self.guard.lock().await;
        let Inner { devices, sequence } = &mut *inner;
        let devices = devices.as_mut().ok_or(SpectroError::SessionClosed)?;

        let mut draft = self.draft();
        if !in_mode(&draft.mode) {
            let entered = enter(devices, &self.settings.optics, &mut draft);
            self.publish(draft.clone());
            entered?;
        }
        let result = self.acquire_locked(devices, sequence, &draft).await?;
        Ok((result, draft))
    }

    /// Acquire the window in `state`; the caller holds the guard.
    async fn acquire_locked(
        &self,
        devices: &mut Devices,
        sequence: &mut u64,
        state: &SessionState,
    ) -> SpectroResult<AcquisitionResult> {
        let roi = state.roi;
        tracing::debug!(mode = %state.mode, %roi, exposure_s = state.exposure_s, "Starting acquisition");
        let result = self
            .poller
            .acquire(devices.detector.as_mut(), roi.columns(), roi.rows(), &self.abort)
            .await?;

        let discard_rows = match state.mode {
            AcquisitionMode::SingleTrack(track) => track.discard_rows,
            _ => 0,
        };
        let result = result.map_frame(|frame| frame.without_leading_rows(discard_rows));

        if let AcquisitionResult::Data(frame) = &result {
            *sequence += 1;
            let acquired = Arc::new(AcquiredFrame {
                metadata: FrameMetadata {
                    sequence: *sequence,
                    mode: state.mode,
                    roi,
                    exposure_s: state.exposure_s,
                    calibration_generation: state.calibration.generation(),
                    acquired_at: Utc::now(),
                },
                frame: frame.clone(),
            });
            *self.last_frame.lock() = Some(acquired.clone());
            // No receivers is fine.
            let _ = self.frame_tx.send(acquired);
        }
        Ok(result)
    }
}

impl Drop for AndorSpectrometer {
    fn drop(&mut self) {
        if let Some(devices) = self.guard.get_mut().devices.take() {
            tracing::info!("Releasing devices of a session dropped without close");
            devices.release();
        }
    }
}

#[async_trait]
impl ExposureControl for AndorSpectrometer {
    async fn set_exposure(&self, seconds: f64) -> anyhow::Result<()> {
        Ok(self.set_exposure_time(seconds).await?)
    }

    async fn get_exposure(&self) -> anyhow::Result<f64> {
        Ok(self.exposure_time())
    }
}

/// Bring freshly initialized devices to the session's starting point.
fn configure(devices: &mut Devices, settings: &SpectrometerSettings) -> SpectroResult<SessionState> {
    let session = &settings.session;
    let detector = devices.detector.as_mut();

    let (width, height) = detector.detector_size()?;
    let (pixel_width_um, pixel_height_um) = detector.pixel_size()?;
    let bit_depth = detector.bit_depth()?;
    let geometry = DetectorGeometry::new(
        width,
        height,
        f64::from(pixel_width_um),
        f64::from(pixel_height_um),
        bit_depth,
    )?;

    detector.set_read_mode(ReadMode::Image)?;
    detector.set_acquisition_mode(AcquisitionKind::SingleScan)?;
    detector.set_exposure_time(session.default_exposure_s as f32)?;
    let shutter = if session.shutter_enabled {
        ShutterConfig::auto(session.shutter_transfer_ms)
    } else {
        ShutterConfig::open()
    };
    detector.set_shutter(shutter)?;
    if session.cooler_enabled {
        detector.set_temperature(session.target_temperature_c)?;
        detector.cooler_on()?;
        tracing::info!(target_c = session.target_temperature_c, "Cooler on");
    }
    let roi = RoiWindow::full(&geometry);
    detector.set_image_window(roi)?;

    let spectrograph = devices.spectrograph.as_mut();
    spectrograph.set_number_pixels(width)?;
    spectrograph.set_pixel_width(pixel_width_um)?;
    let centre_wavelength_nm = f64::from(spectrograph.wavelength()?);
    let slit_width_um = f64::from(spectrograph.auto_slit_width(settings.optics.slit_index)?);
    let grating = spectrograph.grating()?;

    let mut state = SessionState {
        open: true,
        geometry,
        mode: AcquisitionMode::FullImage,
        roi,
        exposure_s: session.default_exposure_s,
        centre_wavelength_nm,
        slit_width_um,
        grating,
        optics_generation: 0,
        calibration: Arc::new(CalibrationTable::new(Vec::new(), 0)),
    };
    modes::refresh_calibration(spectrograph, &mut state)?;
    Ok(state)
}
