//! Mode transitions and optics writes.
//!
//! Each function programs the hardware and records what it programmed in a
//! draft [`SessionState`]. The draft is updated step by step, right after the
//! write that justifies each field, so when a later step fails the caller can
//! still publish a draft that matches the hardware.

use super::connection::Devices;
use super::settings::OpticsSettings;
use super::state::SessionState;
use spectro_core::calibration::{check_wavelength_range, recompute_calibration, InvalidRange};
use spectro_core::device::{Detector, Spectrograph};
use spectro_core::error::{SpectroError, SpectroResult};
use spectro_core::geometry::{compute_slit_roi, compute_track_roi, RoiWindow, TrackWindow};
use spectro_core::mode::AcquisitionMode;
use std::sync::Arc;

/// Whole sensor.
pub(crate) fn apply_full_image(
    detector: &mut dyn Detector,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    let roi = RoiWindow::full(&draft.geometry);
    detector.set_image_window(roi)?;
    draft.roi = roi;
    draft.mode = AcquisitionMode::FullImage;
    tracing::debug!(%roi, "Full image");
    Ok(())
}

/// Undispersed slit image: zero order, slit wide open, slit columns only.
pub(crate) fn apply_slit_image(
    devices: &mut Devices,
    optics: &OpticsSettings,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    apply_centre_wavelength(devices.spectrograph.as_mut(), optics.zero_order_nm, draft)?;
    write_slit_width(devices.spectrograph.as_mut(), optics, optics.max_slit_width_um, draft)?;

    let roi = compute_slit_roi(
        &draft.geometry,
        optics.max_slit_width_um,
        optics.slit_margin_low_px,
        optics.slit_margin_high_px,
    );
    devices.detector.set_image_window(roi)?;
    draft.roi = roi;
    draft.mode = AcquisitionMode::SlitImage {
        min_col: roi.min_col(),
        max_col: roi.max_col(),
    };
    tracing::debug!(%roi, "Slit image");
    Ok(())
}

/// Single track from explicit rows, or computed from the current slit width.
pub(crate) fn apply_single_track(
    detector: &mut dyn Detector,
    optics: &OpticsSettings,
    rows: Option<(u32, u32)>,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    let track = match rows {
        Some((start, stop)) => TrackWindow::explicit(start, stop, &draft.geometry)?,
        None => compute_track_roi(
            &draft.geometry,
            draft.slit_width_um,
            draft.geometry.pixel_height_um,
            optics.minimum_track_rows,
            optics.track_discard_rows,
        )?,
    };
    apply_track_window(detector, track, draft)
}

/// Program an already computed track.
pub(crate) fn apply_track_window(
    detector: &mut dyn Detector,
    track: TrackWindow,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    let roi = track.to_roi(&draft.geometry);
    detector.set_image_window(roi)?;
    draft.roi = roi;
    draft.mode = AcquisitionMode::SingleTrack(track);
    tracing::debug!(%roi, discard_rows = track.discard_rows, "Single track");
    Ok(())
}

/// Re-program `mode` exactly as it was recorded.
pub(crate) fn restore_mode(
    devices: &mut Devices,
    optics: &OpticsSettings,
    mode: AcquisitionMode,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    match mode {
        AcquisitionMode::FullImage => apply_full_image(devices.detector.as_mut(), draft),
        AcquisitionMode::SlitImage { .. } => apply_slit_image(devices, optics, draft),
        AcquisitionMode::SingleTrack(track) => {
            apply_track_window(devices.detector.as_mut(), track, draft)
        }
    }
}

/// Put slit width, centre wavelength and read-out geometry back to `prior`.
///
/// Only what differs is rewritten.
pub(crate) fn restore_optics(
    devices: &mut Devices,
    optics: &OpticsSettings,
    prior: &SessionState,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    if draft.slit_width_um != prior.slit_width_um {
        write_slit_width(devices.spectrograph.as_mut(), optics, prior.slit_width_um, draft)?;
    }
    if draft.centre_wavelength_nm != prior.centre_wavelength_nm {
        apply_centre_wavelength(devices.spectrograph.as_mut(), prior.centre_wavelength_nm, draft)?;
    }
    if draft.mode != prior.mode {
        restore_mode(devices, optics, prior.mode, draft)?;
    }
    Ok(())
}

/// Move the wavelength drive and refresh the calibration.
///
/// The range check is advisory: an out-of-range value is still written and
/// reported back.
pub(crate) fn apply_centre_wavelength(
    spectrograph: &mut dyn Spectrograph,
    nm: f64,
    draft: &mut SessionState,
) -> SpectroResult<Option<InvalidRange>> {
    if !nm.is_finite() {
        return Err(SpectroError::InvalidParameter(format!(
            "centre wavelength {} nm is not a number",
            nm
        )));
    }
    let (min_nm, max_nm) = spectrograph.wavelength_limits(draft.grating)?;
    let advisory = check_wavelength_range(nm, (f64::from(min_nm), f64::from(max_nm)));
    if let Some(range) = &advisory {
        tracing::warn!(%range, grating = draft.grating, "Centre wavelength applied outside usable range");
    }

    spectrograph.set_wavelength(nm as f32)?;
    draft.centre_wavelength_nm = nm;
    draft.optics_generation += 1;
    refresh_calibration(spectrograph, draft)?;
    Ok(advisory)
}

/// Change grating; the drive keeps its own wavelength, which is read back.
pub(crate) fn apply_grating(
    spectrograph: &mut dyn Spectrograph,
    grating: u32,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    spectrograph.set_grating(grating)?;
    draft.grating = grating;
    draft.optics_generation += 1;
    draft.centre_wavelength_nm = f64::from(spectrograph.wavelength()?);
    refresh_calibration(spectrograph, draft)
}

/// Move the slit; a single track follows the new width.
pub(crate) fn apply_slit_width(
    devices: &mut Devices,
    optics: &OpticsSettings,
    width_um: f64,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    write_slit_width(devices.spectrograph.as_mut(), optics, width_um, draft)?;
    if draft.mode.is_single_track() {
        apply_single_track(devices.detector.as_mut(), optics, None, draft)?;
    }
    Ok(())
}

fn write_slit_width(
    spectrograph: &mut dyn Spectrograph,
    optics: &OpticsSettings,
    width_um: f64,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    if !(width_um.is_finite() && width_um > 0.0) {
        return Err(SpectroError::InvalidParameter(format!(
            "slit width {} µm must be positive",
            width_um
        )));
    }
    spectrograph.set_auto_slit_width(optics.slit_index, width_um as f32)?;
    draft.slit_width_um = width_um;
    Ok(())
}

pub(crate) fn refresh_calibration(
    spectrograph: &mut dyn Spectrograph,
    draft: &mut SessionState,
) -> SpectroResult<()> {
    let table = recompute_calibration(spectrograph, draft.geometry.width, draft.optics_generation)?;
    draft.calibration = Arc::new(table);
    Ok(())
}
