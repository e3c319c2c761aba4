//! Detector geometry and region-of-interest arithmetic.
//!
//! All windows use the SDK convention: 1-based, inclusive on both ends.
//! Functions here are pure; nothing touches a device.

use crate::error::{SpectroError, SpectroResult};
use serde::{Deserialize, Serialize};

/// Sensor dimensions and pixel pitch, queried once when a session opens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    /// Columns (spectral axis).
    pub width: u32,
    /// Rows (spatial axis along the slit).
    pub height: u32,
    /// Pixel width in µm.
    pub pixel_width_um: f64,
    /// Pixel height in µm.
    pub pixel_height_um: f64,
    /// AD converter bit depth.
    pub bit_depth: u32,
}

impl DetectorGeometry {
    /// Validate a geometry reported by the detector.
    pub fn new(
        width: u32,
        height: u32,
        pixel_width_um: f64,
        pixel_height_um: f64,
        bit_depth: u32,
    ) -> SpectroResult<Self> {
        if width == 0 || height == 0 {
            return Err(SpectroError::InvalidGeometry(format!(
                "detector size {}x{} must be non-zero",
                width, height
            )));
        }
        if !(pixel_width_um.is_finite() && pixel_width_um > 0.0)
            || !(pixel_height_um.is_finite() && pixel_height_um > 0.0)
        {
            return Err(SpectroError::InvalidGeometry(format!(
                "pixel size {}x{} µm must be positive",
                pixel_width_um, pixel_height_um
            )));
        }
        Ok(Self {
            width,
            height,
            pixel_width_um,
            pixel_height_um,
            bit_depth,
        })
    }

    /// Largest value a pixel can hold.
    pub fn dynamic_range(&self) -> u64 {
        (1u64 << self.bit_depth.min(63)) - 1
    }
}

/// Image window programmed on the detector.
///
/// Always satisfies `1 <= min_col <= max_col <= width` and
/// `1 <= min_row <= max_row <= height` for the detector it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoiWindow {
    min_col: u32,
    max_col: u32,
    min_row: u32,
    max_row: u32,
}

impl RoiWindow {
    /// Build a window, checking it against the detector bounds.
    pub fn new(
        min_col: u32,
        max_col: u32,
        min_row: u32,
        max_row: u32,
        width: u32,
        height: u32,
    ) -> SpectroResult<Self> {
        if min_col < 1 || min_col > max_col || max_col > width {
            return Err(SpectroError::InvalidWindow(format!(
                "columns {}..={} outside 1..={}",
                min_col, max_col, width
            )));
        }
        if min_row < 1 || min_row > max_row || max_row > height {
            return Err(SpectroError::InvalidWindow(format!(
                "rows {}..={} outside 1..={}",
                min_row, max_row, height
            )));
        }
        Ok(Self {
            min_col,
            max_col,
            min_row,
            max_row,
        })
    }

    /// The whole sensor.
    pub fn full(geometry: &DetectorGeometry) -> Self {
        Self {
            min_col: 1,
            max_col: geometry.width,
            min_row: 1,
            max_row: geometry.height,
        }
    }

    /// First column.
    pub fn min_col(&self) -> u32 {
        self.min_col
    }

    /// Last column.
    pub fn max_col(&self) -> u32 {
        self.max_col
    }

    /// First row.
    pub fn min_row(&self) -> u32 {
        self.min_row
    }

    /// Last row.
    pub fn max_row(&self) -> u32 {
        self.max_row
    }

    /// Number of columns read out.
    pub fn columns(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    /// Number of rows read out.
    pub fn rows(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    /// Samples returned by one acquisition over this window.
    pub fn pixel_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }
}

impl std::fmt::Display for RoiWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cols {}..={} rows {}..={}",
            self.min_col, self.max_col, self.min_row, self.max_row
        )
    }
}

/// Row window of a single-track read-out.
///
/// The first `discard_rows` rows of the window are programmed and read like
/// any other row but carry a saturation artifact; acquisitions drop them from
/// the returned data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackWindow {
    /// First programmed row.
    pub row_start: u32,
    /// Last programmed row.
    pub row_stop: u32,
    /// Leading rows to drop from returned data.
    pub discard_rows: u32,
}

impl TrackWindow {
    /// Caller-chosen rows; nothing is discarded.
    pub fn explicit(row_start: u32, row_stop: u32, geometry: &DetectorGeometry) -> SpectroResult<Self> {
        if row_start < 1 || row_start > row_stop || row_stop > geometry.height {
            return Err(SpectroError::InvalidWindow(format!(
                "track rows {}..={} outside 1..={}",
                row_start, row_stop, geometry.height
            )));
        }
        Ok(Self {
            row_start,
            row_stop,
            discard_rows: 0,
        })
    }

    /// Rows programmed on the detector, discard rows included.
    pub fn span(&self) -> u32 {
        self.row_stop - self.row_start + 1
    }

    /// Rows left after the discard rows are dropped.
    pub fn usable_rows(&self) -> u32 {
        self.span() - self.discard_rows
    }

    /// Full-width detector window covering this track.
    pub fn to_roi(&self, geometry: &DetectorGeometry) -> RoiWindow {
        RoiWindow {
            min_col: 1,
            max_col: geometry.width,
            min_row: self.row_start,
            max_row: self.row_stop,
        }
    }
}

/// Columns illuminated by the slit image.
///
/// The maximum slit width is converted to a pixel count, centred on the column
/// axis, widened by `margin_low_px` on the left and `margin_high_px` on the
/// right (the optical slit image is not centred on the sensor), then clamped to
/// the sensor. Negative margins narrow that side. Rows span the full height.
pub fn compute_slit_roi(
    geometry: &DetectorGeometry,
    max_slit_width_um: f64,
    margin_low_px: i32,
    margin_high_px: i32,
) -> RoiWindow {
    let width = i64::from(geometry.width);
    let visible = (max_slit_width_um / geometry.pixel_width_um).max(0.0);
    let low = (width as f64 / 2.0 - visible / 2.0).round() as i64;
    let high = width - low;

    let mut min_col = (low - i64::from(margin_low_px)).clamp(1, width);
    let mut max_col = (high + i64::from(margin_high_px)).clamp(1, width);
    if min_col > max_col {
        let centre = (min_col + max_col) / 2;
        min_col = centre;
        max_col = centre;
    }

    RoiWindow {
        min_col: min_col as u32,
        max_col: max_col as u32,
        min_row: 1,
        max_row: geometry.height,
    }
}

/// Rows for a single-track read-out at the given slit width.
///
/// The slit width is converted to rows, floored at `minimum_row_count` (narrower
/// tracks are optically invalid), centred on the row axis, and extended at its
/// start by `discard_rows` rows for the sensor artifact. The span never drops
/// below `minimum_row_count` unless the sensor itself is shorter.
pub fn compute_track_roi(
    geometry: &DetectorGeometry,
    slit_width_um: f64,
    pixel_height_um: f64,
    minimum_row_count: u32,
    discard_rows: u32,
) -> SpectroResult<TrackWindow> {
    if !(pixel_height_um.is_finite() && pixel_height_um > 0.0) {
        return Err(SpectroError::InvalidParameter(format!(
            "pixel height {} µm must be positive",
            pixel_height_um
        )));
    }
    if !slit_width_um.is_finite() || slit_width_um < 0.0 {
        return Err(SpectroError::InvalidParameter(format!(
            "slit width {} µm must be non-negative",
            slit_width_um
        )));
    }

    let height = geometry.height;
    let from_slit = (slit_width_um / pixel_height_um).ceil() as u64;
    let rows = from_slit
        .max(u64::from(minimum_row_count))
        .max(1)
        .min(u64::from(height)) as u32;
    let total = rows.saturating_add(discard_rows).min(height);
    let discard = discard_rows.min(total - 1);

    let usable_start = (height - rows) / 2 + 1;
    let mut row_start = usable_start.saturating_sub(discard).max(1);
    let mut row_stop = row_start + total - 1;
    if row_stop > height {
        row_stop = height;
        row_start = height - total + 1;
    }

    Ok(TrackWindow {
        row_start,
        row_stop,
        discard_rows: discard,
    })
}
