//! Sample patterns produced by the simulated detector.

use serde::Deserialize;
use spectro_core::geometry::RoiWindow;

/// What the simulated sensor "sees".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelPattern {
    /// Each sample encodes its own sensor position as `row * 1000 + col`
    /// (1-based), so tests can tell exactly which window was read out.
    #[default]
    Coordinates,
    /// Bias level plus three Gaussian emission lines, brightest along the
    /// middle rows where the slit image falls.
    Spectral,
}

const BIAS: f64 = 100.0;
const LINE_AMPLITUDE: f64 = 5000.0;
const LINE_SIGMA_PX: f64 = 3.0;
const LINE_POSITIONS: [f64; 3] = [0.3, 0.55, 0.8];

/// Samples for one read-out of `roi` on a `width x height` sensor, row-major.
pub fn render(pattern: PixelPattern, roi: &RoiWindow, width: u32, height: u32) -> Vec<i32> {
    let mut samples = Vec::with_capacity(roi.pixel_count());
    for row in roi.min_row()..=roi.max_row() {
        for col in roi.min_col()..=roi.max_col() {
            samples.push(match pattern {
                PixelPattern::Coordinates => (row * 1000 + col) as i32,
                PixelPattern::Spectral => spectral_value(row, col, width, height),
            });
        }
    }
    samples
}

fn spectral_value(row: u32, col: u32, width: u32, height: u32) -> i32 {
    let centre_row = f64::from(height) / 2.0;
    let row_sigma = (f64::from(height) / 6.0).max(1.0);
    let row_profile = (-(f64::from(row) - centre_row).powi(2) / (2.0 * row_sigma.powi(2))).exp();

    let lines: f64 = LINE_POSITIONS
        .iter()
        .map(|fraction| {
            let centre = fraction * f64::from(width);
            (-(f64::from(col) - centre).powi(2) / (2.0 * LINE_SIGMA_PX.powi(2))).exp()
        })
        .sum();

    (BIAS + LINE_AMPLITUDE * lines * row_profile).round() as i32
}
