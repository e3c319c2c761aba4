//! Read-out geometry currently programmed on the detector.

use crate::geometry::TrackWindow;
use serde::{Deserialize, Serialize};

/// The three mutually exclusive read-out geometries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionMode {
    /// Whole sensor.
    FullImage,
    /// Undispersed image of the slit, columns `min_col..=max_col`, all rows.
    SlitImage {
        /// First illuminated column.
        min_col: u32,
        /// Last illuminated column.
        max_col: u32,
    },
    /// All columns over a narrow row window.
    SingleTrack(TrackWindow),
}

impl AcquisitionMode {
    /// Short name for logs and file headers.
    pub fn name(&self) -> &'static str {
        match self {
            AcquisitionMode::FullImage => "full_image",
            AcquisitionMode::SlitImage { .. } => "slit_image",
            AcquisitionMode::SingleTrack(_) => "single_track",
        }
    }

    /// Whether this is a single-track geometry.
    pub fn is_single_track(&self) -> bool {
        matches!(self, AcquisitionMode::SingleTrack(_))
    }
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionMode::FullImage => write!(f, "full image"),
            AcquisitionMode::SlitImage { min_col, max_col } => {
                write!(f, "slit image (cols {}..={})", min_col, max_col)
            }
            AcquisitionMode::SingleTrack(track) => write!(
                f,
                "single track (rows {}..={}, {} discarded)",
                track.row_start, track.row_stop, track.discard_rows
            ),
        }
    }
}
