//! Acquired data: frames, spectra and the acquisition outcome taxonomy.

use crate::calibration::CalibrationTable;
use crate::error::{SpectroError, SpectroResult};
use crate::geometry::RoiWindow;
use crate::mode::AcquisitionMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row-major block of samples read from the detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// `width * height` samples, row-major.
    pub pixels: Vec<i32>,
}

impl Frame {
    /// Wrap samples, checking the length against the shape.
    pub fn new(width: u32, height: u32, pixels: Vec<i32>) -> SpectroResult<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(SpectroError::InvalidParameter(format!(
                "{} samples for a {}x{} frame",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Samples of a 0-based row.
    pub fn row(&self, row: u32) -> Option<&[i32]> {
        if row >= self.height {
            return None;
        }
        let start = row as usize * self.width as usize;
        self.pixels.get(start..start + self.width as usize)
    }

    /// Drop the first `rows` rows.
    pub fn without_leading_rows(mut self, rows: u32) -> Self {
        let rows = rows.min(self.height);
        self.pixels.drain(..rows as usize * self.width as usize);
        self.height -= rows;
        self
    }

    /// Sum every column over all rows (software vertical binning).
    pub fn column_sums(&self) -> Vec<i64> {
        let mut sums = vec![0i64; self.width as usize];
        for row in self.pixels.chunks_exact(self.width.max(1) as usize) {
            for (sum, value) in sums.iter_mut().zip(row) {
                *sum += i64::from(*value);
            }
        }
        sums
    }

    /// Brightest sample.
    pub fn max_value(&self) -> Option<i32> {
        self.pixels.iter().copied().max()
    }
}

/// Intensity against wavelength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Column wavelengths, nm.
    pub wavelengths_nm: Vec<f64>,
    /// Column intensities (counts summed over the track rows).
    pub intensities: Vec<f64>,
}

impl Spectrum {
    /// Bin a full-width frame and label it with `calibration`.
    pub fn from_frame(frame: &Frame, calibration: &CalibrationTable) -> SpectroResult<Self> {
        if frame.width as usize != calibration.len() {
            return Err(SpectroError::CalibrationLength {
                expected: frame.width as usize,
                actual: calibration.len(),
            });
        }
        Ok(Self {
            wavelengths_nm: calibration.as_slice().to_vec(),
            intensities: frame.column_sums().into_iter().map(|v| v as f64).collect(),
        })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    /// Whether the spectrum has no points.
    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }

    /// Wavelength of the brightest column.
    pub fn peak_nm(&self) -> Option<f64> {
        self.intensities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .and_then(|(i, _)| self.wavelengths_nm.get(i).copied())
    }
}

/// Outcome of one acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionResult {
    /// Completed; the full sample block.
    Data(Frame),
    /// Cancelled by an abort request. Not an error.
    Aborted,
    /// The detector reported a terminal status code; no data was fetched.
    DeviceError(i32),
}

impl AcquisitionResult {
    /// The frame, if the acquisition completed.
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            AcquisitionResult::Data(frame) => Some(frame),
            _ => None,
        }
    }

    /// Consume into the frame, if the acquisition completed.
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            AcquisitionResult::Data(frame) => Some(frame),
            _ => None,
        }
    }

    /// Whether the acquisition was aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, AcquisitionResult::Aborted)
    }

    /// Apply `f` to the frame of a completed acquisition.
    pub fn map_frame(self, f: impl FnOnce(Frame) -> Frame) -> Self {
        match self {
            AcquisitionResult::Data(frame) => AcquisitionResult::Data(f(frame)),
            other => other,
        }
    }
}

/// Metadata recorded with each completed acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Monotonic acquisition counter of the session.
    pub sequence: u64,
    /// Read-out geometry.
    pub mode: AcquisitionMode,
    /// Window programmed on the detector.
    pub roi: RoiWindow,
    /// Exposure time, seconds.
    pub exposure_s: f64,
    /// Optics generation of the calibration valid for this frame.
    pub calibration_generation: u64,
    /// Completion time.
    pub acquired_at: DateTime<Utc>,
}

/// A completed frame with its metadata, as kept for display consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquiredFrame {
    /// Metadata.
    pub metadata: FrameMetadata,
    /// Samples, discard rows already removed.
    pub frame: Frame,
}
