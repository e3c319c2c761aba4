//! Wavelength calibration of the detector column axis.
//!
//! The spectrograph owns the optical model; this module only asks it for the
//! per-pixel mapping and stamps the result with the optics generation it was
//! computed for. The owning session bumps its generation on every grating or
//! centre-wavelength change, so a table from an older generation is stale.

use crate::device::Spectrograph;
use crate::error::{SpectroError, SpectroResult};
use serde::{Deserialize, Serialize};

/// One wavelength per detector column, index 0 = column 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    wavelengths_nm: Vec<f64>,
    generation: u64,
}

impl CalibrationTable {
    /// Wrap a mapping computed for `generation`.
    pub fn new(wavelengths_nm: Vec<f64>, generation: u64) -> Self {
        Self {
            wavelengths_nm,
            generation,
        }
    }

    /// Optics generation this table belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of columns covered.
    pub fn len(&self) -> usize {
        self.wavelengths_nm.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.wavelengths_nm.is_empty()
    }

    /// Wavelength of a 0-based column.
    pub fn wavelength_at(&self, column: usize) -> Option<f64> {
        self.wavelengths_nm.get(column).copied()
    }

    /// All wavelengths in column order.
    pub fn as_slice(&self) -> &[f64] {
        &self.wavelengths_nm
    }

    /// First and last wavelength, if any.
    pub fn span_nm(&self) -> Option<(f64, f64)> {
        match (self.wavelengths_nm.first(), self.wavelengths_nm.last()) {
            (Some(first), Some(last)) => Some((*first, *last)),
            _ => None,
        }
    }

    /// Element-wise equality of the wavelength axis, ignoring generation.
    pub fn same_axis(&self, other: &CalibrationTable) -> bool {
        self.wavelengths_nm == other.wavelengths_nm
    }
}

/// Ask the spectrograph for its current per-pixel mapping.
///
/// Must be called after every grating or centre-wavelength change. The
/// centre wavelength is not checked here.
pub fn recompute_calibration(
    spectrograph: &mut dyn Spectrograph,
    width: u32,
    generation: u64,
) -> SpectroResult<CalibrationTable> {
    let raw = spectrograph.calibration(width)?;
    if raw.len() != width as usize {
        return Err(SpectroError::CalibrationLength {
            expected: width as usize,
            actual: raw.len(),
        });
    }
    tracing::debug!(
        generation,
        first_nm = raw.first().copied().unwrap_or_default(),
        last_nm = raw.last().copied().unwrap_or_default(),
        "calibration recomputed"
    );
    Ok(CalibrationTable::new(
        raw.into_iter().map(f64::from).collect(),
        generation,
    ))
}

/// A centre wavelength outside the grating's usable range.
///
/// Advisory: the value has still been sent to the spectrograph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvalidRange {
    /// Wavelength that was requested, nm.
    pub requested_nm: f64,
    /// Lower usable limit of the active grating, nm.
    pub min_nm: f64,
    /// Upper usable limit of the active grating, nm.
    pub max_nm: f64,
}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nm outside usable range {}..={} nm",
            self.requested_nm, self.min_nm, self.max_nm
        )
    }
}

/// Inclusive range check against `(min, max)` grating limits.
pub fn check_wavelength_range(requested_nm: f64, limits_nm: (f64, f64)) -> Option<InvalidRange> {
    let (min_nm, max_nm) = limits_nm;
    if requested_nm >= min_nm && requested_nm <= max_nm {
        None
    } else {
        Some(InvalidRange {
            requested_nm,
            min_nm,
            max_nm,
        })
    }
}
