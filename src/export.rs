//! CSV export of spectra and frames.
//!
//! Files start with a block of `# key: value` comment lines describing the
//! session state at export time, followed by plain CSV:
//! - spectra: `wavelength_nm,intensity`, one row per detector column
//! - frames: one CSV row per detector row, no header record

use chrono::{DateTime, Utc};
use serde::Serialize;
use spectro_core::data::{Frame, FrameMetadata, Spectrum};
use spectro_driver_andor::SessionState;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Export failure.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Creating or writing the file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// CSV encoding or decoding.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// Header could not be turned into key/value pairs.
    #[error("metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),
    /// A data row that is not two numbers.
    #[error("malformed spectrum file: {0}")]
    Malformed(String),
}

/// Comment header written above the data.
#[derive(Debug, Clone, Serialize)]
pub struct ExportHeader {
    /// Name from the `[application]` table.
    pub application: String,
    /// Also the timestamp in the file name.
    pub exported_at: DateTime<Utc>,
    /// Centre wavelength at export time, in nm.
    pub centre_wavelength_nm: f64,
    /// Slit width at export time, in µm.
    pub slit_width_um: f64,
    /// Active grating, 1-based.
    pub grating: u32,
    /// Optics moves since the session opened.
    pub optics_generation: u64,
    /// False when the optics moved after the data was taken.
    pub calibration_current: bool,
    /// Metadata of the exported frame, when there is one.
    #[serde(flatten)]
    pub frame: Option<FrameMetadata>,
}

impl ExportHeader {
    /// Describe `state`, and `frame` if the data came from an acquisition.
    pub fn new(application: &str, state: &SessionState, frame: Option<&FrameMetadata>) -> Self {
        let calibration_generation = frame
            .map(|m| m.calibration_generation)
            .unwrap_or_else(|| state.calibration.generation());
        Self {
            application: application.to_string(),
            exported_at: Utc::now(),
            centre_wavelength_nm: state.centre_wavelength_nm,
            slit_width_um: state.slit_width_um,
            grating: state.grating,
            optics_generation: state.optics_generation,
            calibration_current: calibration_generation == state.optics_generation,
            frame: frame.cloned(),
        }
    }
}

/// Write `# key: value` lines, one per header field.
pub fn write_header<W: Write>(writer: &mut W, header: &ExportHeader) -> Result<(), ExportError> {
    if let serde_json::Value::Object(fields) = serde_json::to_value(header)? {
        for (key, value) in fields {
            match value {
                serde_json::Value::String(text) => writeln!(writer, "# {}: {}", key, text)?,
                serde_json::Value::Null => {}
                other => writeln!(writer, "# {}: {}", key, other)?,
            }
        }
    }
    Ok(())
}

/// Header plus `wavelength_nm,intensity` rows.
pub fn write_spectrum<W: Write>(
    mut writer: W,
    header: &ExportHeader,
    spectrum: &Spectrum,
) -> Result<(), ExportError> {
    write_header(&mut writer, header)?;
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["wavelength_nm", "intensity"])?;
    for (wavelength, intensity) in spectrum.wavelengths_nm.iter().zip(&spectrum.intensities) {
        csv.write_record(&[wavelength.to_string(), intensity.to_string()])?;
    }
    csv.flush()?;
    Ok(())
}

/// Header plus one CSV row per detector row.
pub fn write_frame<W: Write>(
    mut writer: W,
    header: &ExportHeader,
    frame: &Frame,
) -> Result<(), ExportError> {
    write_header(&mut writer, header)?;
    let mut csv = csv::Writer::from_writer(writer);
    for row in 0..frame.height {
        if let Some(samples) = frame.row(row) {
            csv.write_record(samples.iter().map(|v| v.to_string()))?;
        }
    }
    csv.flush()?;
    Ok(())
}

/// Parse a file written by [`write_spectrum`], skipping the comment header.
pub fn read_spectrum<R: Read>(reader: R) -> Result<Spectrum, ExportError> {
    let mut csv = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_reader(reader);
    let mut spectrum = Spectrum {
        wavelengths_nm: Vec::new(),
        intensities: Vec::new(),
    };
    for record in csv.records() {
        let record = record?;
        let field = |i: usize| -> Result<f64, ExportError> {
            record
                .get(i)
                .ok_or_else(|| ExportError::Malformed(format!("missing column {}", i)))?
                .trim()
                .parse()
                .map_err(|e| ExportError::Malformed(format!("{}", e)))
        };
        spectrum.wavelengths_nm.push(field(0)?);
        spectrum.intensities.push(field(1)?);
    }
    Ok(spectrum)
}

/// `{dir}/{prefix}_{YYYYmmdd_HHMMSS}.csv`
pub fn timestamped_path(dir: &Path, prefix: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}_{}.csv", prefix, at.format("%Y%m%d_%H%M%S")))
}

/// Write a spectrum file under `dir`, creating it if needed.
pub fn save_spectrum(
    dir: &Path,
    header: &ExportHeader,
    spectrum: &Spectrum,
) -> Result<PathBuf, ExportError> {
    let path = create_in(dir, "spectrum", header.exported_at)?;
    write_spectrum(BufWriter::new(File::create(&path)?), header, spectrum)?;
    tracing::info!(path = %path.display(), points = spectrum.len(), "Spectrum exported");
    Ok(path)
}

/// Write a frame file under `dir`, creating it if needed.
pub fn save_frame(dir: &Path, header: &ExportHeader, frame: &Frame) -> Result<PathBuf, ExportError> {
    let path = create_in(dir, "frame", header.exported_at)?;
    write_frame(BufWriter::new(File::create(&path)?), header, frame)?;
    tracing::info!(path = %path.display(), width = frame.width, height = frame.height, "Frame exported");
    Ok(path)
}

fn create_in(dir: &Path, prefix: &str, at: DateTime<Utc>) -> Result<PathBuf, ExportError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(timestamped_path(dir, prefix, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use spectro_core::calibration::CalibrationTable;
    use spectro_core::geometry::{DetectorGeometry, RoiWindow};
    use spectro_core::mode::AcquisitionMode;
    use std::sync::Arc;

    fn state(optics_generation: u64) -> SessionState {
        let geometry = DetectorGeometry::new(4, 2, 16.0, 16.0, 16).unwrap();
        SessionState {
            open: true,
            geometry,
            mode: AcquisitionMode::FullImage,
            roi: RoiWindow::full(&geometry),
            exposure_s: 0.5,
            centre_wavelength_nm: 650.0,
            slit_width_um: 100.0,
            grating: 2,
            optics_generation,
            calibration: Arc::new(CalibrationTable::new(vec![649.0, 650.0, 651.0, 652.0], 3)),
        }
    }

    fn spectrum() -> Spectrum {
        Spectrum {
            wavelengths_nm: vec![649.0, 650.0, 651.0, 652.0],
            intensities: vec![10.0, 250.5, 40.0, 12.0],
        }
    }

    #[test]
    fn header_lines_are_comments() {
        let header = ExportHeader::new("Spectro DAQ", &state(3), None);
        let mut out = Vec::new();
        write_header(&mut out, &header).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.lines().all(|l| l.starts_with("# ")));
        assert!(text.contains("# application: Spectro DAQ\n"));
        assert!(text.contains("# grating: 2\n"));
        assert!(text.contains("# calibration_current: true\n"));
        assert!(!text.contains("sequence"));
    }

    #[test]
    fn stale_calibration_is_flagged() {
        let header = ExportHeader::new("Spectro DAQ", &state(5), None);
        assert!(!header.calibration_current);
    }

    #[test]
    fn spectrum_file_reads_back() {
        let header = ExportHeader::new("Spectro DAQ", &state(3), None);
        let mut out = Vec::new();
        write_spectrum(&mut out, &header, &spectrum()).unwrap();

        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.contains("wavelength_nm,intensity\n649,10\n650,250.5\n"));
        assert_eq!(read_spectrum(out.as_slice()).unwrap(), spectrum());
    }

    #[test]
    fn frame_rows_follow_header() {
        let frame = Frame::new(4, 2, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let metadata = FrameMetadata {
            sequence: 9,
            mode: AcquisitionMode::FullImage,
            roi: RoiWindow::new(1, 4, 1, 2, 4, 2).unwrap(),
            exposure_s: 0.5,
            calibration_generation: 3,
            acquired_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        };
        let header = ExportHeader::new("Spectro DAQ", &state(3), Some(&metadata));
        let mut out = Vec::new();
        write_frame(&mut out, &header, &frame).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("# sequence: 9\n"));
        let data: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(data, vec!["1,2,3,4", "5,6,7,8"]);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        let input = "# application: x\nwavelength_nm,intensity\n650,abc\n";
        assert!(matches!(
            read_spectrum(input.as_bytes()),
            Err(ExportError::Malformed(_))
        ));
    }

    #[test]
    fn save_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("runs");
        let header = ExportHeader::new("Spectro DAQ", &state(3), None);

        let path = save_spectrum(&target, &header, &spectrum()).unwrap();

        assert!(path.starts_with(&target));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("spectrum_") && n.ends_with(".csv")));
        let file = File::open(&path).unwrap();
        assert_eq!(read_spectrum(file).unwrap().len(), 4);
    }
}
