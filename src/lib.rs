//! Spectro DAQ
//!
//! Application layer over the spectrometer workspace crates:
//! - [`config`]: figment-based configuration (TOML file + `SPECTRO_` environment)
//! - [`logging`]: tracing subscriber setup
//! - [`export`]: CSV files for spectra and frames
//! - [`simulation`]: sessions on simulated devices
//!
//! Session semantics live in `spectro-driver-andor`; device traits and data
//! types in `spectro-core`.

pub mod config;
pub mod export;
pub mod logging;
pub mod simulation;

pub use spectro_core::calibration::{CalibrationTable, InvalidRange};
pub use spectro_core::data::{AcquisitionResult, Frame, Spectrum};
pub use spectro_core::error::{SpectroError, SpectroResult};
pub use spectro_driver_andor::{AndorSpectrometer, SessionState, SpectrometerSettings};
