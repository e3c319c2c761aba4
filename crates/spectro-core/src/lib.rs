//! `spectro-core`
//!
//! Core types and traits for coordinating a CCD detector and a spectrograph.
//!
//! ## Modules
//!
//! - [`device`]: command surface of the two devices (`Detector`, `Spectrograph`)
//! - [`geometry`]: detector geometry and ROI arithmetic for the three read-out modes
//! - [`calibration`]: wavelength axis of the detector columns
//! - [`mode`]: the active read-out geometry
//! - [`data`]: frames, spectra and the acquisition outcome taxonomy
//! - [`error`]: `DeviceFault` and `SpectroError`
//! - [`capabilities`]: capability traits implemented by instrument front-ends

pub mod calibration;
pub mod capabilities;
pub mod data;
pub mod device;
pub mod error;
pub mod geometry;
pub mod mode;

pub use calibration::{CalibrationTable, InvalidRange};
pub use data::{AcquiredFrame, AcquisitionResult, Frame, FrameMetadata, Spectrum};
pub use device::{Detector, Spectrograph};
pub use error::{DeviceFault, DeviceKind, DeviceResult, SpectroError, SpectroResult};
pub use geometry::{DetectorGeometry, RoiWindow, TrackWindow};
pub use mode::AcquisitionMode;
