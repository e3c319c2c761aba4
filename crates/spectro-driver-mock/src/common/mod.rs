//! Common infrastructure for the simulated devices.
//!
//! - **faults**: SDK error-code injection
//! - **rng**: seeded random number generator

pub mod faults;
pub mod rng;

pub use faults::{FaultPlan, FaultScenario};
pub use rng::MockRng;
