//! Capability traits shared by instrument front-ends.

use anyhow::Result;
use async_trait::async_trait;

/// Exposure/integration time control.
///
/// # Contract
/// - Exposure is in seconds
/// - Setting exposure does not start acquisition
/// - Exposure applies to the next acquisition
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set exposure time in seconds.
    async fn set_exposure(&self, seconds: f64) -> Result<()>;

    /// Current exposure time in seconds.
    async fn get_exposure(&self) -> Result<f64>;
}
