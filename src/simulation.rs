//! Sessions on simulated devices.
//!
//! The command-line tool has no vendor SDK to talk to, so it drives the mock
//! detector and spectrograph configured under `[simulation]`.

use crate::config::SpectrometerConfig;
use anyhow::{Context, Result};
use spectro_driver_andor::AndorSpectrometer;
use spectro_driver_mock::{MockDetector, MockSpectrograph};

/// Build the simulated devices described by `config.simulation`.
pub fn devices(config: &SpectrometerConfig) -> Result<(MockDetector, MockSpectrograph)> {
    let detector = MockDetector::from_toml(config.simulation.detector.clone())
        .context("invalid [simulation.detector] table")?;
    let spectrograph = MockSpectrograph::from_toml(config.simulation.spectrograph.clone())
        .context("invalid [simulation.spectrograph] table")?;
    Ok((detector, spectrograph))
}

/// Open a session on simulated devices with the configured settings.
pub async fn open(config: &SpectrometerConfig) -> Result<AndorSpectrometer> {
    let (detector, spectrograph) = devices(config)?;
    tracing::warn!("Using simulated detector and spectrograph");
    AndorSpectrometer::open_with(detector, spectrograph, config.settings())
        .await
        .context("failed to open spectrometer session")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn configured_geometry_reaches_the_session() {
        let mut config = SpectrometerConfig::default();
        config.session.settle_delay_ms = 0;
        config.simulation.detector = "width = 256\nheight = 128".parse::<toml::Table>().unwrap().into();

        let session = open(&config).await.unwrap();
        let geometry = session.geometry();
        assert_eq!((geometry.width, geometry.height), (256, 128));
        assert_eq!(session.wavelength_axis().len(), 256);
        session.close().await;
    }

    #[test]
    fn bad_simulation_table_is_reported() {
        let mut config = SpectrometerConfig::default();
        config.simulation.detector = "width = \"wide\"".parse::<toml::Table>().unwrap().into();
        let err = devices(&config).unwrap_err();
        assert!(err.to_string().contains("simulation.detector"));
    }
}
