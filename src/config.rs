//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/spectrometer.toml` (base configuration)
//! 2. Environment variables prefixed with `SPECTRO_`, nested with `__`
//!
//! Every table is optional; missing keys fall back to the driver defaults.
//!
//! # Example
//! ```no_run
//! use spectro_daq::config::SpectrometerConfig;
//!
//! // SPECTRO_OPTICS__TRACK_DISCARD_ROWS=0 overrides optics.track_discard_rows
//! let config = SpectrometerConfig::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), spectro_daq::config::ConfigError>(())
//! ```

use crate::logging::{parse_log_level, OutputFormat};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use spectro_driver_andor::{
    AcquisitionSettings, OpticsSettings, SessionSettings, SpectrometerSettings,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/spectrometer.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SPECTRO_";

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    /// Parsed, but a value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrometerConfig {
    /// Name and logging.
    pub application: ApplicationConfig,
    /// Detector setup applied at open.
    pub session: SessionSettings,
    /// Slit and track geometry.
    pub optics: OpticsSettings,
    /// Status polling.
    pub acquisition: AcquisitionSettings,
    /// Simulated devices.
    pub simulation: SimulationConfig,
    /// CSV output.
    pub export: ExportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Shown in logs and export headers.
    pub name: String,
    /// trace, debug, info, warn or error
    pub log_level: String,
    /// Line format.
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Spectro DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Simulated devices used by the command-line tool.
///
/// The tables are handed to the mock devices as-is, so they accept whatever
/// `MockDetectorConfig` and `MockSpectrographConfig` accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// `MockDetectorConfig` table.
    pub detector: toml::Value,
    /// `MockSpectrographConfig` table.
    pub spectrograph: toml::Value,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            detector: toml::Value::Table(toml::map::Map::new()),
            spectrograph: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

/// Where exported files go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Default directory for exported files.
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
        }
    }
}

impl SpectrometerConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_log_level(&self.application.log_level)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.settings()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !self.simulation.detector.is_table() || !self.simulation.spectrograph.is_table() {
            return Err(ConfigError::Invalid(
                "simulation.detector and simulation.spectrograph must be tables".to_string(),
            ));
        }
        Ok(())
    }

    /// The part of the configuration the session needs.
    pub fn settings(&self) -> SpectrometerSettings {
        SpectrometerSettings {
            session: self.session.clone(),
            optics: self.optics.clone(),
            acquisition: self.acquisition.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_missing_file_gives_defaults() {
        let config = SpectrometerConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, SpectrometerConfig::default());
        assert_eq!(config.optics.slit_margin_low_px, 47);
        assert_eq!(config.session.settle_delay_ms, 2000);
    }

    #[test]
    #[serial]
    fn test_partial_tables_keep_defaults() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"
            log_format = "json"

            [session]
            cooler_enabled = true

            [optics]
            track_discard_rows = 0

            [simulation.detector]
            width = 1024
            "#,
        );

        let config = SpectrometerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert!(config.session.cooler_enabled);
        assert_eq!(config.session.target_temperature_c, -60);
        assert_eq!(config.optics.track_discard_rows, 0);
        assert_eq!(config.optics.minimum_track_rows, 5);
        assert_eq!(
            config.simulation.detector.get("width").and_then(|v| v.as_integer()),
            Some(1024)
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[acquisition]\npoll_interval_ms = 20\n");
        std::env::set_var("SPECTRO_ACQUISITION__POLL_INTERVAL_MS", "5");
        std::env::set_var("SPECTRO_APPLICATION__NAME", "bench rig");

        let result = SpectrometerConfig::load_from(file.path());

        std::env::remove_var("SPECTRO_ACQUISITION__POLL_INTERVAL_MS");
        std::env::remove_var("SPECTRO_APPLICATION__NAME");
        let config = result.unwrap();
        assert_eq!(config.acquisition.poll_interval_ms, 5);
        assert_eq!(config.application.name, "bench rig");
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        let file = write_config("[optics]\nminimum_track_rows = 0\n");
        assert!(matches!(
            SpectrometerConfig::load_from(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let file = write_config("[application]\nlog_level = \"loud\"\n");
        assert!(matches!(
            SpectrometerConfig::load_from(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    #[serial]
    fn test_malformed_file_is_a_load_error() {
        let file = write_config("[session]\nsettle_delay_ms = \"soon\"\n");
        assert!(matches!(
            SpectrometerConfig::load_from(file.path()),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_settings_carry_driver_tables() {
        let mut config = SpectrometerConfig::default();
        config.optics.zero_order_nm = 1.5;
        let settings = config.settings();
        assert_eq!(settings.optics.zero_order_nm, 1.5);
        assert_eq!(settings.acquisition, AcquisitionSettings::default());
    }
}
