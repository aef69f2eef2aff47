//! Application configuration
//!
//! Device selection, stream parameters, calibration and generator defaults
//! read from a JSON file given with `--config`. Every field is optional;
//! missing fields take their defaults. The file is never written back.

use crate::audio::channel::AudioConfig;
use crate::audio::generator::{DEFAULT_AMPLITUDE, DEFAULT_FREQUENCY_HZ};
use crate::measure::calibration::{
    CalibrationError, CalibrationModel, DEFAULT_CALIBRATION_FACTOR, DEFAULT_KNOWN_RESISTOR,
};
use crate::measure::session::SweepConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_chunk_size() -> usize {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_calibration_factor() -> f64 {
    DEFAULT_CALIBRATION_FACTOR
}

fn default_known_resistor() -> f64 {
    DEFAULT_KNOWN_RESISTOR
}

fn default_signal_frequency() -> f64 {
    DEFAULT_FREQUENCY_HZ
}

fn default_signal_amplitude() -> f64 {
    DEFAULT_AMPLITUDE
}

fn default_sweep_low_hz() -> f64 {
    200.0
}

fn default_sweep_high_hz() -> f64 {
    2000.0
}

fn default_live_poll_ms() -> u64 {
    100
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Input device name (None = host default)
    #[serde(default)]
    pub input_device: Option<String>,
    /// Output device name (None = host default)
    #[serde(default)]
    pub output_device: Option<String>,
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Samples per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Volts represented by a full-scale sample
    #[serde(default = "default_calibration_factor")]
    pub calibration_factor: f64,
    /// Reference resistor in ohms
    #[serde(default = "default_known_resistor")]
    pub known_resistor: f64,
    /// Initial generator frequency in Hz
    #[serde(default = "default_signal_frequency")]
    pub signal_frequency: f64,
    /// Initial generator amplitude
    #[serde(default = "default_signal_amplitude")]
    pub signal_amplitude: f64,
    #[serde(default = "default_sweep_low_hz")]
    pub sweep_low_hz: f64,
    #[serde(default = "default_sweep_high_hz")]
    pub sweep_high_hz: f64,
    /// Live readout period in milliseconds
    #[serde(default = "default_live_poll_ms")]
    pub live_poll_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: default_sample_rate(),
            chunk_size: default_chunk_size(),
            calibration_factor: default_calibration_factor(),
            known_resistor: default_known_resistor(),
            signal_frequency: default_signal_frequency(),
            signal_amplitude: default_signal_amplitude(),
            sweep_low_hz: default_sweep_low_hz(),
            sweep_high_hz: default_sweep_high_hz(),
            live_poll_ms: default_live_poll_ms(),
        }
    }
}

impl AppConfig {
    /// Load config from `path`, falling back to defaults on any error
    ///
    /// With no path the defaults are used as-is.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            tracing::info!("No config file given, using defaults");
            return Self::default();
        };

        match Self::load_from(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config from disk");
                config
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Load and parse config from `path`
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(config)
    }

    /// Reject stream settings no device can run with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.sample_rate > 0, "sample_rate must be positive");
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        Ok(())
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig::new(self.sample_rate, self.chunk_size)
    }

    /// Validated calibration model
    pub fn calibration(&self) -> Result<CalibrationModel, CalibrationError> {
        CalibrationModel::new(self.calibration_factor, self.known_resistor)
    }

    pub fn sweep(&self) -> SweepConfig {
        SweepConfig {
            f_low: self.sweep_low_hz,
            f_high: self.sweep_high_hz,
            ..SweepConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.input_device, None);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.calibration_factor, 0.1);
        assert_eq!(config.known_resistor, 1000.0);
        assert_eq!(config.live_poll_ms, 100);
    }

    #[test]
    fn test_zero_stream_settings_rejected() {
        assert!(AppConfig::default().validate().is_ok());

        let config = AppConfig {
            chunk_size: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            sample_rate: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"input_device": "USB Audio", "known_resistor": 220.0}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.input_device, Some("USB Audio".to_string()));
        assert_eq!(config.known_resistor, 220.0);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.sweep_high_hz, 2000.0);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_derived_configs() {
        let config = AppConfig {
            sample_rate: 48000,
            chunk_size: 512,
            sweep_low_hz: 100.0,
            ..AppConfig::default()
        };
        assert_eq!(config.audio_config(), AudioConfig::new(48000, 512));
        assert_eq!(config.sweep().f_low, 100.0);
        assert_eq!(config.sweep().reset_hz, 1000.0);
        assert!(config.calibration().is_ok());
    }

    #[test]
    fn test_invalid_calibration_rejected() {
        let config = AppConfig {
            known_resistor: 0.0,
            ..AppConfig::default()
        };
        assert!(config.calibration().is_err());
    }

    #[test]
    fn test_load_without_path_is_default() {
        assert_eq!(AppConfig::load(None), AppConfig::default());
    }
}
