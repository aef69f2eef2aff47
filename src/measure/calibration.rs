//! Calibration factor and known reference resistance
//!
//! Edits arrive as user text. Anything that does not parse or falls outside
//! the valid range is rejected and the previous value stays in place.

use thiserror::Error;

/// Volts corresponding to a full-scale input sample, at startup
pub const DEFAULT_CALIBRATION_FACTOR: f64 = 0.1;

/// Reference resistor at startup (ohms)
pub const DEFAULT_KNOWN_RESISTOR: f64 = 1000.0;

/// Smallest accepted reference resistor (ohms)
pub const MIN_KNOWN_RESISTOR: f64 = 1.0;

/// Largest accepted reference resistor (ohms)
pub const MAX_KNOWN_RESISTOR: f64 = 1_000_000.0;

/// Rejected calibration edits
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Not a number: {0:?}")]
    NotANumber(String),

    #[error("Calibration factor must be a positive number, got {0}")]
    InvalidCalibrationFactor(f64),

    #[error("Known resistor must be between {min} and {max} Ω, got {0}", min = MIN_KNOWN_RESISTOR, max = MAX_KNOWN_RESISTOR)]
    KnownResistorOutOfRange(f64),
}

/// Digital-to-volts scale and reference resistance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationModel {
    calibration_factor: f64,
    known_resistor: f64,
}

impl CalibrationModel {
    /// Create a validated model
    pub fn new(calibration_factor: f64, known_resistor: f64) -> Result<Self, CalibrationError> {
        let mut model = Self::default();
        model.set_calibration_factor(calibration_factor)?;
        model.set_known_resistor(known_resistor)?;
        Ok(model)
    }

    /// Volts per full-scale sample
    pub fn calibration_factor(&self) -> f64 {
        self.calibration_factor
    }

    /// Reference resistance in ohms
    pub fn known_resistor(&self) -> f64 {
        self.known_resistor
    }

    pub fn set_calibration_factor(&mut self, value: f64) -> Result<(), CalibrationError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(CalibrationError::InvalidCalibrationFactor(value));
        }
        self.calibration_factor = value;
        Ok(())
    }

    pub fn set_known_resistor(&mut self, ohms: f64) -> Result<(), CalibrationError> {
        if !ohms.is_finite() || !(MIN_KNOWN_RESISTOR..=MAX_KNOWN_RESISTOR).contains(&ohms) {
            return Err(CalibrationError::KnownResistorOutOfRange(ohms));
        }
        self.known_resistor = ohms;
        Ok(())
    }

    /// Apply a text edit of the calibration factor
    ///
    /// # Returns
    /// The accepted value; on error the prior value is retained
    pub fn edit_calibration_factor(&mut self, text: &str) -> Result<f64, CalibrationError> {
        let value = parse_number(text)?;
        self.set_calibration_factor(value)?;
        tracing::info!("Calibration factor updated to: {}", value);
        Ok(value)
    }

    /// Apply a text edit of the known resistor
    ///
    /// # Returns
    /// The accepted value; on error the prior value is retained
    pub fn edit_known_resistor(&mut self, text: &str) -> Result<f64, CalibrationError> {
        let value = parse_number(text)?;
        self.set_known_resistor(value)?;
        tracing::info!("Known resistor updated to: {} Ω", value);
        Ok(value)
    }
}

impl Default for CalibrationModel {
    fn default() -> Self {
        Self {
            calibration_factor: DEFAULT_CALIBRATION_FACTOR,
            known_resistor: DEFAULT_KNOWN_RESISTOR,
        }
    }
}

fn parse_number(text: &str) -> Result<f64, CalibrationError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| CalibrationError::NotANumber(text.to_string()))
}
