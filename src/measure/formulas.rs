//! Component-value formulas and component-type classification
//!
//! The unknown component sits in series with the known resistor. `vin` is the
//! RMS voltage across the whole divider (the source), `vout` the RMS voltage
//! across the component alone.

use std::f64::consts::TAU;
use std::fmt;
use thiserror::Error;

/// Impedance ratio (max/min across the sweep) below which the part is a resistor
pub const RESISTOR_IMPEDANCE_RATIO: f64 = 2.0;

/// Phase shift magnitude (degrees) below which the part is a resistor
pub const RESISTOR_PHASE_BAND_DEG: f64 = 15.0;

/// Measurement data that no formula can turn into a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("Vout >= Vin (Vin={vin:.4} V, Vout={vout:.4} V)")]
    VoutNotBelowVin { vin: f64, vout: f64 },

    #[error("Formula domain error: {0}")]
    Domain(&'static str),

    #[error("Missing reading: {0}")]
    MissingReading(&'static str),
}

/// Passive component type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Resistor,
    Capacitor,
    Inductor,
}

impl ComponentKind {
    pub fn label(self) -> &'static str {
        match self {
            ComponentKind::Resistor => "Resistor",
            ComponentKind::Capacitor => "Capacitor",
            ComponentKind::Inductor => "Inductor",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn check_divider(vin: f64, vout: f64) -> Result<(), FormulaError> {
    if !vin.is_finite() || !vout.is_finite() {
        return Err(FormulaError::Domain("non-finite voltage"));
    }
    if vin <= vout {
        return Err(FormulaError::VoutNotBelowVin { vin, vout });
    }
    if vout < 0.0 {
        return Err(FormulaError::Domain("negative voltage"));
    }
    Ok(())
}

fn finite(value: f64, what: &'static str) -> Result<f64, FormulaError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FormulaError::Domain(what))
    }
}

/// Resistance in ohms: `R_known · vout / (vin − vout)`
pub fn resistance(vin: f64, vout: f64, r_known: f64) -> Result<f64, FormulaError> {
    check_divider(vin, vout)?;
    finite(r_known * vout / (vin - vout), "resistance")
}

/// Capacitance in farads: `1/(2πf) · 1/sqrt((vin/vout)² − 1) / R_known`
pub fn capacitance(vin: f64, vout: f64, r_known: f64, frequency: f64) -> Result<f64, FormulaError> {
    check_divider(vin, vout)?;
    if vout <= 0.0 {
        return Err(FormulaError::Domain("division by zero (Vout = 0)"));
    }
    if frequency <= 0.0 || r_known <= 0.0 {
        return Err(FormulaError::Domain("non-positive frequency or resistor"));
    }

    let ratio = vin / vout;
    let radicand = ratio * ratio - 1.0;
    if radicand <= 0.0 {
        return Err(FormulaError::Domain("negative radicand"));
    }

    finite((1.0 / (TAU * frequency)) * (1.0 / radicand.sqrt()) / r_known, "capacitance")
}

/// Inductance in henries: `(R_known/(2πf)) · sqrt(r² / (1 − r²))`, `r = vout/vin`
pub fn inductance(vin: f64, vout: f64, r_known: f64, frequency: f64) -> Result<f64, FormulaError> {
    check_divider(vin, vout)?;
    if frequency <= 0.0 {
        return Err(FormulaError::Domain("non-positive frequency"));
    }

    let ratio = vout / vin;
    let denom = 1.0 - ratio * ratio;
    if denom <= 0.0 {
        return Err(FormulaError::Domain("division by zero (ratio >= 1)"));
    }

    finite(
        (r_known / (TAU * frequency)) * (ratio * ratio / denom).sqrt(),
        "inductance",
    )
}

/// Apparent impedance magnitude in ohms: `R_known / sqrt((vin/vout)² − 1)`
pub fn impedance_magnitude(
    vin: Option<f64>,
    vout: Option<f64>,
    r_known: f64,
) -> Result<f64, FormulaError> {
    let vin = vin.ok_or(FormulaError::MissingReading("Vin"))?;
    let vout = vout.ok_or(FormulaError::MissingReading("Vout"))?;
    check_divider(vin, vout)?;
    if vout <= 0.0 {
        return Err(FormulaError::Domain("division by zero (Vout = 0)"));
    }

    let ratio = vin / vout;
    let radicand = ratio * ratio - 1.0;
    if radicand <= 0.0 {
        return Err(FormulaError::Domain("negative radicand"));
    }

    let z = r_known / radicand.sqrt();
    if !z.is_finite() || z <= 0.0 {
        return Err(FormulaError::Domain("non-positive impedance"));
    }
    Ok(z)
}

/// Classify from |Z| at the low and high sweep frequencies
///
/// Nearly flat impedance is a resistor; falling with frequency a capacitor;
/// rising an inductor.
pub fn classify_impedance_trend(z_low: f64, z_high: f64) -> ComponentKind {
    let ratio = z_low.max(z_high) / z_low.min(z_high);
    if ratio < RESISTOR_IMPEDANCE_RATIO {
        ComponentKind::Resistor
    } else if z_high < z_low {
        ComponentKind::Capacitor
    } else {
        ComponentKind::Inductor
    }
}

/// Classify from the phase difference `vout − vin` in degrees
///
/// `|diff| < 15°` is a resistor, a lagging component voltage a capacitor,
/// anything else an inductor.
pub fn classify_phase_shift(diff_deg: f64) -> ComponentKind {
    if diff_deg.abs() < RESISTOR_PHASE_BAND_DEG {
        ComponentKind::Resistor
    } else if diff_deg < -RESISTOR_PHASE_BAND_DEG {
        ComponentKind::Capacitor
    } else {
        ComponentKind::Inductor
    }
}
