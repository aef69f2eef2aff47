//! Measurement modes, session states, captured readings and outcomes

use crate::measure::formulas::ComponentKind;
use std::fmt;
use std::str::FromStr;

/// What the user wants to measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Resistance,
    Capacitance,
    Inductance,
    /// Detect the component type instead of measuring a value
    Auto,
}

/// Display strings for a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeInfo {
    pub label: &'static str,
    pub unit: &'static str,
    /// Suggested reference resistor
    pub recommendation: &'static str,
}

impl Mode {
    pub fn presentation(self) -> ModeInfo {
        match self {
            Mode::Resistance => ModeInfo {
                label: "Resistance",
                unit: "Ω",
                recommendation: "Recommended: ~1000 Ω",
            },
            Mode::Capacitance => ModeInfo {
                label: "Capacitance",
                unit: "µF",
                recommendation: "Recommended: 100 or 220 Ω for micro orders and larger for smaller orders.",
            },
            Mode::Inductance => ModeInfo {
                label: "Inductance",
                unit: "mH",
                recommendation: "Recommended: 10 or 100 Ω for milli orders.",
            },
            Mode::Auto => ModeInfo {
                label: "Auto Detect",
                unit: "---",
                recommendation: "Choose R_known based on expected component.",
            },
        }
    }

    /// Name of the part the probes go across in step 2
    pub fn component_name(self) -> &'static str {
        match self {
            Mode::Resistance => "resistor",
            Mode::Capacitance => "capacitor",
            Mode::Inductance => "inductor",
            Mode::Auto => "component",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "r" | "resistance" => Ok(Mode::Resistance),
            "c" | "capacitance" => Ok(Mode::Capacitance),
            "l" | "inductance" => Ok(Mode::Inductance),
            "auto" | "a" => Ok(Mode::Auto),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// How AUTO mode detects the component type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoMethod {
    /// Compare |Z| at a low and a high frequency
    #[default]
    FrequencySweep,
    /// Sign and size of the phase shift at the current frequency
    PhaseShift,
}

impl FromStr for AutoMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sweep" | "frequency" => Ok(AutoMethod::FrequencySweep),
            "phase" => Ok(AutoMethod::PhaseShift),
            other => Err(format!("unknown method: {other}")),
        }
    }
}

/// Measurement state machine states; `Idle` is initial and terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementState {
    #[default]
    Idle,
    WaitingForVinRms,
    WaitingForVoutRms,
    WaitingForVinPhase,
    WaitingForVoutPhase,
    AutoWaitingForVinLow,
    AutoWaitingForVoutLow,
    AutoWaitingForVinHigh,
    AutoWaitingForVoutHigh,
}

impl MeasurementState {
    pub fn is_idle(self) -> bool {
        self == MeasurementState::Idle
    }

    /// Whether the step captures a phase rather than an RMS voltage
    pub fn is_phase_step(self) -> bool {
        matches!(
            self,
            MeasurementState::WaitingForVinPhase | MeasurementState::WaitingForVoutPhase
        )
    }

    /// Whether the state belongs to the frequency-sweep flow
    pub fn is_sweep_step(self) -> bool {
        matches!(
            self,
            MeasurementState::AutoWaitingForVinLow
                | MeasurementState::AutoWaitingForVoutLow
                | MeasurementState::AutoWaitingForVinHigh
                | MeasurementState::AutoWaitingForVoutHigh
        )
    }
}

impl fmt::Display for MeasurementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementState::Idle => "IDLE",
            MeasurementState::WaitingForVinRms => "WAITING_FOR_VIN_RMS",
            MeasurementState::WaitingForVoutRms => "WAITING_FOR_VOUT_RMS",
            MeasurementState::WaitingForVinPhase => "WAITING_FOR_VIN_PHASE",
            MeasurementState::WaitingForVoutPhase => "WAITING_FOR_VOUT_PHASE",
            MeasurementState::AutoWaitingForVinLow => "AUTO_WAITING_FOR_VIN_LOW",
            MeasurementState::AutoWaitingForVoutLow => "AUTO_WAITING_FOR_VOUT_LOW",
            MeasurementState::AutoWaitingForVinHigh => "AUTO_WAITING_FOR_VIN_HIGH",
            MeasurementState::AutoWaitingForVoutHigh => "AUTO_WAITING_FOR_VOUT_HIGH",
        };
        f.write_str(name)
    }
}

/// Values captured so far in a session (volts or degrees)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    pub vin_rms: Option<f64>,
    pub vout_rms: Option<f64>,
    pub vin_phase: Option<f64>,
    pub vout_phase: Option<f64>,
    pub vin_low: Option<f64>,
    pub vout_low: Option<f64>,
    pub vin_high: Option<f64>,
    pub vout_high: Option<f64>,
}

/// Fixed frequencies of the AUTO frequency sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepConfig {
    pub f_low: f64,
    pub f_high: f64,
    /// Generator frequency restored when a sweep ends
    pub reset_hz: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            f_low: 200.0,
            f_high: 2000.0,
            reset_hz: crate::audio::generator::DEFAULT_FREQUENCY_HZ,
        }
    }
}

/// The one active measurement session
///
/// `mode` and `method` are user selections that survive a reset; `state`
/// and `readings` are cleared on every terminal outcome.
#[derive(Debug, Clone, Default)]
pub struct MeasurementSession {
    pub mode: Mode,
    pub method: AutoMethod,
    pub state: MeasurementState,
    pub readings: Readings,
    pub sweep: SweepConfig,
    /// Incremented each time a session leaves IDLE; stale task results carry an old id
    pub id: u64,
}

impl MeasurementSession {
    pub fn new(sweep: SweepConfig) -> Self {
        Self {
            sweep,
            ..Default::default()
        }
    }

    /// Begin a fresh session, clearing readings
    pub fn begin(&mut self, state: MeasurementState) {
        self.id += 1;
        self.readings = Readings::default();
        self.state = state;
    }

    /// Return to IDLE and clear all captured readings
    pub fn reset(&mut self) {
        self.state = MeasurementState::Idle;
        self.readings = Readings::default();
    }
}

/// Unit a value is reported in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Ohms,
    Microfarads,
    Millihenries,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Ohms => "Ω",
            Unit::Microfarads => "µF",
            Unit::Millihenries => "mH",
        }
    }

    /// Multiplier from the SI base unit
    pub fn scale(self) -> f64 {
        match self {
            Unit::Ohms => 1.0,
            Unit::Microfarads => 1e6,
            Unit::Millihenries => 1e3,
        }
    }

    fn decimals(self) -> usize {
        match self {
            Unit::Ohms => 2,
            Unit::Microfarads | Unit::Millihenries => 4,
        }
    }
}

/// Final result of a session
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementOutcome {
    /// Component value; `value` is already scaled to `unit`
    Value { value: f64, unit: Unit },
    /// Component type from AUTO mode
    Component { kind: ComponentKind, detail: String },
    /// Operator-error condition; no value
    Failed { reason: String },
}

impl MeasurementOutcome {
    /// Build a value outcome from an SI quantity
    pub fn value(si: f64, unit: Unit) -> Self {
        MeasurementOutcome::Value {
            value: si * unit.scale(),
            unit,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        MeasurementOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, MeasurementOutcome::Failed { .. })
    }

    /// Status line shown once the session has ended
    pub fn status_text(&self) -> String {
        match self {
            MeasurementOutcome::Value { .. } => "Measurement Complete!".to_string(),
            MeasurementOutcome::Component { detail, .. } => format!("Detection Complete! {detail}"),
            MeasurementOutcome::Failed { reason } => format!("Error: {reason}"),
        }
    }
}

impl fmt::Display for MeasurementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementOutcome::Value { value, unit } => {
                write!(f, "{:.*} {}", unit.decimals(), value, unit.symbol())
            }
            MeasurementOutcome::Component { kind, .. } => write!(f, "{kind}"),
            MeasurementOutcome::Failed { .. } => f.write_str("ERR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_presentation() {
        let info = Mode::Resistance.presentation();
        assert_eq!(info.label, "Resistance");
        assert_eq!(info.unit, "Ω");
        assert_eq!(Mode::Capacitance.presentation().unit, "µF");
        assert_eq!(Mode::Inductance.presentation().unit, "mH");
        assert_eq!(Mode::Auto.presentation().label, "Auto Detect");
        assert!(Mode::Inductance
            .presentation()
            .recommendation
            .contains("10 or 100 Ω"));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("R".parse::<Mode>(), Ok(Mode::Resistance));
        assert_eq!("c".parse::<Mode>(), Ok(Mode::Capacitance));
        assert_eq!(" l ".parse::<Mode>(), Ok(Mode::Inductance));
        assert_eq!("AUTO".parse::<Mode>(), Ok(Mode::Auto));
        assert!("x".parse::<Mode>().is_err());
        assert_eq!("phase".parse::<AutoMethod>(), Ok(AutoMethod::PhaseShift));
    }

    #[test]
    fn test_session_reset_clears_readings_keeps_mode() {
        let mut session = MeasurementSession::new(SweepConfig::default());
        session.mode = Mode::Capacitance;
        session.begin(MeasurementState::WaitingForVinRms);
        session.readings.vin_rms = Some(0.5);
        assert_eq!(session.id, 1);

        session.reset();
        assert!(session.state.is_idle());
        assert_eq!(session.readings, Readings::default());
        assert_eq!(session.mode, Mode::Capacitance);
    }

    #[test]
    fn test_outcome_formatting() {
        let r = MeasurementOutcome::value(1000.0, Unit::Ohms);
        assert_eq!(r.to_string(), "1000.00 Ω");

        let c = MeasurementOutcome::value(3.2487e-8, Unit::Microfarads);
        assert_eq!(c.to_string(), "0.0325 µF");

        let l = MeasurementOutcome::value(0.0125, Unit::Millihenries);
        assert_eq!(l.to_string(), "12.5000 mH");

        let failed = MeasurementOutcome::failed("Vout>=Vin");
        assert_eq!(failed.to_string(), "ERR");
        assert!(failed.is_failure());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MeasurementState::Idle.to_string(), "IDLE");
        assert_eq!(
            MeasurementState::AutoWaitingForVoutHigh.to_string(),
            "AUTO_WAITING_FOR_VOUT_HIGH"
        );
        assert!(MeasurementState::WaitingForVoutPhase.is_phase_step());
        assert!(MeasurementState::AutoWaitingForVinLow.is_sweep_step());
    }
}
