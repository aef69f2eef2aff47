//! Component measurement
//!
//! - Calibration factor and reference resistor ([`calibration`])
//! - Component-value formulas and type classification ([`formulas`])
//! - Modes, states and captured readings ([`session`])
//! - Guided multi-step measurement state machine ([`orchestrator`])

pub mod calibration;
pub mod formulas;
pub mod orchestrator;
pub mod session;
