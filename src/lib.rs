//! LCR Meter - sound-card component measurement engine
//!
//! Measures an unknown resistor, capacitor or inductor by driving a sine tone
//! through a known reference resistor and sampling the resulting voltages
//! with a sound-card input. Provides:
//! - Duplex audio channel with blocking chunk I/O ([`audio::channel`])
//! - Continuous sine generation ([`audio::generator`])
//! - FFT frequency and phase extraction ([`audio::spectrum`])
//! - Calibrated RMS voltage estimation ([`audio::rms`])
//! - Component formulas and the guided measurement state machine ([`measure`])

pub mod audio;
pub mod config;
pub mod engine;
pub mod measure;

pub use audio::{
    channel::{AudioConfig, AudioInput, AudioOutput, CpalChannel},
    generator::SignalGenerator,
    rms::RmsEstimator,
    spectrum::SpectralAnalyzer,
};
pub use config::AppConfig;
pub use engine::{Engine, EngineContext, EngineEvent};
pub use measure::{calibration::CalibrationModel, orchestrator::Orchestrator};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sample rate for audio processing (consumer sound cards)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default number of samples per chunk read from or written to the device
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Magnitude of a full-scale signed 16-bit sample
pub const FULL_SCALE: f64 = 32767.0;
