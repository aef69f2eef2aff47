//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Duplex device access with blocking chunk I/O ([`channel`])
//! - Phase-continuous sine generation on a background task ([`generator`])
//! - Windowed FFT frequency and phase analysis ([`spectrum`])
//! - Multi-chunk calibrated RMS estimation ([`rms`])

pub mod channel;
pub mod generator;
pub mod rms;
pub mod spectrum;
