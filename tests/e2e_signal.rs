//! E2E tests for the signal path: generator -> loopback -> live readout
//!
//! The generator's output is wired straight back into the engine's input, so
//! the live readout must see the tone the generator is currently producing.

use lcrmeter::audio::channel::{
    AudioChannelError, AudioConfig, AudioInput, AudioOutput, SharedOutput,
};
use lcrmeter::audio::generator::{SignalGenerator, SineOscillator, DEFAULT_AMPLITUDE};
use lcrmeter::audio::spectrum::SpectralAnalyzer;
use lcrmeter::engine::Engine;
use lcrmeter::measure::calibration::CalibrationModel;
use lcrmeter::measure::session::SweepConfig;
use std::f64::consts::SQRT_2;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Most recent chunk written by the generator
type Wire = Arc<Mutex<Option<Vec<i16>>>>;

struct LoopbackOutput {
    wire: Wire,
}

impl AudioOutput for LoopbackOutput {
    fn write_chunk(&mut self, samples: &[i16]) -> Result<(), AudioChannelError> {
        *self.wire.lock().unwrap() = Some(samples.to_vec());
        Ok(())
    }
}

struct LoopbackInput {
    wire: Wire,
}

impl AudioInput for LoopbackInput {
    fn read_chunk(&mut self) -> Result<Vec<i16>, AudioChannelError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(chunk) = self.wire.lock().unwrap().take() {
                return Ok(chunk);
            }
            if Instant::now() > deadline {
                return Err(AudioChannelError::Disconnected);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

fn loopback_engine() -> Engine {
    let wire: Wire = Arc::new(Mutex::new(None));
    Engine::new(
        AudioConfig::default(),
        Box::new(LoopbackInput {
            wire: Arc::clone(&wire),
        }),
        Box::new(LoopbackOutput { wire }),
        CalibrationModel::default(),
        SweepConfig::default(),
    )
}

#[test]
fn test_live_readout_sees_generator_tone() {
    let mut engine = loopback_engine();
    engine.start_generator().unwrap();

    let reading = engine.live_reading().unwrap().expect("input is free");
    let bin = SpectralAnalyzer::new(44100).bin_width(1024);
    assert!(
        (reading.frequency - 1000.0).abs() <= bin,
        "expected 1000 Hz, got {}",
        reading.frequency
    );

    let expected_volts = DEFAULT_AMPLITUDE * 0.1 / SQRT_2;
    assert!(
        (reading.voltage_rms - expected_volts).abs() / expected_volts < 0.05,
        "expected {} V, got {}",
        expected_volts,
        reading.voltage_rms
    );
    engine.shutdown();
}

#[test]
fn test_frequency_step_reaches_readout() {
    let mut engine = loopback_engine();
    engine.start_generator().unwrap();

    assert_eq!(engine.step_frequency(true), 1100.0);
    assert_eq!(engine.step_frequency(true), 1200.0);
    assert_eq!(engine.step_frequency(false), 1100.0);

    let bin = SpectralAnalyzer::new(44100).bin_width(1024);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let reading = engine.live_reading().unwrap().unwrap();
        if (reading.frequency - 1100.0).abs() <= bin {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "readout stuck at {} Hz",
            reading.frequency
        );
    }
    engine.shutdown();
}

#[test]
fn test_amplitude_steps_clamped() {
    let engine = loopback_engine();
    assert!((engine.step_amplitude(true) - 1.0).abs() < 1e-9);
    assert!((engine.step_amplitude(true) - 1.0).abs() < 1e-9);
    for _ in 0..20 {
        engine.step_amplitude(false);
    }
    assert!((engine.generator_state().amplitude - 0.1).abs() < 1e-9);
}

#[test]
fn test_toggle_generator() {
    let mut engine = loopback_engine();
    assert!(engine.toggle_generator().unwrap());
    assert!(engine.generator_state().enabled);
    assert!(!engine.toggle_generator().unwrap());
    assert!(!engine.generator_state().enabled);
}

/// Output whose device never accepts the samples
struct StuckOutput;

impl AudioOutput for StuckOutput {
    fn write_chunk(&mut self, _samples: &[i16]) -> Result<(), AudioChannelError> {
        std::thread::sleep(Duration::from_secs(3));
        Ok(())
    }
}

#[test]
fn test_stop_is_bounded_when_output_stalls() {
    let config = AudioConfig::default();
    let output: SharedOutput = Arc::new(Mutex::new(Box::new(StuckOutput)));
    let mut generator = SignalGenerator::new(config, output);
    generator.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    generator.stop();
    assert!(!generator.is_enabled());
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "stop took {:?}",
        started.elapsed()
    );
}

#[test]
fn test_analyzer_phase_survives_chunked_capture() {
    // Phase of a tone assembled from generator-sized chunks matches one-shot synthesis
    let mut oscillator = SineOscillator::new(44100);
    let mut capture = Vec::new();
    let mut chunk = vec![0i16; 1024];
    while capture.len() < 22050 {
        oscillator.fill_chunk(&mut chunk, 1000.0, 0.8);
        capture.extend_from_slice(&chunk);
    }
    capture.truncate(22050);

    let mut one_shot = vec![0i16; 22050];
    SineOscillator::new(44100).fill_chunk(&mut one_shot, 1000.0, 0.8);

    let mut analyzer = SpectralAnalyzer::new(44100);
    let a = analyzer.phase_at(&capture, 1000.0);
    let b = analyzer.phase_at(&one_shot, 1000.0);
    assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
}
