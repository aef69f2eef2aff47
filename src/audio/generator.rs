//! Continuous sine tone generation on a background task
//!
//! The generator task repeatedly renders one chunk at the current frequency
//! and amplitude and writes it to the output channel. Frequency and amplitude
//! live in atomics so edits take effect on the next rendered chunk without
//! stopping the task.
//!
//! Phase is carried across chunks by [`SineOscillator`], so the tone has no
//! discontinuity at chunk boundaries regardless of the frequency chosen.

use crate::audio::channel::{AudioConfig, SharedOutput};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Lowest selectable tone frequency (Hz)
pub const MIN_FREQUENCY_HZ: f64 = 20.0;

/// Highest selectable tone frequency (Hz)
pub const MAX_FREQUENCY_HZ: f64 = 20000.0;

/// Lowest selectable amplitude (fraction of full scale)
pub const MIN_AMPLITUDE: f64 = 0.1;

/// Highest selectable amplitude (fraction of full scale)
pub const MAX_AMPLITUDE: f64 = 1.0;

/// Tone frequency at startup and after a frequency sweep (Hz)
pub const DEFAULT_FREQUENCY_HZ: f64 = 1000.0;

/// Amplitude at startup
pub const DEFAULT_AMPLITUDE: f64 = 0.9;

/// Pause between chunk writes; the device buffer provides the real back-pressure
const WRITE_PACING: Duration = Duration::from_millis(10);

/// Longest wait for the task to exit on `stop()`
const STOP_TIMEOUT: Duration = Duration::from_millis(250);

/// Errors raised when starting the generator
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Failed to spawn generator task: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Snapshot of the generator controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalGeneratorState {
    pub enabled: bool,
    /// Tone frequency in Hz
    pub frequency: f64,
    /// Amplitude as a fraction of full scale
    pub amplitude: f64,
}

/// Phase-accumulating sine oscillator producing i16 samples
#[derive(Debug, Clone)]
pub struct SineOscillator {
    sample_rate: f64,
    /// Current phase in radians, kept in [0, 2π)
    phase: f64,
}

impl SineOscillator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            phase: 0.0,
        }
    }

    /// Fill `out` with the next samples of the tone
    ///
    /// # Arguments
    /// * `out` - Buffer to fill
    /// * `frequency` - Tone frequency in Hz
    /// * `amplitude` - Fraction of full scale (0.0 to 1.0)
    pub fn fill_chunk(&mut self, out: &mut [i16], frequency: f64, amplitude: f64) {
        let step = TAU * frequency / self.sample_rate;
        let scale = amplitude.clamp(0.0, 1.0) * crate::FULL_SCALE;

        for sample in out.iter_mut() {
            *sample = (self.phase.sin() * scale).round() as i16;
            self.phase = (self.phase + step) % TAU;
        }
    }

    /// Get the current phase in radians
    pub fn phase(&self) -> f64 {
        self.phase
    }
}

/// Controls shared with the generator task
#[derive(Debug)]
struct ToneParams {
    frequency_bits: AtomicU64,
    amplitude_bits: AtomicU64,
}

impl ToneParams {
    fn new(frequency: f64, amplitude: f64) -> Self {
        Self {
            frequency_bits: AtomicU64::new(frequency.to_bits()),
            amplitude_bits: AtomicU64::new(amplitude.to_bits()),
        }
    }

    fn frequency(&self) -> f64 {
        f64::from_bits(self.frequency_bits.load(Ordering::Relaxed))
    }

    fn amplitude(&self) -> f64 {
        f64::from_bits(self.amplitude_bits.load(Ordering::Relaxed))
    }

    fn set_frequency(&self, hz: f64) {
        self.frequency_bits.store(hz.to_bits(), Ordering::Relaxed);
    }

    fn set_amplitude(&self, amplitude: f64) {
        self.amplitude_bits.store(amplitude.to_bits(), Ordering::Relaxed);
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done_rx: Receiver<()>,
}

/// Background sine generator; sole writer to the output channel while running
pub struct SignalGenerator {
    config: AudioConfig,
    output: SharedOutput,
    params: Arc<ToneParams>,
    /// Stop token shared with the task
    running: Option<Arc<AtomicBool>>,
    worker: Option<Worker>,
}

impl SignalGenerator {
    /// Create a stopped generator at the default frequency and amplitude
    pub fn new(config: AudioConfig, output: SharedOutput) -> Self {
        Self {
            config,
            output,
            params: Arc::new(ToneParams::new(DEFAULT_FREQUENCY_HZ, DEFAULT_AMPLITUDE)),
            running: None,
            worker: None,
        }
    }

    /// Whether the generator task is running
    pub fn is_enabled(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| r.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Get the current tone frequency in Hz
    pub fn frequency(&self) -> f64 {
        self.params.frequency()
    }

    /// Get the current amplitude
    pub fn amplitude(&self) -> f64 {
        self.params.amplitude()
    }

    pub fn state(&self) -> SignalGeneratorState {
        SignalGeneratorState {
            enabled: self.is_enabled(),
            frequency: self.frequency(),
            amplitude: self.amplitude(),
        }
    }

    /// Set the tone frequency, clamped to [20, 20000] Hz
    ///
    /// # Returns
    /// The frequency actually applied
    pub fn set_frequency(&self, hz: f64) -> f64 {
        let hz = if hz.is_finite() { hz } else { DEFAULT_FREQUENCY_HZ };
        let applied = hz.clamp(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ);
        self.params.set_frequency(applied);
        tracing::debug!("Generator frequency set to {} Hz", applied);
        applied
    }

    /// Shift the tone frequency by `delta` Hz (clamped)
    pub fn adjust_frequency(&self, delta: f64) -> f64 {
        self.set_frequency(self.frequency() + delta)
    }

    /// Set the amplitude, clamped to [0.1, 1.0]
    ///
    /// # Returns
    /// The amplitude actually applied
    pub fn set_amplitude(&self, amplitude: f64) -> f64 {
        let amplitude = if amplitude.is_finite() {
            amplitude
        } else {
            DEFAULT_AMPLITUDE
        };
        let applied = amplitude.clamp(MIN_AMPLITUDE, MAX_AMPLITUDE);
        self.params.set_amplitude(applied);
        tracing::debug!("Generator amplitude set to {:.2}", applied);
        applied
    }

    /// Shift the amplitude by `delta` (clamped)
    pub fn adjust_amplitude(&self, delta: f64) -> f64 {
        self.set_amplitude(self.amplitude() + delta)
    }

    /// Start the generator task; no-op when already running
    pub fn start(&mut self) -> Result<(), GeneratorError> {
        if self.is_enabled() {
            return Ok(());
        }
        // Reap a task that exited on its own (e.g. output disconnected)
        self.stop();

        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let task_running = Arc::clone(&running);
        let params = Arc::clone(&self.params);
        let output = Arc::clone(&self.output);
        let config = self.config;

        let handle = std::thread::Builder::new()
            .name("signal-generator".to_string())
            .spawn(move || {
                let mut oscillator = SineOscillator::new(config.sample_rate);
                let mut chunk = vec![0i16; config.chunk_size];

                while task_running.load(Ordering::Acquire) {
                    oscillator.fill_chunk(&mut chunk, params.frequency(), params.amplitude());

                    if !task_running.load(Ordering::Acquire) {
                        break;
                    }
                    let written = output
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .write_chunk(&chunk);
                    if let Err(e) = written {
                        tracing::error!("Generator write failed, stopping: {}", e);
                        task_running.store(false, Ordering::Release);
                        break;
                    }

                    std::thread::sleep(WRITE_PACING);
                }

                let _ = done_tx.send(());
            })?;

        self.running = Some(running);
        self.worker = Some(Worker { handle, done_rx });

        tracing::info!(
            "Signal generator started: {} Hz, amplitude {:.2}",
            self.frequency(),
            self.amplitude()
        );
        Ok(())
    }

    /// Stop the generator task, waiting a bounded time for it to exit
    ///
    /// A task that does not exit in time is detached and logged; the output
    /// channel is simply left idle.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.store(false, Ordering::Release);
        }

        let Some(worker) = self.worker.take() else {
            return;
        };

        match worker.done_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    tracing::error!("Signal generator task panicked");
                } else {
                    tracing::info!("Signal generator stopped");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Signal generator did not stop within {:?}; detaching task",
                    STOP_TIMEOUT
                );
            }
        }
    }
}

impl Drop for SignalGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}
