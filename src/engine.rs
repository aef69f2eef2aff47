//! Measurement engine: the single owner of the audio channel, generator,
//! calibration and session, and the only API a front-end talks to.
//!
//! The engine is driven from one thread. Front-end actions are plain method
//! calls; everything the engine has to report back (prompts, busy flag,
//! results) arrives as [`EngineEvent`]s on the channel returned by
//! [`Engine::events`]. Completed measurement tasks are applied by
//! [`Engine::poll`], which the front-end calls from its event loop.

use crate::audio::channel::{
    AudioChannelError, AudioConfig, AudioInput, AudioOutput, SharedInput, SharedOutput,
    WaveformChunk,
};
use crate::audio::generator::{GeneratorError, SignalGenerator, SignalGeneratorState};
use crate::audio::rms::RmsEstimator;
use crate::audio::spectrum::SpectralAnalyzer;
use crate::config::AppConfig;
use crate::measure::calibration::{CalibrationError, CalibrationModel};
use crate::measure::orchestrator::{MeasurementError, Orchestrator};
use crate::measure::session::{
    AutoMethod, MeasurementOutcome, MeasurementSession, MeasurementState, Mode, ModeInfo,
    Readings, SweepConfig,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

/// Generator frequency step of the front-end +/- controls
pub const FREQUENCY_STEP_HZ: f64 = 100.0;

/// Generator amplitude step of the front-end +/- controls
pub const AMPLITUDE_STEP: f64 = 0.1;

/// Smallest oscilloscope zoom
pub const MIN_VOLT_DIV: f64 = 0.1;

/// Notification from the engine to the front-end
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The session moved to `state`; `prompt` tells the user what to do next
    StateChanged {
        state: MeasurementState,
        prompt: String,
    },
    /// Transient status line (capture in progress, rejected action)
    Status(String),
    /// A measurement task started (`true`) or its result was drained (`false`)
    Busy(bool),
    /// Final outcome of a session
    Result(MeasurementOutcome),
}

/// One live-readout sample
#[derive(Debug, Clone)]
pub struct LiveReading {
    pub waveform: WaveformChunk,
    /// Dominant frequency in Hz
    pub frequency: f64,
    /// Calibrated single-chunk RMS voltage
    pub voltage_rms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Oscilloscope vertical scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeScale {
    volt_div: f64,
}

impl Default for ScopeScale {
    fn default() -> Self {
        Self { volt_div: 1.0 }
    }
}

impl ScopeScale {
    pub fn volt_div(&self) -> f64 {
        self.volt_div
    }

    /// Multiply the zoom by `factor`, never going below [`MIN_VOLT_DIV`]
    pub fn adjust(&mut self, factor: f64) -> f64 {
        self.volt_div = (self.volt_div * factor).max(MIN_VOLT_DIV);
        self.volt_div
    }

    /// "V/Div +": show a larger sample range
    pub fn increase(&mut self) -> f64 {
        self.adjust(0.5)
    }

    /// "V/Div -": zoom in on the waveform
    pub fn decrease(&mut self) -> f64 {
        self.adjust(2.0)
    }

    /// Half-height of the visible sample range
    pub fn y_limit(&self) -> f64 {
        32768.0 / self.volt_div
    }

    /// Render `waveform` as `height` text rows of `width` columns
    pub fn render(&self, waveform: &[i16], width: usize, height: usize) -> Vec<String> {
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let mut grid = vec![vec![' '; width]; height];
        let mid = height / 2;
        for cell in grid[mid].iter_mut() {
            *cell = '-';
        }

        if !waveform.is_empty() {
            let limit = self.y_limit();
            for col in 0..width {
                let idx = col * waveform.len() / width;
                let norm = (waveform[idx] as f64 / limit).clamp(-1.0, 1.0);
                let row = ((1.0 - norm) / 2.0 * (height - 1) as f64).round() as usize;
                grid[row.min(height - 1)][col] = '*';
            }
        }

        grid.into_iter().map(|row| row.into_iter().collect()).collect()
    }
}

/// Everything a measurement step needs access to
pub struct EngineContext {
    pub audio: AudioConfig,
    pub input: SharedInput,
    pub generator: SignalGenerator,
    pub calibration: CalibrationModel,
    pub session: MeasurementSession,
}

/// Measurement engine façade
pub struct Engine {
    ctx: EngineContext,
    orchestrator: Orchestrator,
    analyzer: SpectralAnalyzer,
    scope: ScopeScale,
    events_rx: Receiver<EngineEvent>,
}

impl Engine {
    /// Assemble an engine over an already opened input/output pair
    pub fn new(
        audio: AudioConfig,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
        calibration: CalibrationModel,
        sweep: SweepConfig,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let output: SharedOutput = Arc::new(Mutex::new(output));

        let ctx = EngineContext {
            audio,
            input: Arc::new(Mutex::new(input)),
            generator: SignalGenerator::new(audio, output),
            calibration,
            session: MeasurementSession::new(sweep),
        };

        tracing::info!(
            "Engine ready: {} Hz, {} samples/chunk, R_known={} Ω",
            audio.sample_rate,
            audio.chunk_size,
            calibration.known_resistor()
        );

        Self {
            ctx,
            orchestrator: Orchestrator::new(events_tx),
            analyzer: SpectralAnalyzer::new(audio.sample_rate),
            scope: ScopeScale::default(),
            events_rx,
        }
    }

    /// Assemble an engine using the stream, calibration and generator settings of `config`
    pub fn from_config(
        config: &AppConfig,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let calibration = config.calibration()?;
        let engine = Self::new(
            config.audio_config(),
            input,
            output,
            calibration,
            config.sweep(),
        );
        engine.set_frequency(config.signal_frequency);
        engine.set_amplitude(config.signal_amplitude);
        Ok(engine)
    }

    /// Receiver for engine notifications
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events_rx.clone()
    }

    /// Take every notification queued so far
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.events_rx.try_iter().collect()
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    // Signal generator

    pub fn start_generator(&mut self) -> Result<(), GeneratorError> {
        self.ctx.generator.start()
    }

    pub fn stop_generator(&mut self) {
        self.ctx.generator.stop();
    }

    /// Toggle the generator on or off
    ///
    /// # Returns
    /// Whether the generator is now running
    pub fn toggle_generator(&mut self) -> Result<bool, GeneratorError> {
        if self.ctx.generator.is_enabled() {
            self.ctx.generator.stop();
            Ok(false)
        } else {
            self.ctx.generator.start()?;
            Ok(true)
        }
    }

    pub fn generator_state(&self) -> SignalGeneratorState {
        self.ctx.generator.state()
    }

    pub fn set_frequency(&self, hz: f64) -> f64 {
        self.ctx.generator.set_frequency(hz)
    }

    /// "Freq +" / "Freq -"
    pub fn step_frequency(&self, up: bool) -> f64 {
        let delta = if up { FREQUENCY_STEP_HZ } else { -FREQUENCY_STEP_HZ };
        self.ctx.generator.adjust_frequency(delta)
    }

    pub fn set_amplitude(&self, amplitude: f64) -> f64 {
        self.ctx.generator.set_amplitude(amplitude)
    }

    /// "Amp +" / "Amp -"
    pub fn step_amplitude(&self, up: bool) -> f64 {
        let delta = if up { AMPLITUDE_STEP } else { -AMPLITUDE_STEP };
        self.ctx.generator.adjust_amplitude(delta)
    }

    // Calibration

    pub fn calibration(&self) -> CalibrationModel {
        self.ctx.calibration
    }

    /// Apply a calibration-factor text edit; read by the next task started
    pub fn edit_calibration_factor(&mut self, text: &str) -> Result<f64, CalibrationError> {
        self.ctx.calibration.edit_calibration_factor(text)
    }

    pub fn edit_known_resistor(&mut self, text: &str) -> Result<f64, CalibrationError> {
        self.ctx.calibration.edit_known_resistor(text)
    }

    // Measurement session

    pub fn mode(&self) -> Mode {
        self.ctx.session.mode
    }

    pub fn mode_info(&self) -> ModeInfo {
        self.ctx.session.mode.presentation()
    }

    pub fn method(&self) -> AutoMethod {
        self.ctx.session.method
    }

    pub fn state(&self) -> MeasurementState {
        self.ctx.session.state
    }

    pub fn readings(&self) -> Readings {
        self.ctx.session.readings
    }

    pub fn is_busy(&self) -> bool {
        self.orchestrator.is_busy()
    }

    pub fn tasks_spawned(&self) -> u64 {
        self.orchestrator.tasks_spawned()
    }

    pub fn select_mode(&mut self, mode: Mode) {
        self.orchestrator.select_mode(&mut self.ctx, mode);
    }

    pub fn select_method(&mut self, method: AutoMethod) {
        self.orchestrator.select_method(&mut self.ctx, method);
    }

    /// The "measure" / "continue" action
    pub fn action(&mut self) -> Result<(), MeasurementError> {
        self.orchestrator.advance(&mut self.ctx)
    }

    pub fn cancel(&mut self) {
        self.orchestrator.cancel(&mut self.ctx);
    }

    /// Apply finished measurement tasks; returns how many were handled
    pub fn poll(&mut self) -> usize {
        self.orchestrator.poll(&mut self.ctx)
    }

    /// Block up to `timeout` for the running task and apply its result
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        self.orchestrator.wait_for_completion(&mut self.ctx, timeout)
    }

    // Live readout

    /// Read the newest chunk for the oscilloscope and frequency/voltage readouts
    ///
    /// Input buffered since the previous poll is dropped, so the readout never
    /// falls behind the device.
    ///
    /// # Returns
    /// `None` while a measurement task owns the input
    pub fn live_reading(&mut self) -> Result<Option<LiveReading>, AudioChannelError> {
        let waveform = {
            let mut input = match self.ctx.input.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Ok(None),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            input.discard_pending();
            input.read_chunk()?
        };

        let frequency = self.analyzer.dominant_frequency(&waveform);
        let estimator =
            RmsEstimator::new(self.ctx.audio, self.ctx.calibration.calibration_factor());
        let voltage_rms = estimator.chunk_volts(&waveform);

        Ok(Some(LiveReading {
            waveform,
            frequency,
            voltage_rms,
            timestamp: Utc::now(),
        }))
    }

    pub fn scope(&self) -> ScopeScale {
        self.scope
    }

    pub fn scope_mut(&mut self) -> &mut ScopeScale {
        &mut self.scope
    }

    /// Abandon any session and stop the generator
    pub fn shutdown(&mut self) {
        self.orchestrator.cancel(&mut self.ctx);
        self.ctx.generator.stop();
        tracing::info!("Engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_scale_limits() {
        let mut scope = ScopeScale::default();
        assert_eq!(scope.y_limit(), 32768.0);

        scope.decrease();
        assert_eq!(scope.volt_div(), 2.0);
        assert_eq!(scope.y_limit(), 16384.0);

        for _ in 0..10 {
            scope.increase();
        }
        assert_eq!(scope.volt_div(), MIN_VOLT_DIV);
        assert!((scope.y_limit() - 327680.0).abs() < 1e-6);
    }

    #[test]
    fn test_scope_render_shape() {
        let scope = ScopeScale::default();
        let wave: Vec<i16> = (0..64).map(|i| if i < 32 { 30000 } else { -30000 }).collect();
        let rows = scope.render(&wave, 16, 9);
        assert_eq!(rows.len(), 9);
        assert!(rows.iter().all(|r| r.chars().count() == 16));
        assert!(rows[0].starts_with('*'));
        assert!(rows[8].ends_with('*'));
        assert!(scope.render(&wave, 0, 9).is_empty());
    }
}
