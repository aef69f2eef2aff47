//! Guided measurement state machine
//!
//! Sequences the user through probe connections and runs one capture per
//! step on a background task. Transitions happen only in two places:
//! - [`Orchestrator::advance`], the user's "measure" / "continue" action
//! - completion handling, when [`Orchestrator::poll`] or
//!   [`Orchestrator::wait_for_completion`] drains a task result
//!
//! The task never calls back into the orchestrator; it only sends its result
//! over a channel. At most one task is in flight: `advance` is rejected with
//! [`MeasurementError::Busy`] until the pending result has been drained.
//!
//! ## Flows
//! - R/C/L: Vin RMS, Vout RMS, then the component formula
//! - AUTO sweep: Vin/Vout at `f_low`, Vin/Vout at `f_high`, then |Z| trend
//! - AUTO phase: Vin phase, Vout phase, then phase-shift classification

use crate::audio::channel::{AudioChannelError, AudioConfig, AudioInput};
use crate::audio::rms::{self, RmsEstimator};
use crate::audio::spectrum::{normalize_degrees, SpectralAnalyzer};
use crate::engine::{EngineContext, EngineEvent};
use crate::measure::formulas::{self, FormulaError};
use crate::measure::session::{
    AutoMethod, MeasurementOutcome, MeasurementState, Mode, SweepConfig, Unit,
};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Capture length of every RMS step
pub const RMS_CAPTURE_SECS: f64 = 2.0;

/// Capture length of every phase step (2 Hz bins at 44.1 kHz)
pub const PHASE_CAPTURE_SECS: f64 = 0.5;

/// Source voltage below which the probes are assumed disconnected
pub const MIN_SOURCE_VOLTS: f64 = 0.0001;

/// Rejected user actions
#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error("Turn on Signal Generator first.")]
    GeneratorOff,

    #[error("A measurement step is already running")]
    Busy,

    #[error("Failed to spawn measurement task: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One background capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementTask {
    /// Averaged calibrated RMS voltage
    Rms { duration_secs: f64 },
    /// Phase in degrees at `frequency`
    Phase { duration_secs: f64, frequency: f64 },
}

impl MeasurementTask {
    /// Capture needed by a waiting state at the given generator frequency
    pub fn for_step(step: MeasurementState, frequency: f64) -> Self {
        if step.is_phase_step() {
            MeasurementTask::Phase {
                duration_secs: PHASE_CAPTURE_SECS,
                frequency,
            }
        } else {
            MeasurementTask::Rms {
                duration_secs: RMS_CAPTURE_SECS,
            }
        }
    }

    /// Run the capture to completion on the calling thread
    ///
    /// Only samples captured after the call count; whatever the input buffered
    /// earlier (possibly with the probes still on the previous point) is dropped.
    pub fn run(
        self,
        input: &mut dyn AudioInput,
        audio: &AudioConfig,
        calibration_factor: f64,
    ) -> Result<f64, AudioChannelError> {
        let stale = input.discard_pending();
        if stale > 0 {
            tracing::debug!("Dropped {} buffered samples before capture", stale);
        }

        match self {
            MeasurementTask::Rms { duration_secs } => {
                RmsEstimator::new(*audio, calibration_factor).stable_rms(input, duration_secs)
            }
            MeasurementTask::Phase {
                duration_secs,
                frequency,
            } => {
                let buffer = rms::capture(input, audio, duration_secs)?;
                Ok(SpectralAnalyzer::new(audio.sample_rate).phase_at(&buffer, frequency))
            }
        }
    }
}

/// Result message from a finished task
#[derive(Debug)]
struct TaskCompletion {
    session_id: u64,
    step: MeasurementState,
    result: Result<f64, AudioChannelError>,
}

/// Measurement state machine driver
pub struct Orchestrator {
    events: Sender<EngineEvent>,
    completion_tx: Sender<TaskCompletion>,
    completion_rx: Receiver<TaskCompletion>,
    /// Step whose task has not been drained yet
    in_flight: Option<MeasurementState>,
    tasks_spawned: u64,
}

impl Orchestrator {
    /// Create an orchestrator reporting to `events`
    pub fn new(events: Sender<EngineEvent>) -> Self {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        Self {
            events,
            completion_tx,
            completion_rx,
            in_flight: None,
            tasks_spawned: 0,
        }
    }

    /// Whether a background task is pending; the action control stays disabled meanwhile
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Total number of background tasks launched
    pub fn tasks_spawned(&self) -> u64 {
        self.tasks_spawned
    }

    fn emit(&self, event: EngineEvent) {
        // The UI side may have gone away during shutdown
        let _ = self.events.send(event);
    }

    fn transition(&self, ctx: &mut EngineContext, state: MeasurementState, prompt: String) {
        tracing::debug!("Measurement state {} -> {}", ctx.session.state, state);
        ctx.session.state = state;
        self.emit(EngineEvent::StateChanged { state, prompt });
    }

    /// Select the measurement mode; abandons any session in progress
    pub fn select_mode(&mut self, ctx: &mut EngineContext, mode: Mode) {
        self.cancel(ctx);
        ctx.session.mode = mode;
        tracing::info!("Measurement mode: {}", mode.presentation().label);
        self.emit(EngineEvent::StateChanged {
            state: MeasurementState::Idle,
            prompt: "Ready".to_string(),
        });
    }

    /// Select the AUTO detection method used by the next session
    pub fn select_method(&mut self, ctx: &mut EngineContext, method: AutoMethod) {
        if !ctx.session.state.is_idle() {
            self.cancel(ctx);
        }
        ctx.session.method = method;
        tracing::info!("Auto-detect method: {:?}", method);
    }

    /// The "measure" / "continue" action
    ///
    /// From IDLE this opens a session (generator must be on); from a waiting
    /// state it launches that step's capture.
    pub fn advance(&mut self, ctx: &mut EngineContext) -> Result<(), MeasurementError> {
        if let Some(step) = self.in_flight {
            tracing::debug!("Action ignored: {} capture still running", step);
            return Err(MeasurementError::Busy);
        }

        let state = ctx.session.state;
        if state.is_idle() {
            self.begin(ctx)
        } else {
            self.spawn(ctx, state)
        }
    }

    fn begin(&mut self, ctx: &mut EngineContext) -> Result<(), MeasurementError> {
        if !ctx.generator.is_enabled() {
            tracing::warn!("Measurement rejected: signal generator is off");
            self.emit(EngineEvent::Status(format!(
                "Error: {}",
                MeasurementError::GeneratorOff
            )));
            return Err(MeasurementError::GeneratorOff);
        }

        let (state, prompt) = match (ctx.session.mode, ctx.session.method) {
            (Mode::Auto, AutoMethod::FrequencySweep) => {
                let f_low = ctx.generator.set_frequency(ctx.session.sweep.f_low);
                (
                    MeasurementState::AutoWaitingForVinLow,
                    format!("STEP 1: Connect probes across source (Vin) at {f_low}Hz."),
                )
            }
            (Mode::Auto, AutoMethod::PhaseShift) => (
                MeasurementState::WaitingForVinPhase,
                "STEP 1: Connect probes across signal source (Vin).".to_string(),
            ),
            _ => (
                MeasurementState::WaitingForVinRms,
                "STEP 1: Connect probes across signal source (Vin).".to_string(),
            ),
        };

        ctx.session.begin(state);
        tracing::info!(
            "Measurement session {} started ({}): {}",
            ctx.session.id,
            ctx.session.mode.presentation().label,
            state
        );
        self.emit(EngineEvent::StateChanged { state, prompt });
        Ok(())
    }

    fn measuring_prompt(step: MeasurementState, sweep: &SweepConfig) -> String {
        match step {
            MeasurementState::WaitingForVinRms => "Measuring Vin... (2 seconds)".to_string(),
            MeasurementState::WaitingForVoutRms => "Measuring Vout... (2 seconds)".to_string(),
            MeasurementState::WaitingForVinPhase => "Measuring Vin Phase...".to_string(),
            MeasurementState::WaitingForVoutPhase => "Measuring Vout Phase...".to_string(),
            MeasurementState::AutoWaitingForVinLow => format!("Measuring Vin at {}Hz...", sweep.f_low),
            MeasurementState::AutoWaitingForVoutLow => {
                format!("Measuring Vout at {}Hz...", sweep.f_low)
            }
            MeasurementState::AutoWaitingForVinHigh => {
                format!("Measuring Vin at {}Hz...", sweep.f_high)
            }
            MeasurementState::AutoWaitingForVoutHigh => {
                format!("Measuring Vout at {}Hz...", sweep.f_high)
            }
            MeasurementState::Idle => String::new(),
        }
    }

    fn spawn(
        &mut self,
        ctx: &mut EngineContext,
        step: MeasurementState,
    ) -> Result<(), MeasurementError> {
        let task = MeasurementTask::for_step(step, ctx.generator.frequency());
        let input = Arc::clone(&ctx.input);
        let audio = ctx.audio;
        let calibration_factor = ctx.calibration.calibration_factor();
        let session_id = ctx.session.id;
        let tx = self.completion_tx.clone();

        std::thread::Builder::new()
            .name("measurement".to_string())
            .spawn(move || {
                // Held for the whole capture so the live readout cannot interleave reads
                let result = {
                    let mut guard = input
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    task.run(&mut **guard, &audio, calibration_factor)
                };
                let _ = tx.send(TaskCompletion {
                    session_id,
                    step,
                    result,
                });
            })?;

        self.in_flight = Some(step);
        self.tasks_spawned += 1;
        tracing::info!("Measurement task spawned for {}: {:?}", step, task);

        self.emit(EngineEvent::Busy(true));
        self.emit(EngineEvent::Status(Self::measuring_prompt(
            step,
            &ctx.session.sweep,
        )));
        Ok(())
    }

    /// Apply every completion that has already arrived
    ///
    /// # Returns
    /// Number of completions handled
    pub fn poll(&mut self, ctx: &mut EngineContext) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.complete(ctx, completion);
            handled += 1;
        }
        handled
    }

    /// Block up to `timeout` for the next completion and apply it
    ///
    /// # Returns
    /// `true` if a completion was handled
    pub fn wait_for_completion(&mut self, ctx: &mut EngineContext, timeout: Duration) -> bool {
        match self.completion_rx.recv_timeout(timeout) {
            Ok(completion) => {
                self.complete(ctx, completion);
                true
            }
            Err(_) => false,
        }
    }

    /// Abandon the current session and return to IDLE
    ///
    /// A task already in flight runs to completion; its result is discarded.
    pub fn cancel(&mut self, ctx: &mut EngineContext) {
        if ctx.session.state.is_idle() {
            return;
        }
        tracing::info!("Measurement session {} cancelled", ctx.session.id);
        if ctx.session.state.is_sweep_step() {
            ctx.generator.set_frequency(ctx.session.sweep.reset_hz);
        }
        ctx.session.reset();
        self.emit(EngineEvent::StateChanged {
            state: MeasurementState::Idle,
            prompt: "Ready".to_string(),
        });
    }

    fn complete(&mut self, ctx: &mut EngineContext, completion: TaskCompletion) {
        self.in_flight = None;
        self.emit(EngineEvent::Busy(false));

        if completion.session_id != ctx.session.id || completion.step != ctx.session.state {
            tracing::debug!(
                "Discarding result of abandoned {} capture (session {})",
                completion.step,
                completion.session_id
            );
            return;
        }

        let value = match completion.result {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("{} capture failed: {}", completion.step, e);
                self.finish(ctx, MeasurementOutcome::failed(format!("Audio read failed: {e}")));
                return;
            }
        };
        tracing::info!("{} captured: {:.5}", completion.step, value);

        let sweep = ctx.session.sweep;
        match completion.step {
            MeasurementState::WaitingForVinRms => {
                if value < MIN_SOURCE_VOLTS {
                    self.finish(
                        ctx,
                        MeasurementOutcome::failed(format!(
                            "Vin is too low ({value:.5}V). Restarting."
                        )),
                    );
                    return;
                }
                ctx.session.readings.vin_rms = Some(value);
                let prompt = format!(
                    "Vin={:.4}V. STEP 2: Connect probes across {} (Vout).",
                    value,
                    ctx.session.mode.component_name()
                );
                self.transition(ctx, MeasurementState::WaitingForVoutRms, prompt);
            }
            MeasurementState::WaitingForVoutRms => {
                ctx.session.readings.vout_rms = Some(value);
                let outcome = Self::component_value(ctx);
                self.finish(ctx, outcome);
            }
            MeasurementState::AutoWaitingForVinLow => {
                ctx.session.readings.vin_low = Some(value);
                let prompt = format!(
                    "Vin_low={:.4}V. STEP 2: Connect probes across component @ {}Hz.",
                    value, sweep.f_low
                );
                self.transition(ctx, MeasurementState::AutoWaitingForVoutLow, prompt);
            }
            MeasurementState::AutoWaitingForVoutLow => {
                ctx.session.readings.vout_low = Some(value);
                let f_high = ctx.generator.set_frequency(sweep.f_high);
                let prompt = format!(
                    "Vout_low={value:.4}V. STEP 3: Connect probes across source (Vin) @ {f_high}Hz."
                );
                self.transition(ctx, MeasurementState::AutoWaitingForVinHigh, prompt);
            }
            MeasurementState::AutoWaitingForVinHigh => {
                ctx.session.readings.vin_high = Some(value);
                let prompt = format!(
                    "Vin_high={:.4}V. STEP 4: Connect probes across component @ {}Hz.",
                    value, sweep.f_high
                );
                self.transition(ctx, MeasurementState::AutoWaitingForVoutHigh, prompt);
            }
            MeasurementState::AutoWaitingForVoutHigh => {
                ctx.session.readings.vout_high = Some(value);
                self.emit(EngineEvent::Status("Analyzing results...".to_string()));
                let outcome = Self::impedance_trend(ctx);
                self.finish(ctx, outcome);
            }
            MeasurementState::WaitingForVinPhase => {
                ctx.session.readings.vin_phase = Some(value);
                let prompt = format!(
                    "Vin Phase={value:.1}°. STEP 2: Connect probes across component (Vout)."
                );
                self.transition(ctx, MeasurementState::WaitingForVoutPhase, prompt);
            }
            MeasurementState::WaitingForVoutPhase => {
                ctx.session.readings.vout_phase = Some(value);
                let outcome = Self::phase_shift(ctx);
                self.finish(ctx, outcome);
            }
            MeasurementState::Idle => {}
        }
    }

    /// End the session: report the outcome and reset to IDLE
    fn finish(&mut self, ctx: &mut EngineContext, outcome: MeasurementOutcome) {
        if ctx.session.state.is_sweep_step() {
            ctx.generator.set_frequency(ctx.session.sweep.reset_hz);
        }

        if outcome.is_failure() {
            tracing::warn!("Measurement session {} failed: {:?}", ctx.session.id, outcome);
        } else {
            tracing::info!("Measurement session {} result: {}", ctx.session.id, outcome);
        }

        let status = outcome.status_text();
        ctx.session.reset();
        self.emit(EngineEvent::Result(outcome));
        self.emit(EngineEvent::StateChanged {
            state: MeasurementState::Idle,
            prompt: status,
        });
    }

    fn component_value(ctx: &EngineContext) -> MeasurementOutcome {
        let readings = ctx.session.readings;
        let vin = match readings.vin_rms {
            Some(vin) if vin > 0.0 => vin,
            other => return MeasurementOutcome::failed(format!("Vin invalid ({other:?}). Restarting.")),
        };
        let Some(vout) = readings.vout_rms else {
            return MeasurementOutcome::failed("Vout not measured. Restarting.");
        };

        let r_known = ctx.calibration.known_resistor();
        let frequency = ctx.generator.frequency();

        let result = match ctx.session.mode {
            Mode::Resistance => {
                formulas::resistance(vin, vout, r_known).map(|r| MeasurementOutcome::value(r, Unit::Ohms))
            }
            Mode::Capacitance => formulas::capacitance(vin, vout, r_known, frequency)
                .map(|c| MeasurementOutcome::value(c, Unit::Microfarads)),
            Mode::Inductance => formulas::inductance(vin, vout, r_known, frequency)
                .map(|l| MeasurementOutcome::value(l, Unit::Millihenries)),
            Mode::Auto => Err(FormulaError::Domain("no value formula in AUTO mode")),
        };

        result.unwrap_or_else(|e| MeasurementOutcome::failed(e.to_string()))
    }

    fn impedance_trend(ctx: &EngineContext) -> MeasurementOutcome {
        let readings = ctx.session.readings;
        let r_known = ctx.calibration.known_resistor();

        let z_low = formulas::impedance_magnitude(readings.vin_low, readings.vout_low, r_known);
        let z_high = formulas::impedance_magnitude(readings.vin_high, readings.vout_high, r_known);

        match (z_low, z_high) {
            (Ok(z_low), Ok(z_high)) => MeasurementOutcome::Component {
                kind: formulas::classify_impedance_trend(z_low, z_high),
                detail: format!("|Z|@low={z_low:.1}Ω, |Z|@high={z_high:.1}Ω"),
            },
            (Err(e), _) | (_, Err(e)) => {
                MeasurementOutcome::failed(format!("Measurement error. Check connections. ({e})"))
            }
        }
    }

    fn phase_shift(ctx: &EngineContext) -> MeasurementOutcome {
        let readings = ctx.session.readings;
        let (Some(vin_phase), Some(vout_phase)) = (readings.vin_phase, readings.vout_phase) else {
            return MeasurementOutcome::failed("Vin phase not measured. Restarting.");
        };

        let diff = normalize_degrees(vout_phase - vin_phase);
        MeasurementOutcome::Component {
            kind: formulas::classify_phase_shift(diff),
            detail: format!("(Phase Shift: {diff:.1}°)"),
        }
    }
}
