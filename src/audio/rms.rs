//! Calibrated RMS voltage estimation over multiple chunks
//!
//! A single chunk is noisy and probe contact bounces for a moment after the
//! user connects it, so measurements average the per-chunk RMS over a fixed
//! capture duration.

use crate::audio::channel::{AudioChannelError, AudioConfig, AudioInput};

/// Root-mean-square of raw sample magnitudes
pub fn chunk_rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Convert a raw RMS amplitude to volts
///
/// `calibration_factor` is the voltage corresponding to a full-scale sample.
pub fn rms_to_volts(rms: f64, calibration_factor: f64) -> f64 {
    rms / crate::FULL_SCALE * calibration_factor
}

/// Number of chunks needed to cover `duration_secs`, rounded up
pub fn chunks_for_duration(config: &AudioConfig, duration_secs: f64) -> usize {
    if duration_secs.is_nan() || duration_secs <= 0.0 || config.chunk_size == 0 {
        return 0;
    }
    (duration_secs * config.sample_rate as f64 / config.chunk_size as f64).ceil() as usize
}

/// Multi-chunk RMS estimator
#[derive(Debug, Clone, Copy)]
pub struct RmsEstimator {
    config: AudioConfig,
    calibration_factor: f64,
}

impl RmsEstimator {
    /// Create an estimator with a snapshot of the calibration factor
    pub fn new(config: AudioConfig, calibration_factor: f64) -> Self {
        Self {
            config,
            calibration_factor,
        }
    }

    /// Calibrated RMS voltage of a single chunk
    pub fn chunk_volts(&self, samples: &[i16]) -> f64 {
        rms_to_volts(chunk_rms(samples), self.calibration_factor)
    }

    /// Average calibrated RMS over `duration_secs` of input
    ///
    /// Reads `ceil(duration × rate / chunk)` chunks sequentially and returns
    /// the mean of the per-chunk voltages, or 0.0 when nothing is read.
    pub fn stable_rms(
        &self,
        input: &mut dyn AudioInput,
        duration_secs: f64,
    ) -> Result<f64, AudioChannelError> {
        let count = chunks_for_duration(&self.config, duration_secs);
        if count == 0 {
            return Ok(0.0);
        }

        let mut total = 0.0;
        for _ in 0..count {
            let chunk = input.read_chunk()?;
            total += self.chunk_volts(&chunk);
        }

        let volts = total / count as f64;
        tracing::debug!("Stable RMS over {} chunks: {:.5} V", count, volts);
        Ok(volts)
    }
}

/// Read consecutive chunks until `duration_secs` worth of samples is collected
///
/// The result is truncated to exactly `duration × rate` samples so that the
/// FFT bin spacing is independent of the chunk size.
pub fn capture(
    input: &mut dyn AudioInput,
    config: &AudioConfig,
    duration_secs: f64,
) -> Result<Vec<i16>, AudioChannelError> {
    if duration_secs.is_nan() || duration_secs <= 0.0 {
        return Ok(Vec::new());
    }
    let wanted = (duration_secs * config.sample_rate as f64) as usize;
    let mut samples = Vec::with_capacity(wanted + config.chunk_size);

    while samples.len() < wanted {
        let chunk = input.read_chunk()?;
        if chunk.is_empty() {
            break;
        }
        samples.extend_from_slice(&chunk);
    }

    samples.truncate(wanted);
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{SQRT_2, TAU};

    /// Endless phase-continuous sine source
    struct SineInput {
        chunk_size: usize,
        step: f64,
        phase: f64,
        amplitude: f64,
        reads: usize,
    }

    impl SineInput {
        fn new(freq: f64, amplitude: f64, config: &AudioConfig) -> Self {
            Self {
                chunk_size: config.chunk_size,
                step: TAU * freq / config.sample_rate as f64,
                phase: 0.0,
                amplitude,
                reads: 0,
            }
        }
    }

    impl AudioInput for SineInput {
        fn read_chunk(&mut self) -> Result<Vec<i16>, AudioChannelError> {
            self.reads += 1;
            let mut chunk = Vec::with_capacity(self.chunk_size);
            for _ in 0..self.chunk_size {
                chunk.push((self.phase.sin() * self.amplitude * crate::FULL_SCALE).round() as i16);
                self.phase = (self.phase + self.step) % TAU;
            }
            Ok(chunk)
        }
    }

    #[test]
    fn test_chunk_rms() {
        assert_eq!(chunk_rms(&[]), 0.0);
        assert_relative_eq!(chunk_rms(&[3, -4, 3, -4]), (12.5f64).sqrt());
        assert_relative_eq!(chunk_rms(&[1000; 16]), 1000.0);
    }

    #[test]
    fn test_rms_to_volts() {
        assert_relative_eq!(rms_to_volts(crate::FULL_SCALE, 0.1), 0.1);
        assert_relative_eq!(rms_to_volts(crate::FULL_SCALE / 2.0, 2.0), 1.0);
    }

    #[test]
    fn test_chunks_for_duration() {
        let config = AudioConfig::default();
        assert_eq!(chunks_for_duration(&config, 2.0), 87); // 86.13 rounded up
        assert_eq!(chunks_for_duration(&config, 0.0), 0);
        assert_eq!(chunks_for_duration(&config, -1.0), 0);
        assert_eq!(chunks_for_duration(&config, f64::NAN), 0);
    }

    #[test]
    fn test_stable_rms_converges_to_sine_rms() {
        let config = AudioConfig::default();
        let estimator = RmsEstimator::new(config, 0.5);
        let mut input = SineInput::new(1000.0, 0.8, &config);

        let volts = estimator.stable_rms(&mut input, 2.0).unwrap();
        assert_eq!(input.reads, 87);
        assert_relative_eq!(volts, 0.8 * 0.5 / SQRT_2, max_relative = 0.005);
    }

    #[test]
    fn test_stable_rms_zero_duration_reads_nothing() {
        let config = AudioConfig::default();
        let estimator = RmsEstimator::new(config, 0.1);
        let mut input = SineInput::new(1000.0, 0.8, &config);

        assert_eq!(estimator.stable_rms(&mut input, 0.0).unwrap(), 0.0);
        assert_eq!(input.reads, 0);
    }

    #[test]
    fn test_capture_exact_length() {
        let config = AudioConfig::default();
        let mut input = SineInput::new(1000.0, 0.5, &config);

        let samples = capture(&mut input, &config, 0.5).unwrap();
        assert_eq!(samples.len(), 22050);
        assert_eq!(input.reads, 22); // 22 × 1024 ≥ 22050
    }
}
