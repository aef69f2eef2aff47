//! Windowed FFT analysis: dominant frequency and phase at a target frequency
//!
//! Both operations apply a Hann window before the forward transform to limit
//! spectral leakage from the finite buffer length. Input is real-valued, so
//! only the non-negative half of the spectrum is searched.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::TAU;

/// Symmetric Hann window of `len` points
///
/// Matches the classic `0.5 - 0.5·cos(2πn/(N-1))` definition; a single-point
/// window is `[1.0]`.
pub fn hann_window(len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (len - 1) as f64;
            (0..len)
                .map(|n| 0.5 - 0.5 * (TAU * n as f64 / denom).cos())
                .collect()
        }
    }
}

/// Normalize an angle in degrees into (-180, 180]
pub fn normalize_degrees(degrees: f64) -> f64 {
    let mut wrapped = degrees % 360.0;
    if wrapped > 180.0 {
        wrapped -= 360.0;
    } else if wrapped <= -180.0 {
        wrapped += 360.0;
    }
    wrapped
}

/// FFT-based frequency and phase analyzer
pub struct SpectralAnalyzer {
    /// Sample rate in Hz
    sample_rate: u32,
    /// FFT planner, reused across calls so plans are cached
    planner: FftPlanner<f64>,
}

impl SpectralAnalyzer {
    /// Create a new analyzer
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate in Hz for bin-to-frequency conversion
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            planner: FftPlanner::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frequency resolution for a buffer of `len` samples
    pub fn bin_width(&self, len: usize) -> f64 {
        if len == 0 {
            return 0.0;
        }
        self.sample_rate as f64 / len as f64
    }

    /// Hann-window the samples (scaled to ±1.0) and run a forward FFT
    fn windowed_spectrum(&mut self, samples: &[i16]) -> Vec<Complex<f64>> {
        let window = hann_window(samples.len());
        let mut buffer: Vec<Complex<f64>> = samples
            .iter()
            .zip(&window)
            .map(|(&s, &w)| Complex::new(s as f64 / crate::FULL_SCALE * w, 0.0))
            .collect();

        let fft = self.planner.plan_fft_forward(buffer.len());
        fft.process(&mut buffer);
        buffer
    }

    /// Find the dominant frequency in a chunk
    ///
    /// Picks the bin with the largest magnitude among bins `1..len/2`,
    /// i.e. excluding DC and the negative-frequency half.
    ///
    /// # Returns
    /// Frequency in Hz, or 0.0 for an empty (or too short) chunk
    pub fn dominant_frequency(&mut self, chunk: &[i16]) -> f64 {
        let half = chunk.len() / 2;
        if half <= 1 {
            return 0.0;
        }

        let spectrum = self.windowed_spectrum(chunk);

        let mut peak_bin = 1;
        let mut peak_mag = 0.0f64;
        for (bin, value) in spectrum.iter().enumerate().take(half).skip(1) {
            let mag = value.norm();
            if mag > peak_mag {
                peak_mag = mag;
                peak_bin = bin;
            }
        }

        peak_bin as f64 * self.bin_width(chunk.len())
    }

    /// Phase angle of the bin nearest `target_hz`
    ///
    /// The caller sizes the buffer so that `target_hz` lands near a bin
    /// centre (resolution is `sample_rate / buffer.len()`); otherwise the
    /// reading is dominated by leakage.
    ///
    /// # Returns
    /// Phase in degrees, normalized to (-180, 180]; 0.0 for an empty buffer
    pub fn phase_at(&mut self, buffer: &[i16], target_hz: f64) -> f64 {
        if buffer.is_empty() {
            return 0.0;
        }

        let bin = self.nearest_bin(buffer.len(), target_hz);
        let spectrum = self.windowed_spectrum(buffer);
        normalize_degrees(spectrum[bin].arg().to_degrees())
    }

    /// Index of the non-negative-frequency bin closest to `target_hz`
    fn nearest_bin(&self, len: usize, target_hz: f64) -> usize {
        let width = self.bin_width(len);
        let max_bin = len / 2;
        let bin = (target_hz / width).round();
        if bin.is_nan() || bin <= 0.0 {
            0
        } else {
            (bin as usize).min(max_bin)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f64, phase_deg: f64, amplitude: f64, len: usize, rate: u32) -> Vec<i16> {
        (0..len)
            .map(|n| {
                let t = n as f64 / rate as f64;
                let v = (TAU * freq * t + phase_deg.to_radians()).sin();
                (v * amplitude * crate::FULL_SCALE).round() as i16
            })
            .collect()
    }

    #[test]
    fn test_hann_window_shape() {
        let w = hann_window(5);
        assert_eq!(w.len(), 5);
        assert_abs_diff_eq!(w[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[2], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[4], 0.0, epsilon = 1e-12);
        assert_eq!(hann_window(1), vec![1.0]);
        assert!(hann_window(0).is_empty());
    }

    #[test]
    fn test_normalize_degrees() {
        assert_abs_diff_eq!(normalize_degrees(0.0), 0.0);
        assert_abs_diff_eq!(normalize_degrees(180.0), 180.0);
        assert_abs_diff_eq!(normalize_degrees(-180.0), 180.0);
        assert_abs_diff_eq!(normalize_degrees(190.0), -170.0);
        assert_abs_diff_eq!(normalize_degrees(-190.0), 170.0);
        assert_abs_diff_eq!(normalize_degrees(720.0 + 45.0), 45.0);
        assert_abs_diff_eq!(normalize_degrees(-540.0), 180.0);
    }

    #[test]
    fn test_dominant_frequency_empty() {
        let mut analyzer = SpectralAnalyzer::new(44100);
        assert_eq!(analyzer.dominant_frequency(&[]), 0.0);
        assert_eq!(analyzer.dominant_frequency(&[1, 2]), 0.0);
    }

    #[test]
    fn test_dominant_frequency_within_one_bin() {
        let mut analyzer = SpectralAnalyzer::new(44100);
        let bin = analyzer.bin_width(1024);

        for &f in &[200.0, 1000.0, 2500.0, 7777.0, 15000.0] {
            let chunk = sine(f, 0.0, 0.8, 1024, 44100);
            let detected = analyzer.dominant_frequency(&chunk);
            assert!(
                (detected - f).abs() <= bin,
                "expected {} Hz within {} Hz, got {}",
                f,
                bin,
                detected
            );
        }
    }

    #[test]
    fn test_dominant_frequency_ignores_dc() {
        let mut analyzer = SpectralAnalyzer::new(44100);
        let chunk: Vec<i16> = sine(3000.0, 0.0, 0.5, 1024, 44100)
            .into_iter()
            .map(|s| s.saturating_add(2000))
            .collect();

        let detected = analyzer.dominant_frequency(&chunk);
        assert!((detected - 3000.0).abs() <= analyzer.bin_width(1024));
    }

    #[test]
    fn test_phase_difference() {
        let mut analyzer = SpectralAnalyzer::new(44100);
        // 0.5 s buffer: 2 Hz bins, 1000 Hz sits on a bin centre
        let len = 22050;

        for &offset in &[0.0, 40.0, -40.0, 90.0, -135.0, 170.0] {
            let a = sine(1000.0, 0.0, 0.7, len, 44100);
            let b = sine(1000.0, offset, 0.3, len, 44100);
            let diff = normalize_degrees(analyzer.phase_at(&b, 1000.0) - analyzer.phase_at(&a, 1000.0));
            assert!(
                (diff - offset).abs() < 3.0,
                "offset {}: measured {}",
                offset,
                diff
            );
        }
    }

    #[test]
    fn test_phase_in_range() {
        let mut analyzer = SpectralAnalyzer::new(44100);
        for deg in (-175..=180).step_by(35) {
            let buf = sine(500.0, deg as f64, 0.5, 22050, 44100);
            let phase = analyzer.phase_at(&buf, 500.0);
            assert!(phase > -180.0 && phase <= 180.0);
        }
        assert_eq!(analyzer.phase_at(&[], 1000.0), 0.0);
    }

    #[test]
    fn test_nearest_bin_clamped() {
        let analyzer = SpectralAnalyzer::new(44100);
        assert_eq!(analyzer.nearest_bin(22050, 1000.0), 500);
        assert_eq!(analyzer.nearest_bin(22050, -5.0), 0);
        assert_eq!(analyzer.nearest_bin(1024, 1.0e9), 512);
    }
}
