//! Audio spectrum analysis feeding audio-reactive filters.
//!
//! Each call is an independent transform: the analyzer keeps its FFT plan,
//! scratch space and window, but no audio history.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::buffer::AudioSampleBuffer;
use crate::filters::Filter;

/// Number of bins in every spectrum.
pub const SPECTRUM_LEN: usize = 128;
/// Only every `DECIMATION_STRIDE`-th input sample is analyzed.
pub const DECIMATION_STRIDE: usize = 4;
/// Gain applied to the squared magnitudes.
pub const SPECTRUM_GAIN: f32 = 8.0;

/// Fixed-length magnitude-squared spectrum.
pub type Spectrum = [f32; SPECTRUM_LEN];

/// Error type for spectrum analysis operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalyzerError {
    #[error("Not enough samples: need {needed} but got {got}")]
    InsufficientSamples { needed: usize, got: usize },
}

/// Blackman window of length `len`.
pub fn blackman_window(len: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    let n = len as f32;
    (0..len)
        .map(|i| {
            let x = i as f32 / n;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Turns raw PCM into the spectrum audio-reactive filters read.
pub struct AudioAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Default for AudioAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioAnalyzer {
    pub fn new() -> Self {
        let fft = FftPlanner::new().plan_fft_forward(SPECTRUM_LEN);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            window: blackman_window(SPECTRUM_LEN),
            buffer: vec![Complex::new(0.0, 0.0); SPECTRUM_LEN],
            scratch,
        }
    }

    /// Minimum input length for one transform.
    pub const fn min_samples() -> usize {
        (SPECTRUM_LEN - 1) * DECIMATION_STRIDE + 1
    }

    /// Compute the magnitude-squared spectrum of a block of samples.
    ///
    /// Every 4th sample is taken, normalized by `i16::MAX` and windowed.
    /// Inputs longer than [`AudioAnalyzer::min_samples`] are truncated.
    pub fn analyze(&mut self, samples: &[i16]) -> Result<Spectrum, AnalyzerError> {
        let needed = Self::min_samples();
        if samples.len() < needed {
            return Err(AnalyzerError::InsufficientSamples {
                needed,
                got: samples.len(),
            });
        }

        let decimated = samples.iter().step_by(DECIMATION_STRIDE);
        for ((slot, &sample), w) in self.buffer.iter_mut().zip(decimated).zip(&self.window) {
            let normalized = sample as f32 / i16::MAX as f32;
            *slot = Complex::new(normalized * w, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let mut spectrum = [0.0; SPECTRUM_LEN];
        for (out, bin) in spectrum.iter_mut().zip(&self.buffer) {
            *out = bin.norm_sqr() * SPECTRUM_GAIN;
        }
        Ok(spectrum)
    }

    /// Analyze a captured buffer.
    pub fn analyze_buffer(&mut self, buffer: &AudioSampleBuffer) -> Result<Spectrum, AnalyzerError> {
        self.analyze(&buffer.samples)
    }

    /// Analyze `buffer` and hand the spectrum to `filter` if it reacts to audio.
    ///
    /// Returns the spectrum that was pushed, if any. Short buffers are skipped.
    pub fn feed(&mut self, buffer: &AudioSampleBuffer, filter: &dyn Filter) -> Option<Spectrum> {
        if !filter.wants_audio() {
            return None;
        }
        match self.analyze_buffer(buffer) {
            Ok(spectrum) => {
                filter.update_audio_params(&spectrum);
                Some(spectrum)
            }
            Err(e) => {
                log::debug!("Skipping audio buffer for '{}': {}", filter.name(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synth::sine_samples;

    #[test]
    fn test_silence_gives_zero_spectrum() {
        let mut analyzer = AudioAnalyzer::new();
        let spectrum = analyzer.analyze(&[0; 1024]).unwrap();
        assert!(spectrum.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_spectrum_length_is_fixed() {
        let mut analyzer = AudioAnalyzer::new();
        for len in [AudioAnalyzer::min_samples(), 1024, 4096] {
            let spectrum = analyzer.analyze(&vec![1000; len]).unwrap();
            assert_eq!(spectrum.len(), SPECTRUM_LEN);
        }
    }

    #[test]
    fn test_short_input_is_an_error() {
        let mut analyzer = AudioAnalyzer::new();
        let err = analyzer.analyze(&[0; 508]).unwrap_err();
        assert_eq!(
            err,
            AnalyzerError::InsufficientSamples {
                needed: 509,
                got: 508
            }
        );
        assert!(analyzer.analyze(&[]).is_err());
    }

    #[test]
    fn test_trailing_samples_are_ignored() {
        let mut analyzer = AudioAnalyzer::new();
        let mut samples = sine_samples(1000.0, 44_100, 1, 509, 0.5);
        let base = analyzer.analyze(&samples).unwrap();
        samples.extend(std::iter::repeat(i16::MAX).take(512));
        assert_eq!(analyzer.analyze(&samples).unwrap(), base);
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        // Decimated rate is 44100 / 4, so bin spacing is 11025 / 128 Hz.
        let bin = 12;
        let freq = bin as f32 * 44_100.0 / (DECIMATION_STRIDE * SPECTRUM_LEN) as f32;
        let samples = sine_samples(freq, 44_100, 1, AudioAnalyzer::min_samples(), 0.8);

        let mut analyzer = AudioAnalyzer::new();
        let spectrum = analyzer.analyze(&samples).unwrap();
        let peak = spectrum[..SPECTRUM_LEN / 2]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
    }

    #[test]
    fn test_blackman_window_shape() {
        let window = blackman_window(SPECTRUM_LEN);
        assert!(window[0].abs() < 1e-6);
        assert!((window[SPECTRUM_LEN / 2] - 1.0).abs() < 1e-5);
    }
}
