//! Audio capture buffers, spectrum analysis and PCM sources.
//!
//! This module provides:
//! - `AudioSampleBuffer`, the interleaved 16-bit buffers delivered by capture
//! - `AudioAnalyzer`, the 128-bin spectrum pushed into audio-reactive filters
//! - `PcmFileSource`, which streams a decoded file as capture buffers
//! - Synthetic signals for tests and demos

pub mod analyzer;
pub mod buffer;
pub mod loader;
pub mod synth;

pub use analyzer::{
    blackman_window, AnalyzerError, AudioAnalyzer, Spectrum, DECIMATION_STRIDE, SPECTRUM_GAIN,
    SPECTRUM_LEN,
};
pub use buffer::{AudioFormat, AudioSampleBuffer};
pub use loader::{AudioError, PcmFileSource};
