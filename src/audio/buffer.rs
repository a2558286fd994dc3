//! PCM sample buffers as delivered by the capture collaborator.

use serde::{Deserialize, Serialize};

/// Stream description of an audio track, passed through to the writer unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
        }
    }
}

/// Interleaved signed 16-bit samples with the presentation time of the first frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSampleBuffer {
    pub format: AudioFormat,
    pub samples: Vec<i16>,
    /// Presentation time of the first sample frame, in seconds.
    pub presentation_time: f64,
}

impl AudioSampleBuffer {
    pub fn new(format: AudioFormat, samples: Vec<i16>, presentation_time: f64) -> Self {
        Self {
            format,
            samples,
            presentation_time,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }

    /// Duration of the buffer in seconds.
    pub fn duration(&self) -> f64 {
        if self.format.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.format.sample_rate as f64
    }

    /// Presentation time just past the last frame.
    pub fn end_time(&self) -> f64 {
        self.presentation_time + self.duration()
    }
}
