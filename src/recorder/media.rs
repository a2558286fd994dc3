use std::path::{Path, PathBuf};

use super::RecorderError;
use crate::audio::{AudioFormat, AudioSampleBuffer};
use crate::video::VideoTransform;

/// One filtered frame read back from the GPU, tightly packed RGBA.
#[derive(Debug, Clone)]
pub struct VideoSample {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub presentation_time: f64,
}

/// Video track format: the incoming frame size plus the transform applied
/// before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub transform: VideoTransform,
}

impl VideoFormat {
    pub fn for_sample(sample: &VideoSample, transform: VideoTransform) -> Self {
        Self {
            width: sample.width,
            height: sample.height,
            transform,
        }
    }

    /// Frame size once the transform has been applied.
    pub fn output_size(&self) -> (u32, u32) {
        self.transform.output_size(self.width, self.height)
    }
}

/// A movie file being written, with one video and at most one audio track.
///
/// Appends never block: callers check `is_ready_for_more_*` first and drop
/// the sample when the writer is behind.
pub trait MediaWriter: Send {
    fn add_video_track(&mut self, format: VideoFormat) -> Result<(), RecorderError>;

    fn add_audio_track(&mut self, format: AudioFormat) -> Result<(), RecorderError>;

    /// Fix the session start. Samples before it are trimmed.
    ///
    /// Called with the recorder lock held, so it must not block on I/O.
    fn start_session(&mut self, start_time: f64) -> Result<(), RecorderError>;

    fn is_ready_for_more_video(&self) -> bool;

    fn is_ready_for_more_audio(&self) -> bool;

    /// Returns whether the sample was accepted.
    fn append_video(&mut self, sample: VideoSample) -> bool;

    /// Returns whether the buffer was accepted.
    fn append_audio(&mut self, buffer: AudioSampleBuffer) -> bool;

    fn mark_video_finished(&mut self);

    fn mark_audio_finished(&mut self);

    /// Drain, close and return the written file.
    fn finish(self: Box<Self>) -> Result<PathBuf, RecorderError>;
}

/// Creates a writer for each recording session.
pub trait WriterFactory: Send + Sync {
    fn create(&self, path: &Path) -> Result<Box<dyn MediaWriter>, RecorderError>;
}
