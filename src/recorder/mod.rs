//! Movie recording: a state machine that muxes filtered frames and raw audio
//! into one file.
//!
//! ```text
//! Idle --start--> Configuring --first frame--> Writing --stop--> Finishing --done--> Idle
//!                       \___________________stop______________________/
//! ```
//!
//! Every transition happens under one mutex. The session start time is set
//! exactly once, when the first video frame arrives while configuring.

mod config;
mod media;
mod session;

pub use config::RecorderConfig;
pub use media::{MediaWriter, VideoFormat, VideoSample, WriterFactory};
pub use session::MovieRecorder;

use std::path::PathBuf;

use crate::video::VideoError;

/// Errors raised by a recording session.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("A recording is already in progress")]
    Busy,
    #[error("Failed to create writer: {0}")]
    Factory(String),
    #[error("Video error: {0}")]
    Video(#[from] VideoError),
    #[error("Track error: {0}")]
    Track(String),
    #[error("Recording finished without any media")]
    NoMedia,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recorder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Configuring,
    Writing,
    Finishing,
}

/// Receives session notifications. Called outside the recorder lock.
pub trait RecorderDelegate: Send + Sync {
    fn did_begin_writing(&self);

    fn did_finish_writing(&self, result: Result<PathBuf, RecorderError>);
}

/// Session notifications as channel messages.
#[derive(Debug)]
pub enum RecorderEvent {
    BeganWriting,
    FinishedWriting(Result<PathBuf, RecorderError>),
}

impl RecorderDelegate for crossbeam_channel::Sender<RecorderEvent> {
    fn did_begin_writing(&self) {
        let _ = self.send(RecorderEvent::BeganWriting);
    }

    fn did_finish_writing(&self, result: Result<PathBuf, RecorderError>) {
        let _ = self.send(RecorderEvent::FinishedWriting(result));
    }
}
