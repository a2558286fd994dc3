use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use super::{
    MediaWriter, RecorderConfig, RecorderDelegate, RecorderError, RecorderState, VideoFormat,
    VideoSample, WriterFactory,
};
use crate::audio::{AudioFormat, AudioSampleBuffer};
use crate::gpu::{GpuContext, Image};

#[derive(Default)]
struct Session {
    state: RecorderState,
    writer: Option<Box<dyn MediaWriter>>,
    path: Option<PathBuf>,
    start_time: Option<f64>,
    video_format: Option<VideoFormat>,
    /// Latest frame seen while waiting to learn the audio format.
    pending_video: Option<VideoSample>,
    audio_format: Option<AudioFormat>,
    audio_track: bool,
    video_frames: u64,
}

impl Session {
    /// Forget the finished session. The audio format outlives sessions.
    fn reset(&mut self) {
        let audio_format = self.audio_format;
        *self = Session {
            audio_format,
            ..Session::default()
        };
    }
}

/// Outcome of an append made under the lock, acted on after it is released.
enum Notice {
    None,
    Began,
    /// The session was abandoned; the writer still has to clean up its file.
    Failed(RecorderError, Option<Box<dyn MediaWriter>>),
}

/// Records filtered frames and captured audio into movie files.
pub struct MovieRecorder {
    config: RecorderConfig,
    factory: Arc<dyn WriterFactory>,
    delegate: Option<Arc<dyn RecorderDelegate>>,
    session: Arc<Mutex<Session>>,
    finisher: Mutex<Option<JoinHandle<()>>>,
    recordings: AtomicU64,
    dropped_video: AtomicU64,
    dropped_audio: AtomicU64,
}

impl MovieRecorder {
    pub fn new(config: RecorderConfig, factory: Arc<dyn WriterFactory>) -> Self {
        Self {
            config,
            factory,
            delegate: None,
            session: Arc::new(Mutex::new(Session::default())),
            finisher: Mutex::new(None),
            recordings: AtomicU64::new(0),
            dropped_video: AtomicU64::new(0),
            dropped_audio: AtomicU64::new(0),
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn RecorderDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> RecorderState {
        self.session.lock().state
    }

    pub fn is_recording(&self) -> bool {
        matches!(
            self.state(),
            RecorderState::Configuring | RecorderState::Writing
        )
    }

    /// Presentation time the current session starts at, once its first frame arrived.
    pub fn session_start(&self) -> Option<f64> {
        self.session.lock().start_time
    }

    /// File the current session writes to.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.session.lock().path.clone()
    }

    pub fn dropped_video(&self) -> u64 {
        self.dropped_video.load(Ordering::Relaxed)
    }

    pub fn dropped_audio(&self) -> u64 {
        self.dropped_audio.load(Ordering::Relaxed)
    }

    /// Begin a session. Only valid while idle.
    ///
    /// Returns the path the movie will be written to.
    pub fn start(&self) -> Result<PathBuf, RecorderError> {
        let mut session = self.session.lock();
        if session.state != RecorderState::Idle {
            return Err(RecorderError::Busy);
        }

        std::fs::create_dir_all(&self.config.output_dir)?;
        let path = self.next_path();
        let writer = self.factory.create(&path)?;

        session.reset();
        session.state = RecorderState::Configuring;
        session.writer = Some(writer);
        session.path = Some(path.clone());
        log::info!("Recording to {}", path.display());
        Ok(path)
    }

    fn next_path(&self) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let n = self.recordings.fetch_add(1, Ordering::Relaxed);
        self.config
            .output_dir
            .join(format!("recording-{}-{}.mov", millis, n))
    }

    /// Remember the capture audio format. Called for every buffer, recording or not.
    pub fn configure_audio_format(&self, format: AudioFormat) {
        self.session.lock().audio_format = Some(format);
    }

    /// Whether a video sample offered now would be accepted.
    pub fn accepts_video(&self) -> bool {
        let session = self.session.lock();
        match session.state {
            RecorderState::Configuring => true,
            RecorderState::Writing => session
                .writer
                .as_ref()
                .is_some_and(|w| w.is_ready_for_more_video()),
            _ => false,
        }
    }

    /// Offer one filtered frame. Returns whether it was taken into the session.
    ///
    /// The first frame of a session fixes the start at its presentation time
    /// plus the configured offset. Tracks are set up right away when the audio
    /// format is known. Otherwise the latest frame is held until audio arrives
    /// or a frame reaches the start, whichever comes first; in the second case
    /// the movie has no audio track.
    pub fn append_video(&self, sample: VideoSample) -> bool {
        let (accepted, notice) = {
            let mut session = self.session.lock();
            match session.state {
                RecorderState::Idle | RecorderState::Finishing => return false,
                RecorderState::Configuring => self.configure_with_video(&mut session, sample),
                RecorderState::Writing => (self.append_video_locked(&mut session, sample), Notice::None),
            }
        };
        self.notify(notice);
        accepted
    }

    fn configure_with_video(&self, session: &mut Session, sample: VideoSample) -> (bool, Notice) {
        let Some(start) = session.start_time else {
            let start = sample.presentation_time + self.config.start_offset;
            session.start_time = Some(start);
            session.video_format = Some(VideoFormat::for_sample(&sample, self.config.transform));
            session.pending_video = Some(sample);
            return match session.audio_format {
                Some(format) => self.begin_writing(session, Some(format)),
                None => {
                    log::debug!("Waiting for the audio format until {:.3}s", start);
                    (true, Notice::None)
                }
            };
        };

        if sample.presentation_time < start {
            session.pending_video = Some(sample);
            return (true, Notice::None);
        }
        log::info!("No audio before the session start, recording video only");
        match self.begin_writing(session, None) {
            (_, Notice::Began) => (self.append_video_locked(session, sample), Notice::Began),
            (_, notice) => (false, notice),
        }
    }

    /// Add the tracks, start the writer and flush the held frame.
    ///
    /// Returns whether the held frame was appended.
    fn begin_writing(&self, session: &mut Session, audio: Option<AudioFormat>) -> (bool, Notice) {
        let configured = match (session.writer.as_mut(), session.video_format, session.start_time) {
            (Some(writer), Some(video), Some(start)) => configure_writer(writer.as_mut(), video, audio, start),
            _ => Err(RecorderError::Track("no writer for session".into())),
        };

        match configured {
            Ok(()) => {
                session.audio_track = audio.is_some();
                session.state = RecorderState::Writing;
                log::info!(
                    "Recording session starts at {:.3}s{}",
                    session.start_time.unwrap_or_default(),
                    if audio.is_some() { " with audio" } else { "" }
                );
                let flushed = match session.pending_video.take() {
                    Some(held) => self.append_video_locked(session, held),
                    None => false,
                };
                (flushed, Notice::Began)
            }
            Err(e) => {
                log::warn!("Failed to configure writer: {}", e);
                let writer = session.writer.take();
                session.reset();
                (false, Notice::Failed(e, writer))
            }
        }
    }

    /// Deliver a notice once the session lock is released.
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::None => {}
            Notice::Began => {
                if let Some(delegate) = &self.delegate {
                    delegate.did_begin_writing();
                }
            }
            Notice::Failed(e, writer) => {
                if let Some(Err(cleanup)) = writer.map(|w| w.finish()) {
                    log::debug!("Abandoned writer: {}", cleanup);
                }
                if let Some(delegate) = &self.delegate {
                    delegate.did_finish_writing(Err(e));
                }
            }
        }
    }

    fn append_video_locked(&self, session: &mut Session, sample: VideoSample) -> bool {
        let Some(writer) = session.writer.as_mut() else {
            return false;
        };
        if !writer.is_ready_for_more_video() || !writer.append_video(sample) {
            self.dropped_video.fetch_add(1, Ordering::Relaxed);
            log::warn!("Writer not ready, dropping video frame");
            return false;
        }
        session.video_frames += 1;
        true
    }

    /// Read back a filtered image and append it, only if it would be accepted.
    pub fn append_image(&self, ctx: &GpuContext, image: &Image, presentation_time: f64) -> bool {
        if !self.accepts_video() {
            return false;
        }
        match image.read_rgba(ctx) {
            Ok(rgba) => self.append_video(VideoSample {
                width: image.width(),
                height: image.height(),
                rgba,
                presentation_time,
            }),
            Err(e) => {
                self.dropped_video.fetch_add(1, Ordering::Relaxed);
                log::warn!("Failed to read back frame for recording: {}", e);
                false
            }
        }
    }

    /// Offer one audio buffer.
    ///
    /// The first buffer after a session's first frame adds the audio track.
    /// Appended only while writing with an audio track.
    pub fn append_audio(&self, buffer: AudioSampleBuffer) -> bool {
        let (appended, notice) = {
            let mut session = self.session.lock();
            session.audio_format = Some(buffer.format);
            let notice = if session.state == RecorderState::Configuring && session.start_time.is_some() {
                self.begin_writing(&mut session, Some(buffer.format)).1
            } else {
                Notice::None
            };
            let appended = session.state == RecorderState::Writing
                && session.audio_track
                && self.append_audio_locked(&mut session, buffer);
            (appended, notice)
        };
        self.notify(notice);
        appended
    }

    fn append_audio_locked(&self, session: &mut Session, buffer: AudioSampleBuffer) -> bool {
        let Some(writer) = session.writer.as_mut() else {
            return false;
        };
        if !writer.is_ready_for_more_audio() || !writer.append_audio(buffer) {
            self.dropped_audio.fetch_add(1, Ordering::Relaxed);
            log::warn!("Writer not ready, dropping audio buffer");
            return false;
        }
        true
    }

    /// End the session and finalize the file on a background thread.
    ///
    /// Returns `false` when there was nothing to stop.
    pub fn stop(&self) -> bool {
        let (writer, frames, notice) = {
            let mut session = self.session.lock();
            match session.state {
                RecorderState::Configuring | RecorderState::Writing => {}
                _ => return false,
            }
            // A frame held for the audio format is written video-only.
            let notice = if session.pending_video.is_some() {
                self.begin_writing(&mut session, None).1
            } else {
                Notice::None
            };
            if let Notice::Failed(..) = notice {
                drop(session);
                self.notify(notice);
                return true;
            }
            if let Some(writer) = session.writer.as_mut() {
                writer.mark_video_finished();
                writer.mark_audio_finished();
            }
            session.state = RecorderState::Finishing;
            (session.writer.take(), session.video_frames, notice)
        };
        self.notify(notice);

        let session = self.session.clone();
        let delegate = self.delegate.clone();
        let handle = std::thread::spawn(move || {
            let result = match writer {
                Some(writer) if frames > 0 => writer.finish(),
                Some(writer) => {
                    // Let the writer clean up its partial file.
                    let _ = writer.finish();
                    Err(RecorderError::NoMedia)
                }
                None => Err(RecorderError::NoMedia),
            };
            match &result {
                Ok(path) => log::info!("Recording finished: {}", path.display()),
                Err(e) => log::warn!("Recording failed: {}", e),
            }
            session.lock().reset();
            if let Some(delegate) = delegate {
                delegate.did_finish_writing(result);
            }
        });

        if let Some(previous) = self.finisher.lock().replace(handle) {
            let _ = previous.join();
        }
        true
    }

    /// Block until the last stopped session has been finalized.
    pub fn wait_until_idle(&self) {
        if let Some(handle) = self.finisher.lock().take() {
            let _ = handle.join();
        }
    }
}

fn configure_writer(
    writer: &mut dyn MediaWriter,
    video: VideoFormat,
    audio: Option<AudioFormat>,
    start: f64,
) -> Result<(), RecorderError> {
    writer.add_video_track(video)?;
    if let Some(format) = audio {
        writer.add_audio_track(format)?;
    }
    writer.start_session(start)
}

impl Drop for MovieRecorder {
    fn drop(&mut self) {
        self.stop();
        self.wait_until_idle();
    }
}
