//! [`MediaWriter`] backed by [`MovieEncoder`] on a dedicated thread.
//!
//! Each track feeds the thread through a bounded queue. A full queue means the
//! encoder is behind, and the recorder drops the sample instead of blocking.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, never, select, Receiver, Sender};

use super::encoder::{AudioSettings, MovieEncoder, VideoError, VideoSettings};
use super::transform::orient_rgba;
use crate::audio::{AudioFormat, AudioSampleBuffer};
use crate::recorder::{
    MediaWriter, RecorderConfig, RecorderError, VideoFormat, VideoSample, WriterFactory,
};

/// Encoder settings shared by every writer a factory creates.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub video: VideoSettings,
    pub audio: AudioSettings,
    pub frame_rate: u32,
    pub video_queue_depth: usize,
    pub audio_queue_depth: usize,
}

impl WriterSettings {
    pub fn from_config(config: &RecorderConfig, frame_rate: u32) -> Self {
        Self {
            video: config.video.clone(),
            audio: config.audio.clone(),
            frame_rate,
            video_queue_depth: config.video_queue_depth.max(1),
            audio_queue_depth: config.audio_queue_depth.max(1),
        }
    }
}

/// Creates one [`FfmpegWriter`] per recording.
#[derive(Debug, Clone)]
pub struct FfmpegWriterFactory {
    settings: WriterSettings,
}

impl FfmpegWriterFactory {
    pub fn new(settings: WriterSettings) -> Self {
        Self { settings }
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn create(&self, path: &Path) -> Result<Box<dyn MediaWriter>, RecorderError> {
        if path.exists() {
            return Err(RecorderError::Factory(format!(
                "{} already exists",
                path.display()
            )));
        }
        Ok(Box::new(FfmpegWriter::new(path, self.settings.clone())))
    }
}

/// Writes one `.mov` file: H.264 video plus optional AAC audio.
pub struct FfmpegWriter {
    path: PathBuf,
    settings: WriterSettings,
    video_format: Option<VideoFormat>,
    audio_format: Option<AudioFormat>,
    video_tx: Option<Sender<VideoSample>>,
    audio_tx: Option<Sender<AudioSampleBuffer>>,
    worker: Option<JoinHandle<Result<u64, VideoError>>>,
    /// Cleared when the writer thread exits, including when opening the file fails.
    running: Arc<AtomicBool>,
}

impl FfmpegWriter {
    pub fn new(path: impl Into<PathBuf>, settings: WriterSettings) -> Self {
        Self {
            path: path.into(),
            settings,
            video_format: None,
            audio_format: None,
            video_tx: None,
            audio_tx: None,
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn accepts<T>(&self, tx: Option<&Sender<T>>) -> bool {
        self.running.load(Ordering::Acquire) && tx.is_some_and(|tx| !tx.is_full())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn discard_file(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

impl MediaWriter for FfmpegWriter {
    fn add_video_track(&mut self, format: VideoFormat) -> Result<(), RecorderError> {
        if self.worker.is_some() {
            return Err(RecorderError::Track("session already started".into()));
        }
        self.video_format = Some(format);
        Ok(())
    }

    fn add_audio_track(&mut self, format: AudioFormat) -> Result<(), RecorderError> {
        if self.worker.is_some() {
            return Err(RecorderError::Track("session already started".into()));
        }
        self.audio_format = Some(format);
        Ok(())
    }

    /// Spawn the writer thread. The thread opens the file itself, so this
    /// returns without waiting on FFmpeg; an open failure stops the thread,
    /// after which appends are refused and [`finish`](MediaWriter::finish)
    /// reports the error.
    fn start_session(&mut self, start_time: f64) -> Result<(), RecorderError> {
        if self.worker.is_some() {
            return Err(RecorderError::Track("session already started".into()));
        }
        let video_format = self
            .video_format
            .ok_or_else(|| RecorderError::Track("no video track".into()))?;

        let (video_tx, video_rx) = bounded(self.settings.video_queue_depth);
        let (audio_tx, audio_rx) = match self.audio_format {
            Some(_) => {
                let (tx, rx) = bounded(self.settings.audio_queue_depth);
                (Some(tx), rx)
            }
            None => (None, never()),
        };

        let job = WriterJob {
            path: self.path.clone(),
            settings: self.settings.clone(),
            video_format,
            audio_format: self.audio_format,
            start_time,
        };
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name("movie-writer".into())
            .spawn(move || {
                let result = job.run(video_rx, audio_rx);
                running.store(false, Ordering::Release);
                result
            })
            .inspect_err(|_| self.running.store(false, Ordering::Release))?;

        self.video_tx = Some(video_tx);
        self.audio_tx = audio_tx;
        self.worker = Some(handle);
        Ok(())
    }

    fn is_ready_for_more_video(&self) -> bool {
        self.accepts(self.video_tx.as_ref())
    }

    fn is_ready_for_more_audio(&self) -> bool {
        self.accepts(self.audio_tx.as_ref())
    }

    fn append_video(&mut self, sample: VideoSample) -> bool {
        self.video_tx
            .as_ref()
            .is_some_and(|tx| tx.try_send(sample).is_ok())
    }

    fn append_audio(&mut self, buffer: AudioSampleBuffer) -> bool {
        self.audio_tx
            .as_ref()
            .is_some_and(|tx| tx.try_send(buffer).is_ok())
    }

    fn mark_video_finished(&mut self) {
        self.video_tx = None;
    }

    fn mark_audio_finished(&mut self) {
        self.audio_tx = None;
    }

    fn finish(mut self: Box<Self>) -> Result<PathBuf, RecorderError> {
        self.video_tx = None;
        self.audio_tx = None;

        let Some(handle) = self.worker.take() else {
            self.discard_file();
            return Err(RecorderError::NoMedia);
        };
        let result = handle
            .join()
            .map_err(|_| RecorderError::Track("writer thread panicked".into()))?;

        match result {
            Ok(0) => {
                self.discard_file();
                Err(RecorderError::NoMedia)
            }
            Ok(frames) => {
                log::info!("Wrote {} frames to {}", frames, self.path.display());
                Ok(self.path.clone())
            }
            Err(e) => {
                self.discard_file();
                Err(e.into())
            }
        }
    }
}

/// Everything the writer thread needs, moved onto it at session start.
struct WriterJob {
    path: PathBuf,
    settings: WriterSettings,
    video_format: VideoFormat,
    audio_format: Option<AudioFormat>,
    start_time: f64,
}

impl WriterJob {
    fn open(&self) -> Result<MovieEncoder, VideoError> {
        let (width, height) = self.video_format.output_size();
        let mut encoder = MovieEncoder::create(&self.path)?;
        encoder.add_video(width, height, self.settings.frame_rate, &self.settings.video)?;
        if let Some(format) = self.audio_format {
            encoder.add_audio(format, &self.settings.audio)?;
        }
        encoder.write_header()?;
        Ok(encoder)
    }

    fn run(
        self,
        video_rx: Receiver<VideoSample>,
        audio_rx: Receiver<AudioSampleBuffer>,
    ) -> Result<u64, VideoError> {
        let mut encoder = self.open().inspect_err(|e| {
            log::error!("Failed to open {}: {}", self.path.display(), e);
        })?;

        let idle_video = never();
        let idle_audio = never();
        let mut video_open = true;
        let mut audio_open = self.audio_format.is_some();
        while video_open || audio_open {
            select! {
                recv(if video_open { &video_rx } else { &idle_video }) -> msg => match msg {
                    Ok(sample) => self.write_video(&mut encoder, sample)?,
                    Err(_) => video_open = false,
                },
                recv(if audio_open { &audio_rx } else { &idle_audio }) -> msg => match msg {
                    Ok(buffer) => self.write_audio(&mut encoder, buffer)?,
                    Err(_) => audio_open = false,
                },
            }
        }

        encoder.finish()
    }

    fn write_video(&self, encoder: &mut MovieEncoder, sample: VideoSample) -> Result<(), VideoError> {
        let pts_ms = ((sample.presentation_time - self.start_time) * 1000.0).round() as i64;
        if pts_ms < 0 {
            log::debug!("Trimming frame at {:.3}s before session start", sample.presentation_time);
            return Ok(());
        }
        if sample.width != self.video_format.width || sample.height != self.video_format.height {
            log::warn!(
                "Dropping {}x{} frame on a {}x{} track",
                sample.width,
                sample.height,
                self.video_format.width,
                self.video_format.height
            );
            return Ok(());
        }

        let (rgba, width, _) = match orient_rgba(
            &sample.rgba,
            sample.width,
            sample.height,
            &self.video_format.transform,
        ) {
            Ok(oriented) => oriented,
            Err(e) => {
                log::warn!("Dropping frame at {:.3}s: {}", sample.presentation_time, e);
                return Ok(());
            }
        };
        if !encoder.write_video(&rgba, width, pts_ms)? {
            log::debug!("Skipping frame with non-increasing pts {}", pts_ms);
        }
        Ok(())
    }

    fn write_audio(&self, encoder: &mut MovieEncoder, buffer: AudioSampleBuffer) -> Result<(), VideoError> {
        let Some(format) = self.audio_format else {
            return Ok(());
        };
        if buffer.format != format {
            log::warn!("Dropping audio buffer with format {:?}", buffer.format);
            return Ok(());
        }
        let rate = format.sample_rate as f64;
        let channels = format.channels as usize;

        let skip = if buffer.presentation_time < self.start_time {
            ((self.start_time - buffer.presentation_time) * rate).ceil() as usize
        } else {
            0
        };
        if skip >= buffer.frames() {
            return Ok(());
        }
        let first = buffer.presentation_time + skip as f64 / rate;
        let pts = ((first - self.start_time) * rate).round() as i64;
        encoder.write_audio(&buffer.samples[skip * channels..], pts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synth::sine_buffers;
    use crate::video::VideoTransform;

    fn settings() -> WriterSettings {
        WriterSettings::from_config(&RecorderConfig::default(), 30)
    }

    fn video_format() -> VideoFormat {
        VideoFormat {
            width: 64,
            height: 48,
            transform: VideoTransform::default(),
        }
    }

    fn job(path: PathBuf, audio_format: Option<AudioFormat>, start_time: f64) -> WriterJob {
        WriterJob {
            path,
            settings: settings(),
            video_format: video_format(),
            audio_format,
            start_time,
        }
    }

    #[test]
    fn test_queue_depths_never_zero() {
        let config = RecorderConfig {
            video_queue_depth: 0,
            ..RecorderConfig::default()
        };
        let settings = WriterSettings::from_config(&config, 30);
        assert_eq!(settings.video_queue_depth, 1);
        assert_eq!(settings.audio_queue_depth, 32);
    }

    #[test]
    fn test_finish_without_session_is_no_media() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Box::new(FfmpegWriter::new(dir.path().join("empty.mov"), settings()));
        assert!(!writer.is_ready_for_more_video());
        assert!(matches!(writer.finish(), Err(RecorderError::NoMedia)));
    }

    #[test]
    fn test_start_requires_video_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FfmpegWriter::new(dir.path().join("novideo.mov"), settings());
        assert!(matches!(
            writer.start_session(0.0),
            Err(RecorderError::Track(_))
        ));
    }

    #[test]
    fn test_open_failure_surfaces_at_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("movie.mov");
        let mut writer = Box::new(FfmpegWriter::new(&path, settings()));
        writer.add_video_track(video_format()).unwrap();
        writer.start_session(0.0).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while writer.is_ready_for_more_video() && std::time::Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert!(!writer.is_ready_for_more_video());
        assert!(!writer.append_video(VideoSample {
            width: 64,
            height: 48,
            rgba: vec![0; 64 * 48 * 4],
            presentation_time: 0.0,
        }));
        assert!(matches!(writer.finish(), Err(RecorderError::Video(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_audio_buffers_keep_their_media_time() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat {
            sample_rate: 44_100,
            channels: 1,
        };
        let job = job(dir.path().join("gap.mov"), Some(format), 0.5);
        let Ok(mut encoder) = job.open() else {
            // Encoders not available in this FFmpeg build.
            return;
        };

        let buffers = sine_buffers(440.0, format, 1000, 4, 0.5);
        job.write_audio(&mut encoder, buffers[0].clone()).unwrap();
        assert_eq!(encoder.audio_cursor(), Some(1000));
        // Buffer 1 never arrives: buffer 2 still starts at its own time.
        job.write_audio(&mut encoder, buffers[2].clone()).unwrap();
        assert_eq!(encoder.audio_cursor(), Some(3000));

        // A buffer overlapping what was queued only contributes its tail.
        let mut late = buffers[3].clone();
        late.presentation_time -= 500.0 / 44_100.0;
        job.write_audio(&mut encoder, late).unwrap();
        assert_eq!(encoder.audio_cursor(), Some(3500));
        assert!(encoder.finish().is_ok());
    }

    #[test]
    fn test_short_frame_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path().join("short.mov"), None, 0.0);
        let Ok(mut encoder) = job.open() else {
            return;
        };
        let short = VideoSample {
            width: 64,
            height: 48,
            rgba: vec![0; 64 * 4],
            presentation_time: 0.1,
        };
        assert!(job.write_video(&mut encoder, short).is_ok());
        assert_eq!(encoder.video_frames(), 0);
    }

    #[test]
    fn test_writes_mov_with_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.mov");
        let format = AudioFormat {
            sample_rate: 44_100,
            channels: 1,
        };
        if job(dir.path().join("check.mov"), Some(format), 0.0).open().is_err() {
            // Encoders not available in this FFmpeg build.
            return;
        }

        let mut writer = Box::new(FfmpegWriter::new(&path, settings()));
        writer.add_video_track(video_format()).unwrap();
        writer.add_audio_track(format).unwrap();
        writer.start_session(0.5).unwrap();

        for i in 0..30 {
            let t = i as f64 / 30.0;
            while !writer.is_ready_for_more_video() {
                std::thread::yield_now();
            }
            assert!(writer.append_video(VideoSample {
                width: 64,
                height: 48,
                rgba: vec![(i * 8) as u8; 64 * 48 * 4],
                presentation_time: t,
            }));
        }
        for buffer in sine_buffers(440.0, format, 1024, 40, 0.0) {
            while !writer.is_ready_for_more_audio() {
                std::thread::yield_now();
            }
            assert!(writer.append_audio(buffer));
        }

        writer.mark_video_finished();
        writer.mark_audio_finished();
        let written = writer.finish().unwrap();
        assert_eq!(written, path);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
