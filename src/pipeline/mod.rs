//! Live pipeline: the entry points a capture session drives.
//!
//! Video frames are filtered, presented and, while recording, read back and
//! appended to the movie. Audio buffers feed the analyzer of an audio-reactive
//! filter and the movie's audio track.

mod config;

pub use config::{FrameRate, PipelineConfig};

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::{AudioAnalyzer, AudioSampleBuffer};
use crate::filters::{FilterError, FilterRegistry};
use crate::gpu::{GpuContext, GpuError, Image, RawFrame, TextureError, TextureProvider};
use crate::processor::FrameProcessor;
use crate::recorder::{MovieRecorder, RecorderDelegate, RecorderError, WriterFactory};
use crate::video::{FfmpegWriterFactory, VideoError, WriterSettings};

/// Errors that can occur while building or driving the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Texture error: {0}")]
    Texture(#[from] TextureError),
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),
    #[error("Video error: {0}")]
    Video(#[from] VideoError),
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),
    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Display collaborator, notified once per output frame.
pub trait FrameSink: Send + Sync {
    fn present(&self, image: &Arc<Image>);
}

/// Filters, analyzer and recorder wired behind the capture callbacks.
pub struct LivePipeline {
    ctx: Arc<GpuContext>,
    config: PipelineConfig,
    registry: FilterRegistry,
    processor: FrameProcessor,
    analyzer: Mutex<AudioAnalyzer>,
    recorder: MovieRecorder,
    sink: Option<Arc<dyn FrameSink>>,
    clock_origin: Mutex<Option<f64>>,
}

impl LivePipeline {
    /// Build every filter and a recorder writing `.mov` files through FFmpeg.
    pub fn new(ctx: Arc<GpuContext>, config: PipelineConfig) -> Result<Self, PipelineError> {
        let settings = WriterSettings::from_config(&config.recorder, config.frame_rate.fps());
        let factory = Arc::new(FfmpegWriterFactory::new(settings));
        Self::with_writer_factory(ctx, config, factory)
    }

    /// Like [`new`](Self::new) with a custom writer factory.
    pub fn with_writer_factory(
        ctx: Arc<GpuContext>,
        config: PipelineConfig,
        factory: Arc<dyn WriterFactory>,
    ) -> Result<Self, PipelineError> {
        let textures = Arc::new(TextureProvider::new(ctx.clone(), &config.resources_dir)?);
        let registry = FilterRegistry::new(&ctx)?;
        let initial = registry
            .get(&config.initial_filter)
            .ok_or_else(|| PipelineError::UnknownFilter(config.initial_filter.clone()))?;
        let processor = FrameProcessor::new(ctx.clone(), textures, initial);
        let recorder = MovieRecorder::new(config.recorder.clone(), factory);

        log::info!(
            "Live pipeline ready at {} fps with filter '{}'",
            config.frame_rate.fps(),
            config.initial_filter
        );
        Ok(Self {
            ctx,
            config,
            registry,
            processor,
            analyzer: Mutex::new(AudioAnalyzer::new()),
            recorder,
            sink: None,
            clock_origin: Mutex::new(None),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_recorder_delegate(mut self, delegate: Arc<dyn RecorderDelegate>) -> Self {
        self.recorder = self.recorder.with_delegate(delegate);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn processor(&self) -> &FrameProcessor {
        &self.processor
    }

    pub fn recorder(&self) -> &MovieRecorder {
        &self.recorder
    }

    /// Switch to the named filter on the next frame.
    pub fn select_filter(&self, name: &str) -> Result<(), PipelineError> {
        let filter = self
            .registry
            .get(name)
            .ok_or_else(|| PipelineError::UnknownFilter(name.to_string()))?;
        self.processor.set_filter(filter);
        Ok(())
    }

    /// Forward a normalized touch point to the current filter.
    pub fn update_user_control(&self, point: [f32; 2]) {
        self.processor.current_filter().update_user_control(point);
    }

    /// Seconds since the first frame; filters animate on this clock.
    fn filter_time(&self, presentation_time: f64) -> f32 {
        let mut origin = self.clock_origin.lock();
        let origin = *origin.get_or_insert(presentation_time);
        (presentation_time - origin).max(0.0) as f32
    }

    /// Capture callback for one video frame.
    pub fn on_video_frame(&self, frame: &RawFrame, presentation_time: f64) -> Option<Arc<Image>> {
        let time = self.filter_time(presentation_time);
        let output = self.processor.process(frame, time)?;

        if let Some(sink) = &self.sink {
            sink.present(&output);
        }
        if self.recorder.is_recording() {
            self.recorder.append_image(&self.ctx, &output, presentation_time);
        }
        Some(output)
    }

    /// Capture callback for one audio buffer.
    pub fn on_audio_buffer(&self, buffer: AudioSampleBuffer) {
        self.recorder.configure_audio_format(buffer.format);

        let filter = self.processor.current_filter();
        if filter.wants_audio() {
            self.analyzer.lock().feed(&buffer, filter.as_ref());
        }
        if self.recorder.is_recording() {
            self.recorder.append_audio(buffer);
        }
    }

    pub fn start_recording(&self) -> Result<PathBuf, PipelineError> {
        Ok(self.recorder.start()?)
    }

    /// Returns `false` when nothing was recording.
    pub fn stop_recording(&self) -> bool {
        self.recorder.stop()
    }
}
