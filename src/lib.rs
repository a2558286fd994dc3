//! Camera Filter Core
//!
//! Real-time GPU filters for a live camera feed, with audio-reactive
//! parameters and movie recording.
//!
//! # Features
//!
//! - Camera frame conversion (BGRA, bi-planar YCbCr) to GPU images via wgpu
//! - Compute-shader filters and timed transitions, validated with naga
//! - 128-bin audio spectrum via RustFFT driving audio-reactive filters
//! - Movie recording (H.264 + AAC in `.mov`) via FFmpeg
//! - Audio file decoding via Symphonia for offline sources

pub mod audio;
pub mod filters;
pub mod gpu;
pub mod params;
pub mod pipeline;
pub mod processor;
pub mod recorder;
pub mod video;

// Re-export commonly used types
pub use audio::{AudioAnalyzer, AudioFormat, AudioSampleBuffer, Spectrum};
pub use filters::{create_filter, Filter, FilterKind, FilterRegistry, Transition, TransitionKind};
pub use gpu::{GpuContext, Image, PixelLayout, RawFrame, TextureProvider};
pub use params::{ParameterSet, SlotRole};
pub use pipeline::{FrameRate, FrameSink, LivePipeline, PipelineConfig, PipelineError};
pub use processor::FrameProcessor;
pub use recorder::{MovieRecorder, RecorderConfig, RecorderDelegate, RecorderError, RecorderEvent};
pub use video::{FfmpegWriterFactory, VideoError, VideoTransform};
