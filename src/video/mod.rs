//! Movie writing using FFmpeg via rsmpeg.
//!
//! - `encoder`: H.264 + AAC muxing into a `.mov` container
//! - `transform`: orientation and mirroring of recorded frames
//! - `writer`: the recorder's [`MediaWriter`](crate::recorder::MediaWriter) on a writer thread

pub mod encoder;
pub mod transform;
pub mod writer;

pub use encoder::{AudioSettings, MovieEncoder, VideoError, VideoSettings};
pub use transform::{orient_rgba, Rotation, VideoTransform};
pub use writer::{FfmpegWriter, FfmpegWriterFactory, WriterSettings};
