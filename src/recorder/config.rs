use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::video::{AudioSettings, VideoSettings, VideoTransform};

/// Recorder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory new recordings are written to.
    pub output_dir: PathBuf,
    /// Seconds between the first accepted frame and the session start.
    pub start_offset: f64,
    /// Frames buffered ahead of the encoder before video is dropped.
    pub video_queue_depth: usize,
    /// Buffers queued ahead of the encoder before audio is dropped.
    pub audio_queue_depth: usize,
    pub video: VideoSettings,
    pub audio: AudioSettings,
    pub transform: VideoTransform,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir(),
            start_offset: 0.5,
            video_queue_depth: 8,
            audio_queue_depth: 32,
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
            transform: VideoTransform::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::Rotation;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RecorderConfig = serde_json::from_str(
            r#"{"output_dir": "/tmp/movies", "transform": {"rotation": "90"}}"#,
        )
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/movies"));
        assert_eq!(config.start_offset, 0.5);
        assert_eq!(config.video_queue_depth, 8);
        assert_eq!(config.audio_queue_depth, 32);
        assert_eq!(config.transform.rotation, Rotation::Deg90);
        assert!(!config.transform.mirrored);
    }
}
