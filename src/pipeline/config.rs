use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::PipelineError;
use crate::recorder::RecorderConfig;

/// Capture frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameRate {
    #[default]
    Normal,
    Slowmo,
}

impl FrameRate {
    pub fn fps(&self) -> u32 {
        match self {
            FrameRate::Normal => 30,
            FrameRate::Slowmo => 240,
        }
    }
}

/// Live pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_rate: FrameRate,
    /// Directory holding named texture resources (`<name>.png`).
    pub resources_dir: PathBuf,
    pub recorder: RecorderConfig,
    /// Filter selected at startup.
    pub initial_filter: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_rate: FrameRate::Normal,
            resources_dir: PathBuf::from("resources"),
            recorder: RecorderConfig::default(),
            initial_filter: "passthrough".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.frame_rate.fps(), 30);
        assert_eq!(config.initial_filter, "passthrough");
        assert_eq!(config.recorder.start_offset, 0.5);
    }

    #[test]
    fn test_config_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"frame_rate": "slowmo", "initial_filter": "invert"}"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.frame_rate, FrameRate::Slowmo);
        assert_eq!(config.frame_rate.fps(), 240);
        assert_eq!(config.initial_filter, "invert");
        assert_eq!(config.recorder, RecorderConfig::default());

        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = PipelineConfig::from_json_file("/nonexistent/pipeline.json");
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }
}
