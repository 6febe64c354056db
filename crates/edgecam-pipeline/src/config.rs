// edgecam-pipeline/src/config.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use edgecam_camera::{MAX_CAPACITY, MIN_CAPACITY};
use edgecam_detect::{DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ProcessingMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for one pipeline instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames buffered between camera and processing thread (1 or 2)
    pub channel_capacity: usize,
    /// Longest single wait of the processing thread for a frame
    pub take_timeout_ms: u64,
    /// How long `destroy` waits for the in-flight frame
    pub drain_timeout_ms: u64,
    /// Mode in effect before any control call
    pub initial_mode: ProcessingMode,
    /// Canny hysteresis thresholds
    pub canny_low: f32,
    pub canny_high: f32,
    /// Scale presented frames to the surface size
    pub scale_to_viewport: bool,
    /// Sliding window for the FPS figure
    pub fps_window_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1,
            take_timeout_ms: 100,
            drain_timeout_ms: 500,
            initial_mode: ProcessingMode::EdgeDetect,
            canny_low: DEFAULT_LOW_THRESHOLD,
            canny_high: DEFAULT_HIGH_THRESHOLD,
            scale_to_viewport: false,
            fps_window_secs: 1,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&self.channel_capacity) {
            return Err(ConfigError::Invalid(format!(
                "channel_capacity must be {MIN_CAPACITY}..={MAX_CAPACITY}, got {}",
                self.channel_capacity
            )));
        }
        if self.take_timeout_ms == 0 || self.drain_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.fps_window_secs == 0 {
            return Err(ConfigError::Invalid("fps_window_secs must be non-zero".into()));
        }
        if !(self.canny_low >= 0.0 && self.canny_low <= self.canny_high) {
            return Err(ConfigError::Invalid(format!(
                "canny thresholds out of order: low {}, high {}",
                self.canny_low, self.canny_high
            )));
        }
        Ok(())
    }

    pub fn take_timeout(&self) -> Duration {
        Duration::from_millis(self.take_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn fps_window(&self) -> Duration {
        Duration::from_secs(self.fps_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.initial_mode, ProcessingMode::EdgeDetect);
        assert_eq!((config.canny_low, config.canny_high), (50.0, 150.0));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "channel_capacity": 2, "initial_mode": "raw" }}"#).unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.channel_capacity, 2);
        assert_eq!(config.initial_mode, ProcessingMode::Raw);
        assert_eq!(config.drain_timeout_ms, 500);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = PipelineConfig { channel_capacity: 3, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.channel_capacity = 1;
        config.canny_low = 200.0;
        assert!(config.validate().is_err());

        config.canny_low = 50.0;
        config.take_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::from_json_file(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn config_serialization() {
        let config = PipelineConfig { scale_to_viewport: true, ..Default::default() };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""initial_mode":"edge_detect""#));
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
