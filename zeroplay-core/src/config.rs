//! Session configuration, loadable from JSON.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::Look;
use crate::pixel_convert::{ColorMode, VideoRange};
use crate::ring::DEFAULT_RING_CAPACITY;
use crate::sync::SyncSettings;

const MIN_RING_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Startup color mode, 0..=14.
    pub color_mode: u8,
    /// 0 = TV range, 1 = PC range.
    pub video_range: u8,
    pub ring_capacity: usize,
    /// Most stereo sample frames handed to the sink per tick.
    pub max_audio_batch: usize,
    /// Most decoded bytes one refill call may produce.
    pub refill_budget: usize,
    /// Audio lead is `rate / lead_divisor` samples.
    pub lead_divisor: u32,
    pub max_frame_bytes: usize,
    pub max_header_loops: usize,
    /// Also scan the movie data on open and warn when idx1 disagrees.
    pub verify_index: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            color_mode: 0,
            video_range: 0,
            ring_capacity: DEFAULT_RING_CAPACITY,
            max_audio_batch: 4096,
            refill_budget: 16 * 1024,
            lead_divisor: 10,
            max_frame_bytes: 1024 * 1024,
            max_header_loops: 10,
            verify_index: false,
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if ColorMode::from_index(self.color_mode).is_none() {
            return invalid("color_mode", "must be 0..=14");
        }
        if VideoRange::from_index(self.video_range).is_none() {
            return invalid("video_range", "must be 0 (TV) or 1 (PC)");
        }
        if self.max_audio_batch == 0 {
            return invalid("max_audio_batch", "must be non-zero");
        }
        if self.refill_budget == 0 {
            return invalid("refill_budget", "must be non-zero");
        }
        if self.max_frame_bytes == 0 {
            return invalid("max_frame_bytes", "must be non-zero");
        }
        if self.lead_divisor == 0 {
            return invalid("lead_divisor", "must be non-zero");
        }
        if self.ring_capacity < MIN_RING_CAPACITY {
            return invalid("ring_capacity", "must be at least 16 KiB");
        }
        if self.ring_capacity % 4 != 0 {
            return invalid("ring_capacity", "must be a multiple of 4");
        }
        Ok(())
    }

    /// Startup look. Out-of-range indices fall back to the defaults.
    pub fn look(&self) -> Look {
        Look {
            color_mode: ColorMode::from_index(self.color_mode).unwrap_or_default(),
            range: VideoRange::from_index(self.video_range).unwrap_or_default(),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            ring_capacity: self.ring_capacity,
            max_audio_batch: self.max_audio_batch,
            refill_budget: self.refill_budget,
            lead_divisor: self.lead_divisor,
        }
    }
}
