//! Stream configuration (config.toml)
//!
//! Handles loading, saving, validating and providing defaults for stream
//! settings. Settings are stored in TOML format in the platform-specific
//! config directory, or in any file the caller names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backpressure::BackpressurePolicy;
use crate::device::DeviceSpec;

/// Config file name inside [`config_dir`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Stream configuration.
///
/// Everything is fixed once the stream is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Hardware sample rate in Hz (default: 44100)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Channel count, 1 or 2 (default: 2)
    #[serde(default = "default_channels")]
    pub channels: u8,
    /// Driver chunk size in sample frames (default: 1024)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
    /// Admission ceiling in queued bytes (default: 88200, 0.5s of 44.1kHz stereo S16)
    #[serde(default = "default_threshold_bytes")]
    pub threshold_bytes: u32,
    /// Overrun handling (default: drop_incoming)
    #[serde(default)]
    pub policy: BackpressurePolicy,
    /// Device queue size in bytes; must exceed the threshold (default: 4x threshold)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ring_capacity_bytes: Option<u32>,
}

fn default_sample_rate() -> u32 {
    44_100
}
fn default_channels() -> u8 {
    2
}
fn default_buffer_size() -> u32 {
    1024
}
fn default_threshold_bytes() -> u32 {
    88_200
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            buffer_size: default_buffer_size(),
            threshold_bytes: default_threshold_bytes(),
            policy: BackpressurePolicy::default(),
            ring_capacity_bytes: None,
        }
    }
}

/// Error type for config loading, saving and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Invalid(String),
}

impl StreamConfig {
    /// Effective device queue size in bytes
    pub fn ring_capacity(&self) -> usize {
        let bytes = self
            .ring_capacity_bytes
            .map(u64::from)
            .unwrap_or_else(|| u64::from(self.threshold_bytes) * 4)
            .max(u64::from(self.threshold_bytes) + 1);
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }

    /// Bytes of audio the hardware consumes per second
    pub fn bytes_per_second(&self) -> u32 {
        // S16 samples
        self.sample_rate
            .saturating_mul(u32::from(self.channels))
            .saturating_mul(2)
    }

    /// Device parameters for [`PlaybackDevice::open`](crate::PlaybackDevice::open)
    pub fn device_spec(&self) -> DeviceSpec {
        DeviceSpec {
            sample_rate: self.sample_rate,
            channels: self.channels,
            buffer_size: self.buffer_size,
            queue_capacity: self.ring_capacity(),
        }
    }

    /// Check every field is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "sample_rate must be greater than 0".to_string(),
            ));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(ConfigError::Invalid(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "buffer_size must be greater than 0".to_string(),
            ));
        }
        match self.ring_capacity_bytes {
            Some(ring) if ring <= self.threshold_bytes => {
                return Err(ConfigError::Invalid(format!(
                    "ring_capacity_bytes ({}) must exceed threshold_bytes ({})",
                    ring, self.threshold_bytes
                )));
            }
            _ => {}
        }
        Ok(())
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this config as TOML, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\pcm-queue\config`
/// On macOS: `~/Library/Application Support/io.pcm-queue.pcm-queue`
/// On Linux: `~/.config/pcm-queue`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.pcm-queue", "", "pcm-queue")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from the platform config directory.
///
/// Returns default values if the file doesn't exist, cannot be parsed, or
/// fails validation.
pub fn load() -> StreamConfig {
    config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
        .and_then(|path| match StreamConfig::load_from(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Ignoring {}: {}", path.display(), e);
                None
            }
        })
        .unwrap_or_default()
}

/// Saves the configuration to the platform config directory.
pub fn save(config: &StreamConfig) -> Result<(), ConfigError> {
    match config_dir() {
        Some(dir) => config.save_to(&dir.join(CONFIG_FILE_NAME)),
        None => Ok(()),
    }
}
