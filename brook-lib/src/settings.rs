//! Construction-time playback settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::AudioFormat;
use crate::error::{Error, Result};

/// Fixed settings for a streaming player.
///
/// Values are fixed at construction. [`validate`](Self::validate) rejects
/// unusable combinations before any backend resource is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Sample bit depth; 8 or 16.
    pub bits_per_sample: u16,
    /// Sampling frequency in Hz.
    pub frequency: u32,
    /// Channel count; 1 or 2.
    pub channel_count: u16,
    /// Size of each streaming buffer in bytes.
    pub buffer_size: usize,
    /// Number of buffers in the pool.
    pub buffer_count: usize,
    /// Interval between update cycles in milliseconds.
    pub update_interval_ms: u64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            bits_per_sample: 16,
            frequency: 44_100,
            channel_count: 2,
            buffer_size: 2048,
            buffer_count: 32,
            update_interval_ms: 10,
        }
    }
}

impl PlayerSettings {
    /// Check the whole settings block for usability.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::Config(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        if self.buffer_count == 0 {
            return Err(Error::Config("buffer count must be at least one".to_string()));
        }
        if self.frequency == 0 {
            return Err(Error::Config(
                "sampling frequency must be greater than zero".to_string(),
            ));
        }
        if self.update_interval_ms == 0 {
            return Err(Error::Config(
                "update interval must be greater than zero".to_string(),
            ));
        }
        self.format().map(|_| ())
    }

    /// Backend format implied by bit depth and channel count.
    pub fn format(&self) -> Result<AudioFormat> {
        AudioFormat::from_depth_channels(self.bits_per_sample, self.channel_count)
    }

    /// Interval between update cycles.
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Play time covered by one full buffer, in seconds.
    pub fn buffer_seconds(&self) -> Result<f32> {
        let frame = self.format()?.frame_size();
        Ok((self.buffer_size / frame) as f32 / self.frequency as f32)
    }

    /// Parse settings from a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|err| Error::Config(format!("invalid settings json: {}", err)))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = PlayerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.format().unwrap(), AudioFormat::Stereo16);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut settings = PlayerSettings::default();
        settings.buffer_size = 0;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let mut settings = PlayerSettings::default();
        settings.buffer_count = 0;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let mut settings = PlayerSettings::default();
        settings.update_interval_ms = 0;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn unsupported_depth_is_rejected() {
        let mut settings = PlayerSettings::default();
        settings.bits_per_sample = 24;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn buffer_seconds_follows_format() {
        let settings = PlayerSettings {
            bits_per_sample: 8,
            frequency: 8_000,
            channel_count: 1,
            buffer_size: 800,
            ..PlayerSettings::default()
        };
        assert!((settings.buffer_seconds().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let settings = PlayerSettings::from_json(r#"{"buffer_size": 512}"#).unwrap();
        assert_eq!(settings.buffer_size, 512);
        assert_eq!(settings.frequency, 44_100);
        assert!(PlayerSettings::from_json(r#"{"buffer_size": 0}"#).is_err());
    }
}
