//! Sound configuration
//!
//! Persisted as JSON. Mirrors the settings the game's sound menu exposes:
//! mute switches, music and effect volumes, and the driver numbers to
//! install at startup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::driver::ADLIB_DRIVER_NUM;
use crate::{Result, SoundError};

/// Default output sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Settings consumed by the sound manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// Output sample rate handed to drivers
    pub sample_rate: u32,
    /// Initial master volume (0..=127)
    pub master_volume: u8,
    /// Mute all output
    pub mute: bool,
    /// Mute music
    pub music_mute: bool,
    /// Mute sound effects
    pub sfx_mute: bool,
    /// Music volume (0..=255)
    pub music_volume: u16,
    /// Sound effect volume (0..=255)
    pub sfx_volume: u16,
    /// Timer ticks skipped between sound server runs
    pub events_delay: u32,
    /// Driver numbers installed by `install_config_drivers`
    pub drivers: Vec<u32>,
}

impl Default for SoundConfig {
    fn default() -> Self {
        SoundConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            master_volume: 127,
            mute: false,
            music_mute: false,
            sfx_mute: false,
            music_volume: 192,
            sfx_volume: 192,
            events_delay: 0,
            drivers: vec![ADLIB_DRIVER_NUM],
        }
    }
}

impl SoundConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: SoundConfig = serde_json::from_str(text)
            .map_err(|e| SoundError::ConfigError(format!("invalid sound config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SoundError::ConfigError(format!("cannot serialize sound config: {}", e)))
    }

    /// Write to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Reject settings the server cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SoundError::ConfigError("sample_rate must be non-zero".into()));
        }
        if self.master_volume > 127 {
            return Err(SoundError::ConfigError(format!(
                "master_volume {} exceeds 127",
                self.master_volume
            )));
        }
        Ok(())
    }

    /// Effective music volume after the mute switches, capped at 255
    pub fn effective_music_volume(&self) -> u16 {
        if self.mute || self.music_mute {
            0
        } else {
            self.music_volume.min(255)
        }
    }

    /// Effective effect volume after the mute switches, capped at 255
    pub fn effective_sfx_volume(&self) -> u16 {
        if self.mute || self.sfx_mute {
            0
        } else {
            self.sfx_volume.min(255)
        }
    }
}
