//! FM Sound Server
//!
//! A priority-driven sound manager for early-90s adventure game music
//! resources, with an emulated OPL2 (Adlib / SoundBlaster) FM driver.
//!
//! # Features
//! - Sound resources with per-driver group arrangements and versioned headers
//! - Track bytecode decoder (notes, controllers, rests, pitch bend, programs)
//! - Priority-ordered play list with two-phase voice allocation across drivers
//! - Fixed-slot and pooled voice groups, pinned channels, preemption
//! - Volume fades, hold points, loop counts, seek by tick index, cue values
//! - Pluggable [`SoundDriver`] trait with an in-crate OPL2 emulation
//! - JSON configuration and optional real-time streaming through rodio
//!
//! # Crate feature flags
//! - `streaming` (opt-in): Real-time audio output (enables optional `rodio` dep)
//!
//! # Quick start
//! ```no_run
//! use fm_sound_server::{MemoryResources, SoundConfig, SoundManager};
//! let resources = MemoryResources::new();
//! let mut manager = SoundManager::new(resources, SoundConfig::default());
//! manager.install_config_drivers().unwrap();
//! let sound = manager.create_sound();
//! manager.play(sound, 100).unwrap();
//! let mut block = vec![0i16; 882];
//! manager.render(&mut block).unwrap();
//! manager.dispatch().unwrap();
//! ```

#![warn(missing_docs)]

pub mod asound; // Cue-Driven Sound Wrapper
pub mod config; // Sound Configuration
pub mod driver; // Sound Drivers
pub mod manager; // Sound Manager & Server
pub mod opl; // OPL2 FM Emulation
pub mod resource; // Sound Resource Format
pub mod sound; // Sounds & Track Decoding
pub mod streaming; // Audio Output & Streaming
pub mod voice; // Voice Group Tables

/// Channels per sound and maximum voice group count
pub const SOUND_ARR_SIZE: usize = 16;

/// Error types for sound server operations
#[derive(thiserror::Error, Debug)]
pub enum SoundError {
    /// Malformed resource data
    #[error("Resource format error: {0}")]
    ResourceFormat(String),

    /// Resource does not support this engine version
    #[error("Resource version error: {0}")]
    ResourceVersion(String),

    /// Resource missing from the resource source
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Driver or audio device failure
    #[error("Device error: {0}")]
    Device(String),

    /// Operation needs a primed sound
    #[error("Sound is not primed")]
    NotPrimed,

    /// Handle does not refer to a live sound
    #[error("Invalid sound handle")]
    InvalidHandle,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SoundError {
    /// Converts a String into `SoundError::Other`.
    ///
    /// Prefer the specific variants where the failure has a known kind.
    fn from(msg: String) -> Self {
        SoundError::Other(msg)
    }
}

impl From<&str> for SoundError {
    fn from(msg: &str) -> Self {
        SoundError::Other(msg.to_string())
    }
}

/// Result type for sound server operations
pub type Result<T> = std::result::Result<T, SoundError>;

// Public API exports
pub use asound::ASound;
pub use config::SoundConfig;
pub use driver::{AdlibSoundDriver, DriverInfo, GroupData, PatchBank, SoundDriver};
pub use manager::SoundManager;
pub use opl::Opl2;
pub use resource::{MemoryResources, ResourceKind, ResourceSource, SoundResourceBuilder, TrackSpec};
pub use sound::{Sound, SoundHandle, TrackEvent};
#[cfg(feature = "streaming")]
pub use streaming::AudioDevice;
pub use streaming::{RealtimePlayer, RingBuffer, StreamConfig};
