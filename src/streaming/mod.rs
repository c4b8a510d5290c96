//! Streaming output
//!
//! A lock-protected ring buffer decouples the logic thread, which renders
//! the manager's drivers, from the audio device thread. Rendering blocks
//! when the buffer is full, so the server tick follows the device clock.

pub mod realtime;
pub mod ring_buffer;

#[cfg(feature = "streaming")]
pub mod audio_device;

#[cfg(feature = "streaming")]
pub use audio_device::AudioDevice;
pub use realtime::{PlaybackStats, RealtimePlayer};
pub use ring_buffer::RingBuffer;

/// Buffer backoff time in microseconds
pub const BUFFER_BACKOFF_MICROS: u64 = 100;

/// Configuration for streaming playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Size of the ring buffer (in samples)
    pub ring_buffer_size: usize,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of audio channels
    pub channels: u16,
}

impl StreamConfig {
    /// Low latency buffer: 4096 samples, about 93ms at 44.1kHz
    pub fn low_latency(sample_rate: u32) -> Self {
        StreamConfig {
            ring_buffer_size: 4096,
            sample_rate,
            channels: 1,
        }
    }

    /// Stable buffer: 16384 samples, about 372ms at 44.1kHz
    pub fn stable(sample_rate: u32) -> Self {
        StreamConfig {
            ring_buffer_size: 16384,
            sample_rate,
            channels: 1,
        }
    }

    /// Get latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        ((self.ring_buffer_size as f32) / (self.sample_rate as f32)) * 1000.0
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::stable(crate::config::DEFAULT_SAMPLE_RATE)
    }
}
