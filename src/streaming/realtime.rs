//! Real-time rendering into the stream buffer

use super::{RingBuffer, StreamConfig, BUFFER_BACKOFF_MICROS};
use crate::manager::SoundManager;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

/// Renders a [`SoundManager`] into a ring buffer read by the audio device
pub struct RealtimePlayer {
    buffer: Arc<Mutex<RingBuffer>>,
    config: StreamConfig,
    stats: Arc<Mutex<PlaybackStats>>,
    scratch: Vec<i16>,
}

/// Playback statistics for monitoring overruns and buffer health
#[derive(Debug, Clone, Default)]
pub struct PlaybackStats {
    /// Number of overrun events (producer write failed due to full buffer)
    pub overrun_count: usize,
    /// Number of samples written
    pub samples_played: usize,
    /// Current buffer fill percentage
    pub fill_percentage: f32,
}

impl RealtimePlayer {
    /// Create a player with an empty ring buffer
    pub fn new(config: StreamConfig) -> crate::Result<Self> {
        let buffer = Arc::new(Mutex::new(RingBuffer::new(config.ring_buffer_size)?));
        Ok(RealtimePlayer {
            buffer,
            config,
            stats: Arc::new(Mutex::new(PlaybackStats::default())),
            scratch: Vec::new(),
        })
    }

    /// Render `count` samples from the manager and queue them, blocking
    /// while the device catches up.
    ///
    /// Server ticks elapsed during rendering are serviced by the manager.
    pub fn pump(&mut self, manager: &mut SoundManager, count: usize) -> crate::Result<usize> {
        self.scratch.clear();
        self.scratch.resize(count, 0);
        manager.render(&mut self.scratch)?;
        manager.dispatch()?;

        let samples: Vec<f32> = self
            .scratch
            .iter()
            .map(|&s| s as f32 / i16::MAX as f32)
            .collect();
        Ok(self.write_blocking(&samples))
    }

    /// Write samples, waiting for space until every sample is queued
    pub fn write_blocking(&self, samples: &[f32]) -> usize {
        let mut total_written = 0;
        let mut remaining = samples;

        while !remaining.is_empty() {
            let buffer = self.buffer.lock();
            let written = buffer.write(remaining);

            let mut stats = self.stats.lock();
            stats.samples_played += written;
            stats.fill_percentage = buffer.fill_percentage();
            drop(stats);
            drop(buffer);

            total_written += written;

            if written == 0 {
                std::thread::sleep(std::time::Duration::from_micros(BUFFER_BACKOFF_MICROS));
            } else {
                remaining = &remaining[written..];
            }
        }

        total_written
    }

    /// Write samples without blocking (returns 0 if buffer full)
    pub fn write_nonblocking(&self, samples: &[f32]) -> usize {
        let buffer = self.buffer.lock();
        let written = buffer.write(samples);
        let fill_pct = buffer.fill_percentage();
        drop(buffer);

        let mut stats = self.stats.lock();
        if written < samples.len() {
            stats.overrun_count += 1;
        }
        stats.samples_played += written;
        stats.fill_percentage = fill_pct;

        written
    }

    /// Get the number of samples that can be written without blocking
    pub fn available_write(&self) -> usize {
        self.buffer.lock().available_write()
    }

    /// Get current playback statistics
    pub fn get_stats(&self) -> PlaybackStats {
        self.stats.lock().clone()
    }

    /// Clear all pending samples
    pub fn flush(&self) {
        self.buffer.lock().flush();
    }

    /// Get buffer fill percentage (0.0 to 1.0)
    pub fn fill_percentage(&self) -> f32 {
        self.buffer.lock().fill_percentage()
    }

    /// Get buffer latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        self.config.latency_ms()
    }

    /// Get the stream configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Ring buffer handle for the audio device
    pub fn get_buffer(&self) -> Arc<Mutex<RingBuffer>> {
        Arc::clone(&self.buffer)
    }
}

impl Drop for RealtimePlayer {
    fn drop(&mut self) {
        let stats = self.stats.lock();
        debug!(
            "stream closed: {} samples, {} overruns",
            stats.samples_played, stats.overrun_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonblocking_counts_overruns() {
        let player = RealtimePlayer::new(StreamConfig {
            ring_buffer_size: 8,
            sample_rate: 44100,
            channels: 1,
        })
        .unwrap();

        assert_eq!(player.write_nonblocking(&[0.25; 4]), 4);
        assert_eq!(player.write_nonblocking(&[0.25; 8]), 3);

        let stats = player.get_stats();
        assert_eq!(stats.samples_played, 7);
        assert_eq!(stats.overrun_count, 1);
        assert_eq!(player.available_write(), 0);
    }

    #[test]
    fn test_flush_frees_space() {
        let player = RealtimePlayer::new(StreamConfig::low_latency(44100)).unwrap();
        player.write_nonblocking(&[0.0; 1024]);
        assert!(player.fill_percentage() > 0.2);
        player.flush();
        assert_eq!(player.fill_percentage(), 0.0);
    }
}
