//! Audio device output through rodio
//!
//! The device thread drains the ring buffer in batches and plays silence
//! on underrun so the stream stays open while the server catches up.

use crate::{Result, SoundError};
use log::info;
use rodio::{OutputStream, Sink, Source};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Samples pulled from the ring buffer per lock
const BATCH: usize = 1024;

/// Audio source that reads from the ring buffer
struct RingBufferSource {
    ring_buffer: Arc<parking_lot::Mutex<super::RingBuffer>>,
    sample_rate: u32,
    channels: u16,
    finished: Arc<AtomicBool>,
    buffer: Vec<f32>,
    buffer_pos: usize,
}

impl RingBufferSource {
    fn new(
        ring_buffer: Arc<parking_lot::Mutex<super::RingBuffer>>,
        sample_rate: u32,
        channels: u16,
        finished: Arc<AtomicBool>,
    ) -> Self {
        RingBufferSource {
            ring_buffer,
            sample_rate,
            channels,
            finished,
            buffer: vec![0.0f32; BATCH],
            buffer_pos: BATCH,
        }
    }
}

impl Source for RingBufferSource {
    fn current_frame_len(&self) -> Option<usize> {
        let available = self.ring_buffer.lock().available_read();
        Some(if available > 0 { available } else { BATCH })
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for RingBufferSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }

        if self.buffer_pos >= self.buffer.len() {
            let read = self.ring_buffer.lock().read(&mut self.buffer);
            // Underrun plays silence
            self.buffer[read..].fill(0.0);
            self.buffer_pos = 0;
        }

        let sample = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        Some(sample)
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default output device and start playing from `ring_buffer`
    pub fn new(
        sample_rate: u32,
        channels: u16,
        ring_buffer: Arc<parking_lot::Mutex<super::RingBuffer>>,
    ) -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| SoundError::Device(format!("failed to open audio stream: {}", e)))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| SoundError::Device(format!("failed to create audio sink: {}", e)))?;

        let finished = Arc::new(AtomicBool::new(false));
        let source =
            RingBufferSource::new(ring_buffer, sample_rate, channels, Arc::clone(&finished));
        sink.append(source);
        info!("audio device open at {} Hz, {} channel(s)", sample_rate, channels);

        let running = Arc::new(AtomicBool::new(true));

        Ok(AudioDevice {
            _stream: stream,
            sink,
            running,
            finished,
        })
    }

    /// Pause playback
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume playback
    pub fn play(&self) {
        self.sink.play();
    }

    /// Check if audio device is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Wait for playback to finish (blocks until sink is empty)
    pub fn wait_for_finish(&self) {
        self.sink.sleep_until_end();
    }

    /// Signal that no more samples will be produced
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.pause();
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::RingBuffer;

    fn ring(len: usize) -> Arc<parking_lot::Mutex<RingBuffer>> {
        Arc::new(parking_lot::Mutex::new(RingBuffer::new(len).unwrap()))
    }

    #[test]
    fn test_source_reports_format() {
        let source = RingBufferSource::new(ring(4096), 22050, 1, Arc::new(AtomicBool::new(false)));
        assert_eq!(source.sample_rate(), 22050);
        assert_eq!(source.channels(), 1);
        assert!(source.current_frame_len().is_some());
    }

    #[test]
    fn test_source_plays_queued_samples_then_silence() {
        let buffer = ring(4096);
        buffer.lock().write(&[0.5, -0.5]);
        let mut source = RingBufferSource::new(buffer, 44100, 1, Arc::new(AtomicBool::new(false)));
        assert_eq!(source.next(), Some(0.5));
        assert_eq!(source.next(), Some(-0.5));
        assert_eq!(source.next(), Some(0.0));
    }

    #[test]
    fn test_source_ends_after_finish() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut source = RingBufferSource::new(ring(4096), 44100, 1, Arc::clone(&finished));
        assert!(source.next().is_some());
        finished.store(true, Ordering::Relaxed);
        assert_eq!(source.next(), None);
    }
}
