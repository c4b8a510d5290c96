//! Ring buffer shared between the render thread and the audio device
//!
//! Capacity is rounded up to a power of two. Positions are atomics so that
//! fill queries do not need the storage lock.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Result, SoundError};

/// Ring buffer of output samples
///
/// One producer (the manager's render loop) and one consumer (the device
/// callback).
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Mutex<Vec<f32>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// Create a ring buffer of at least `requested_capacity` samples
    ///
    /// # Errors
    ///
    /// Fails for a zero capacity or one above 512 MB of samples.
    pub fn new(requested_capacity: usize) -> Result<Self> {
        if requested_capacity == 0 {
            return Err(SoundError::ConfigError(
                "ring buffer capacity must be greater than 0".into(),
            ));
        }

        let capacity = requested_capacity.next_power_of_two();

        const MAX_CAPACITY: usize = 512 * 1024 * 1024 / std::mem::size_of::<f32>();
        if capacity > MAX_CAPACITY {
            return Err(SoundError::ConfigError(format!(
                "ring buffer capacity {capacity} exceeds maximum {MAX_CAPACITY}"
            )));
        }

        Ok(RingBuffer {
            buffer: Mutex::new(vec![0.0; capacity]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        })
    }

    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples waiting to be read
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Samples that can be written without overwriting unread data
    pub fn available_write(&self) -> usize {
        self.capacity - self.available_read() - 1
    }

    /// Write samples; returns how many fit
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut buf = self.buffer.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let available = self.capacity - write_pos.wrapping_sub(read_pos) - 1;

        let to_write = samples.len().min(available);
        if to_write == 0 {
            return 0;
        }

        let write_idx = write_pos & self.mask;
        if write_idx + to_write <= self.capacity {
            buf[write_idx..write_idx + to_write].copy_from_slice(&samples[..to_write]);
        } else {
            let first_part = self.capacity - write_idx;
            buf[write_idx..].copy_from_slice(&samples[..first_part]);
            buf[..to_write - first_part].copy_from_slice(&samples[first_part..to_write]);
        }
        drop(buf);

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Read samples into `dest`; returns how many were available
    pub fn read(&self, dest: &mut [f32]) -> usize {
        let buf = self.buffer.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let to_read = dest.len().min(write_pos.wrapping_sub(read_pos));
        if to_read == 0 {
            return 0;
        }

        let read_idx = read_pos & self.mask;
        if read_idx + to_read <= self.capacity {
            dest[..to_read].copy_from_slice(&buf[read_idx..read_idx + to_read]);
        } else {
            let first_part = self.capacity - read_idx;
            dest[..first_part].copy_from_slice(&buf[read_idx..]);
            dest[first_part..to_read].copy_from_slice(&buf[..to_read - first_part]);
        }
        drop(buf);

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Discard unread samples
    pub fn flush(&self) {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    /// No samples waiting
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Fill level (0.0 to 1.0)
    pub fn fill_percentage(&self) -> f32 {
        (self.available_read() as f32) / (self.capacity as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let rb = RingBuffer::new(1000).unwrap();
        assert_eq!(rb.capacity(), 1024);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            RingBuffer::new(0),
            Err(SoundError::ConfigError(_))
        ));
    }

    #[test]
    fn test_write_stops_one_short_of_capacity() {
        let rb = RingBuffer::new(8).unwrap();
        assert_eq!(rb.write(&[1.0; 16]), 7);
        assert_eq!(rb.available_write(), 0);
        assert_eq!(rb.write(&[1.0]), 0);
    }

    #[test]
    fn test_wrap_around_preserves_order() {
        let rb = RingBuffer::new(8).unwrap();
        let mut out = [0.0f32; 8];
        rb.write(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(rb.read(&mut out[..5]), 5);

        rb.write(&[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
        assert_eq!(rb.read(&mut out), 6);
        assert_eq!(&out[..6], &[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_flush_discards_pending() {
        let rb = RingBuffer::new(64).unwrap();
        rb.write(&[0.5; 32]);
        approx::assert_relative_eq!(rb.fill_percentage(), 0.5);
        rb.flush();
        assert!(rb.is_empty());
    }
}
