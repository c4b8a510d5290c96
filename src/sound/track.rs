//! Track event bytecode
//!
//! Each event is classified by its leading one-bits:
//!
//! | pattern | event |
//! |---|---|
//! | `0xxxxxxx` | note touch |
//! | `10xxxxxx b` | note `((op & 0x3f) << 1) \| (b >> 7)`, velocity `b & 0x7f` |
//! | `110xxxxx` | rest, base-32 digits continued by further `110xxxxx` bytes |
//! | `1110xxxx b` | controller shorthand from {1, 7, 10, 64} |
//! | `11110xxx lo hi` | wide parameter, little-endian |
//! | `111110xx c v` | controller `c` = `v` |
//! | `1111110x hi lo` | pitch bend, big-endian |
//! | `11111110 p` | program change / control-track checkpoint |
//! | `11111111 v` | velocity, or end of track when `v & 0x80` |
//!
//! The wide parameter and pitch bend really do use opposite byte orders.

use crate::{Result, SoundError};

/// Controllers reachable through the shorthand form
pub const CONTROLLER_SHORTHAND: [u8; 4] = [1, 7, 10, 64];

/// Modulation wheel
pub const CTRL_MODULATION: u8 = 1;
/// Channel volume
pub const CTRL_VOLUME: u8 = 7;
/// Pan position
pub const CTRL_PAN: u8 = 10;
/// Damper (sustain) pedal
pub const CTRL_DAMPER: u8 = 64;
/// Requested voice count
pub const CTRL_NUM_VOICES: u8 = 75;
/// Controller that never matches a hold point
pub const CTRL_NO_HOLD: u8 = 76;
/// All notes off
pub const CTRL_ALL_NOTES_OFF: u8 = 123;

/// Program value that marks a cue rather than a loop checkpoint
pub const CUE_MARKER: u8 = 127;

/// One decoded track event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    /// Release / touch the given note
    NoteTouch(u8),
    /// Start a note
    Note {
        /// Note number (0..=127)
        note: u8,
        /// Velocity (0..=127)
        velocity: u8,
    },
    /// Pause the track for this many ticks
    Rest(u32),
    /// Controller change
    Controller {
        /// Controller number
        command: u8,
        /// Controller value
        value: u8,
    },
    /// Wide parameter (reserved commands)
    Wide(u16),
    /// Pitch bend (0..=0x3fff)
    PitchBend(u16),
    /// Program change or checkpoint
    Program(u8),
    /// Velocity set
    Velocity(u8),
    /// End of track
    End,
}

impl TrackEvent {
    /// Append the bytecode for this event
    pub fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            TrackEvent::NoteTouch(note) => out.push(note & 0x7F),
            TrackEvent::Note { note, velocity } => {
                out.push(0x80 | ((note >> 1) & 0x3F));
                out.push(((note & 1) << 7) | (velocity & 0x7F));
            }
            TrackEvent::Rest(count) => {
                let mut digits = Vec::new();
                let mut n = count;
                loop {
                    digits.push((n & 0x1F) as u8);
                    n >>= 5;
                    if n == 0 {
                        break;
                    }
                }
                out.extend(digits.iter().rev().map(|d| 0xC0 | d));
            }
            TrackEvent::Controller { command, value } => {
                match CONTROLLER_SHORTHAND.iter().position(|&c| c == command) {
                    Some(idx) => {
                        out.push(0xE0 | (idx as u8 >> 1));
                        out.push(((idx as u8 & 1) << 7) | (value & 0x7F));
                    }
                    None => out.extend_from_slice(&[0xF8, command, value]),
                }
            }
            TrackEvent::Wide(value) => {
                out.push(0xF0);
                out.extend_from_slice(&value.to_le_bytes());
            }
            TrackEvent::PitchBend(value) => {
                out.push(0xFC);
                out.extend_from_slice(&value.to_be_bytes());
            }
            TrackEvent::Program(program) => out.extend_from_slice(&[0xFE, program]),
            TrackEvent::Velocity(velocity) => out.extend_from_slice(&[0xFF, velocity & 0x7F]),
            TrackEvent::End => out.extend_from_slice(&[0xFF, 0x80]),
        }
    }
}

/// Encode a sequence of events
pub fn encode_events(events: &[TrackEvent]) -> Vec<u8> {
    let mut out = Vec::new();
    for event in events {
        event.encode(&mut out);
    }
    out
}

/// Decoding cursor over a track chunk
#[derive(Debug, Clone)]
pub struct EventCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> EventCursor<'a> {
    /// Start decoding at a byte offset
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        EventCursor { data, pos }
    }

    /// Offset of the next undecoded byte
    pub fn position(&self) -> usize {
        self.pos
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or_else(|| {
            SoundError::ResourceFormat(format!("track event stream truncated at {}", self.pos))
        })?;
        self.pos += 1;
        Ok(b)
    }

    /// Decode the next event
    pub fn next_event(&mut self) -> Result<TrackEvent> {
        let op = self.byte()?;

        let event = if op & 0x80 == 0 {
            TrackEvent::NoteTouch(op)
        } else if op & 0x40 == 0 {
            let b = self.byte()?;
            TrackEvent::Note {
                note: ((op & 0x3F) << 1) | (b >> 7),
                velocity: b & 0x7F,
            }
        } else if op & 0x20 == 0 {
            let mut rest = (op & 0x1F) as u32;
            while let Some(&b) = self.data.get(self.pos) {
                if b & 0xE0 != 0xC0 {
                    break;
                }
                rest = (rest << 5) | (b & 0x1F) as u32;
                self.pos += 1;
            }
            TrackEvent::Rest(rest)
        } else if op & 0x10 == 0 {
            let b = self.byte()?;
            let idx = (((op & 0x0F) << 1) | (b >> 7)) as usize;
            let command = *CONTROLLER_SHORTHAND.get(idx).ok_or_else(|| {
                SoundError::ResourceFormat(format!("controller shorthand index {} out of range", idx))
            })?;
            TrackEvent::Controller {
                command,
                value: b & 0x7F,
            }
        } else if op & 0x08 == 0 {
            let lo = self.byte()?;
            let hi = self.byte()?;
            TrackEvent::Wide(u16::from_le_bytes([lo, hi]))
        } else if op & 0x04 == 0 {
            let command = self.byte()?;
            let value = self.byte()?;
            TrackEvent::Controller { command, value }
        } else if op & 0x02 == 0 {
            let hi = self.byte()?;
            let lo = self.byte()?;
            TrackEvent::PitchBend(u16::from_be_bytes([hi, lo]))
        } else if op & 0x01 == 0 {
            TrackEvent::Program(self.byte()?)
        } else {
            let b = self.byte()?;
            if b & 0x80 != 0 {
                TrackEvent::End
            } else {
                TrackEvent::Velocity(b)
            }
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<TrackEvent> {
        let mut cursor = EventCursor::new(bytes, 0);
        let mut events = Vec::new();
        while cursor.position() < bytes.len() {
            events.push(cursor.next_event().unwrap());
        }
        events
    }

    #[test]
    fn test_single_rest_byte() {
        assert_eq!(decode_all(&[0xC5]), vec![TrackEvent::Rest(5)]);
    }

    #[test]
    fn test_rest_continuation() {
        assert_eq!(decode_all(&[0xC1, 0xC3]), vec![TrackEvent::Rest(35)]);
        assert_eq!(encode_events(&[TrackEvent::Rest(35)]), vec![0xC1, 0xC3]);
    }

    #[test]
    fn test_rest_stops_at_other_class() {
        let events = decode_all(&[0xC2, 0x3C]);
        assert_eq!(events, vec![TrackEvent::Rest(2), TrackEvent::NoteTouch(0x3C)]);
    }

    #[test]
    fn test_pitch_bend_is_big_endian() {
        assert_eq!(decode_all(&[0xFC, 0x12, 0x34]), vec![TrackEvent::PitchBend(0x1234)]);
        assert_eq!(encode_events(&[TrackEvent::PitchBend(0x1234)]), vec![0xFC, 0x12, 0x34]);
    }

    #[test]
    fn test_wide_is_little_endian() {
        assert_eq!(decode_all(&[0xF0, 0x12, 0x34]), vec![TrackEvent::Wide(0x3412)]);
        assert_eq!(encode_events(&[TrackEvent::Wide(0x3412)]), vec![0xF0, 0x12, 0x34]);
    }

    #[test]
    fn test_note_packing() {
        // Note 61 = 0b0111101: high six bits in the opcode, low bit in b7
        let bytes = encode_events(&[TrackEvent::Note { note: 61, velocity: 100 }]);
        assert_eq!(bytes, vec![0x80 | 30, 0x80 | 100]);
        assert_eq!(decode_all(&bytes), vec![TrackEvent::Note { note: 61, velocity: 100 }]);
    }

    #[test]
    fn test_controller_forms() {
        // Shorthand index 3 (damper): opcode low nibble 1, b7 set
        assert_eq!(
            decode_all(&[0xE1, 0x80 | 0x40]),
            vec![TrackEvent::Controller { command: 64, value: 0x40 }]
        );
        assert_eq!(
            decode_all(&[0xF8, 75, 2]),
            vec![TrackEvent::Controller { command: 75, value: 2 }]
        );
        assert_eq!(
            encode_events(&[TrackEvent::Controller { command: 7, value: 90 }]),
            vec![0xE0, 0x80 | 90]
        );
    }

    #[test]
    fn test_bad_shorthand_index() {
        let mut cursor = EventCursor::new(&[0xE2, 0x00], 0);
        assert!(matches!(cursor.next_event(), Err(SoundError::ResourceFormat(_))));
    }

    #[test]
    fn test_terminator_and_velocity() {
        assert_eq!(
            decode_all(&[0xFF, 0x40, 0xFE, 0x05, 0xFF, 0x80]),
            vec![TrackEvent::Velocity(0x40), TrackEvent::Program(5), TrackEvent::End]
        );
    }

    #[test]
    fn test_truncated_stream() {
        let mut cursor = EventCursor::new(&[0xFC, 0x12], 0);
        assert!(cursor.next_event().is_err());
    }
}
