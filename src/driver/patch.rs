//! Adlib instrument bank
//!
//! Bank layout (little-endian):
//! - `u16` offset per program number, zero meaning "no instrument"
//! - at each offset a `u16` entry count followed by 30-byte entries
//!
//! Entry layout: `note_lo, note_hi, note_override, connection`, twelve
//! modulator bytes, feedback, twelve carrier bytes and one pad byte. The
//! first entry whose note range contains the requested note wins.

use crate::{Result, SoundError};

/// Size of one bank entry in bytes
pub const PATCH_ENTRY_SIZE: usize = 30;

/// Marker for "keep the requested note"
pub const NO_NOTE_OVERRIDE: u8 = 0xFF;

/// Operator settings of one instrument, one field per register bit-group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperatorPatch {
    /// Tremolo enable
    pub tremolo: bool,
    /// Vibrato enable
    pub vibrato: bool,
    /// Key scale rate
    pub key_scale_rate: bool,
    /// Frequency multiplier (0..=15)
    pub multiplier: u8,
    /// Sustaining envelope
    pub sustain: bool,
    /// Key scale level (0..=3)
    pub key_scale_level: u8,
    /// Total level, stored as attenuation (0 = loudest)
    pub total_level: u8,
    /// Attack rate
    pub attack: u8,
    /// Decay rate
    pub decay: u8,
    /// Sustain level
    pub sustain_level: u8,
    /// Release rate
    pub release: u8,
    /// Waveform (0..=3)
    pub waveform: u8,
}

impl OperatorPatch {
    fn from_bytes(b: &[u8]) -> Self {
        OperatorPatch {
            tremolo: b[0] != 0,
            vibrato: b[1] != 0,
            key_scale_rate: b[2] != 0,
            multiplier: b[3] & 0x0F,
            sustain: b[4] != 0,
            key_scale_level: b[5] & 0x03,
            total_level: b[6] & 0x3F,
            attack: b[7] & 0x0F,
            decay: b[8] & 0x0F,
            sustain_level: b[9] & 0x0F,
            release: b[10] & 0x0F,
            waveform: b[11] & 0x03,
        }
    }

    fn to_bytes(self) -> [u8; 12] {
        [
            self.tremolo as u8,
            self.vibrato as u8,
            self.key_scale_rate as u8,
            self.multiplier,
            self.sustain as u8,
            self.key_scale_level,
            self.total_level,
            self.attack,
            self.decay,
            self.sustain_level,
            self.release,
            self.waveform,
        ]
    }

    /// Value of the AM/VIB/EGT/KSR/MULT register
    pub fn character(&self) -> u8 {
        let mut value = self.multiplier & 0x0F;
        if self.tremolo {
            value |= 0x80;
        }
        if self.vibrato {
            value |= 0x40;
        }
        if self.sustain {
            value |= 0x20;
        }
        if self.key_scale_rate {
            value |= 0x10;
        }
        value
    }

    /// Value of the AR/DR register
    pub fn attack_decay(&self) -> u8 {
        (self.attack << 4) | (self.decay & 0x0F)
    }

    /// Value of the SL/RR register
    pub fn sustain_release(&self) -> u8 {
        (self.sustain_level << 4) | (self.release & 0x0F)
    }
}

/// One instrument definition covering a note range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdlibPatch {
    /// Lowest note served by this entry
    pub note_lo: u8,
    /// Highest note served by this entry
    pub note_hi: u8,
    /// Fixed note to play instead of the requested one
    pub note_override: Option<u8>,
    /// Additive synthesis instead of FM
    pub additive: bool,
    /// Modulator (operator 1)
    pub modulator: OperatorPatch,
    /// Modulator feedback (0..=7)
    pub feedback: u8,
    /// Carrier (operator 2)
    pub carrier: OperatorPatch,
}

impl AdlibPatch {
    /// Decode one 30-byte entry
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        if b.len() < PATCH_ENTRY_SIZE {
            return Err(SoundError::ResourceFormat(format!(
                "patch entry is {} bytes, expected {}",
                b.len(),
                PATCH_ENTRY_SIZE
            )));
        }
        Ok(AdlibPatch {
            note_lo: b[0],
            note_hi: b[1],
            note_override: (b[2] != NO_NOTE_OVERRIDE).then_some(b[2]),
            additive: b[3] != 0,
            modulator: OperatorPatch::from_bytes(&b[4..16]),
            feedback: b[16] & 0x07,
            carrier: OperatorPatch::from_bytes(&b[17..29]),
        })
    }

    /// Encode into a 30-byte entry
    pub fn to_bytes(&self) -> [u8; PATCH_ENTRY_SIZE] {
        let mut out = [0u8; PATCH_ENTRY_SIZE];
        out[0] = self.note_lo;
        out[1] = self.note_hi;
        out[2] = self.note_override.unwrap_or(NO_NOTE_OVERRIDE);
        out[3] = self.additive as u8;
        out[4..16].copy_from_slice(&self.modulator.to_bytes());
        out[16] = self.feedback;
        out[17..29].copy_from_slice(&self.carrier.to_bytes());
        out
    }

    /// Whether this entry serves a note
    pub fn covers(&self, note: u8) -> bool {
        self.note_lo <= note && note <= self.note_hi
    }

    /// Value of the feedback/connection register
    pub fn feedback_connection(&self) -> u8 {
        (self.feedback << 1) | self.additive as u8
    }
}

/// Raw instrument bank as installed into the driver
#[derive(Debug, Clone, Default)]
pub struct PatchBank {
    data: Vec<u8>,
}

impl PatchBank {
    /// Take ownership of a raw bank resource
    pub fn new(data: Vec<u8>) -> Self {
        PatchBank { data }
    }

    /// Build a bank from per-program instrument lists.
    ///
    /// Programs with an empty list get a zero offset.
    pub fn encode(programs: &[Vec<AdlibPatch>]) -> Vec<u8> {
        let mut out = vec![0u8; programs.len() * 2];
        for (program, patches) in programs.iter().enumerate() {
            if patches.is_empty() {
                continue;
            }
            let offset = out.len() as u16;
            out[program * 2..program * 2 + 2].copy_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(patches.len() as u16).to_le_bytes());
            for patch in patches {
                out.extend_from_slice(&patch.to_bytes());
            }
        }
        out
    }

    /// Raw bank length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no bank data is installed
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn read_u16(&self, pos: usize) -> Option<u16> {
        let bytes = self.data.get(pos..pos + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Decode the entry stored at a byte offset returned by [`lookup`](Self::lookup)
    pub fn entry_at(&self, offset: usize) -> Option<AdlibPatch> {
        let bytes = self.data.get(offset..offset + PATCH_ENTRY_SIZE)?;
        AdlibPatch::from_bytes(bytes).ok()
    }

    /// Find the instrument for a program and note.
    ///
    /// Returns the patch, its byte offset in the bank, and the note to play
    /// after the entry's override is applied.
    pub fn lookup(&self, program: u8, note: u8) -> Option<(AdlibPatch, usize, u8)> {
        let offset = self.read_u16(program as usize * 2)? as usize;
        if offset == 0 {
            return None;
        }
        let count = self.read_u16(offset)? as usize;
        (0..count).find_map(|id| {
            let start = offset + 2 + id * PATCH_ENTRY_SIZE;
            let patch = self.entry_at(start)?;
            patch
                .covers(note)
                .then(|| (patch, start, patch.note_override.unwrap_or(note)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piano(lo: u8, hi: u8) -> AdlibPatch {
        AdlibPatch {
            note_lo: lo,
            note_hi: hi,
            note_override: None,
            additive: false,
            modulator: OperatorPatch {
                multiplier: 1,
                total_level: 0x10,
                attack: 15,
                decay: 2,
                sustain_level: 4,
                release: 5,
                ..Default::default()
            },
            feedback: 3,
            carrier: OperatorPatch {
                multiplier: 1,
                sustain: true,
                attack: 15,
                decay: 1,
                sustain_level: 2,
                release: 6,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_entry_layout() {
        let bytes = piano(0, 127).to_bytes();
        assert_eq!(bytes[2], NO_NOTE_OVERRIDE);
        assert_eq!(bytes[7], 1); // modulator MULT
        assert_eq!(bytes[10], 0x10); // modulator TL
        assert_eq!(bytes[16], 3); // feedback
        assert_eq!(bytes[21], 1); // carrier EGT
        assert_eq!(AdlibPatch::from_bytes(&bytes).unwrap(), piano(0, 127));
    }

    #[test]
    fn test_lookup_by_note_range() {
        let mut high = piano(60, 127);
        high.note_override = Some(72);
        let bank = PatchBank::new(PatchBank::encode(&[vec![], vec![piano(0, 59), high]]));

        assert!(bank.lookup(0, 40).is_none());
        let (patch, _, note) = bank.lookup(1, 40).unwrap();
        assert_eq!(patch.note_hi, 59);
        assert_eq!(note, 40);
        let (_, offset, note) = bank.lookup(1, 64).unwrap();
        assert_eq!(note, 72);
        assert_eq!(offset, 4 + 2 + PATCH_ENTRY_SIZE);
        assert!(bank.lookup(5, 40).is_none());
    }

    #[test]
    fn test_register_values() {
        let p = piano(0, 127);
        assert_eq!(p.carrier.character(), 0x21);
        assert_eq!(p.modulator.attack_decay(), 0xF2);
        assert_eq!(p.carrier.sustain_release(), 0x26);
        assert_eq!(p.feedback_connection(), 0x06);
    }

    #[test]
    fn test_short_entry_rejected() {
        assert!(AdlibPatch::from_bytes(&[0u8; 10]).is_err());
    }
}
