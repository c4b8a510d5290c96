//! Adlib / SoundBlaster FM driver
//!
//! Drives the in-crate OPL2 emulation. Every register write goes through a
//! 256-byte shadow so that read-modify-write sequences (key-on, block bits,
//! level bits) never need to read back from the chip.
//!
//! Each of the nine melodic channels is exposed as one pooled voice.

use log::{debug, trace};

use super::patch::PatchBank;
use super::{raise_timer, GroupData, SoundDriver, TimerSignal, ADLIB_DRIVER_NUM};
use crate::opl::registers::{
    KEY_ON_BIT, REG_ATTACK_DECAY, REG_CHARACTER, REG_FEEDBACK, REG_FNUM_LO, REG_KEYON_BLOCK,
    REG_LEVELS, REG_RHYTHM, REG_SUSTAIN_RELEASE, REG_TEST, REG_WAVEFORM, WAVE_SELECT_ENABLE,
};
use crate::opl::{Opl2, CARRIER_SLOT, CHANNEL_COUNT, MODULATOR_SLOT, SLOT_OFFSET};
use crate::Result;

/// Lowest sound resource version this driver plays
pub const ADLIB_MIN_VERSION: u16 = 0x102;
/// Highest sound resource version this driver plays
pub const ADLIB_MAX_VERSION: u16 = 0x10A;
/// Capability mask advertised by the driver
pub const ADLIB_GROUP_MASK: u32 = 9;
/// Group table: voice group 1, pooled, nine voices
pub const ADLIB_GROUP_TABLE: [u8; 5] = [1, 1, 9, 1, 0xFF];

/// Timer callbacks per second of generated audio
const TIMER_HZ: u32 = 50;

/// Pitch bend centre value
const PITCH_CENTRE: u16 = 0x2000;

/// Pitch bend units per quarter-semitone step
const PITCH_STEP: i32 = 170;

/// Output level curve, indexed by the scaled channel volume
const VOLUME_CURVE: [u8; 64] = [
    0, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 33, 34, 35, 36, 37, 38, 39, 40, 41,
    42, 43, 44, 45, 46, 47, 47, 48, 49, 50, 50, 51, 52, 52, 53, 54, 54, 55, 56, 56, 57, 57, 58, 58,
    59, 59, 59, 60, 60, 60, 61, 61, 61, 62, 62, 62, 62, 63, 63, 63,
];

/// F-numbers for the twelve semitones of an octave, four quarter-steps each
const FNUM_TABLE: [u16; 48] = [
    343, 348, 353, 358, 363, 369, 374, 379, 385, 391, 396, 402, 408, 414, 420, 426, 432, 438, 445,
    451, 458, 465, 471, 478, 485, 492, 499, 507, 514, 521, 529, 537, 544, 552, 560, 569, 577, 585,
    594, 602, 611, 620, 629, 638, 647, 657, 666, 676,
];

/// Adlib FM sound driver
pub struct AdlibSoundDriver {
    chip: Opl2,
    port_contents: [u8; 256],
    group_data: GroupData,
    bank: PatchBank,
    master_volume: u8,
    sample_rate: u32,
    samples_left: u32,
    timer: Option<TimerSignal>,

    voiced: [bool; CHANNEL_COUNT],
    channel_volume: [u8; CHANNEL_COUNT],
    velocity: [u8; CHANNEL_COUNT],
    note: [u8; CHANNEL_COUNT],
    modulator_level: [u8; CHANNEL_COUNT],
    carrier_level: [u8; CHANNEL_COUNT],
    additive: [bool; CHANNEL_COUNT],
    pitch_bend: [u16; CHANNEL_COUNT],
    patch_offset: [Option<usize>; CHANNEL_COUNT],
}

impl AdlibSoundDriver {
    /// Create a driver rendering at the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(TIMER_HZ);
        AdlibSoundDriver {
            chip: Opl2::with_sample_rate(sample_rate),
            port_contents: [0; 256],
            group_data: GroupData {
                mask: ADLIB_GROUP_MASK,
                entries: vec![super::GroupEntry {
                    group: ADLIB_GROUP_TABLE[0],
                    block: super::GroupBlock::Pooled {
                        count: ADLIB_GROUP_TABLE[2],
                        reserved: ADLIB_GROUP_TABLE[3],
                    },
                }],
            },
            bank: PatchBank::default(),
            master_volume: 0,
            sample_rate,
            samples_left: sample_rate / TIMER_HZ,
            timer: None,
            voiced: [false; CHANNEL_COUNT],
            channel_volume: [0; CHANNEL_COUNT],
            velocity: [0; CHANNEL_COUNT],
            note: [0; CHANNEL_COUNT],
            modulator_level: [0; CHANNEL_COUNT],
            carrier_level: [0; CHANNEL_COUNT],
            additive: [false; CHANNEL_COUNT],
            pitch_bend: [PITCH_CENTRE; CHANNEL_COUNT],
            patch_offset: [None; CHANNEL_COUNT],
        }
    }

    /// Driver number of this device
    pub fn driver_num(&self) -> u32 {
        ADLIB_DRIVER_NUM
    }

    /// Shadowed value of a chip register
    pub fn port(&self, reg: u8) -> u8 {
        self.port_contents[reg as usize]
    }

    /// Access the emulated chip
    pub fn chip(&self) -> &Opl2 {
        &self.chip
    }

    /// Whether a voice currently has its key-on bit set
    pub fn is_voiced(&self, voice: u8) -> bool {
        self.voiced.get(voice as usize).copied().unwrap_or(false)
    }

    fn write(&mut self, reg: u8, value: u8) {
        self.port_contents[reg as usize] = value;
        self.chip.write_register(reg, value);
    }

    fn reset(&mut self) {
        self.write(REG_TEST, WAVE_SELECT_ENABLE);
        self.write(0x04, 0x80);
        self.write(0x02, 1);
        self.write(0x04, 1);
    }

    fn modulator_offset(channel: usize) -> u8 {
        SLOT_OFFSET[MODULATOR_SLOT[channel]]
    }

    fn carrier_offset(channel: usize) -> u8 {
        SLOT_OFFSET[CARRIER_SLOT[channel]]
    }

    fn update_channel_volume(&mut self, channel: usize) {
        let volume = (self.master_volume as u32 * self.channel_volume[channel] as u32 / 127
            * self.velocity[channel] as u32
            / 127)
            / 2;
        let curve = |level: u8| VOLUME_CURVE[(volume * level as u32 / 63).min(63) as usize];

        let carrier = 63 - curve(self.carrier_level[channel]);
        let modulator = if self.additive[channel] {
            63 - curve(self.modulator_level[channel])
        } else {
            63 - self.modulator_level[channel]
        };

        let port = REG_LEVELS + Self::modulator_offset(channel);
        self.write(port, (self.port(port) & 0xC0) | modulator);
        let port = REG_LEVELS + Self::carrier_offset(channel);
        self.write(port, (self.port(port) & 0xC0) | carrier);
    }

    fn set_voice(&mut self, channel: usize) {
        let port = REG_KEYON_BLOCK + channel as u8;
        self.write(port, self.port(port) | KEY_ON_BIT);
        self.voiced[channel] = true;
    }

    fn clear_voice(&mut self, channel: usize) {
        let port = REG_KEYON_BLOCK + channel as u8;
        self.write(port, self.port(port) & !KEY_ON_BIT);
        self.voiced[channel] = false;
    }

    /// Load the channel's current instrument into both operators
    fn update_channel(&mut self, channel: usize) {
        let Some(patch) = self.patch_offset[channel].and_then(|offset| self.bank.entry_at(offset))
        else {
            return;
        };

        for (op, offset) in [
            (&patch.modulator, Self::modulator_offset(channel)),
            (&patch.carrier, Self::carrier_offset(channel)),
        ] {
            self.write(REG_CHARACTER + offset, op.character());
            let levels = REG_LEVELS + offset;
            self.write(levels, (self.port(levels) & 0x3F) | (op.key_scale_level << 6));
            self.write(REG_ATTACK_DECAY + offset, op.attack_decay());
            self.write(REG_SUSTAIN_RELEASE + offset, op.sustain_release());
            let wave = REG_WAVEFORM + offset;
            self.write(wave, (self.port(wave) & 0xFC) | op.waveform);
        }
        self.modulator_level[channel] = 63 - patch.modulator.total_level;
        self.carrier_level[channel] = 63 - patch.carrier.total_level;

        let port = REG_FEEDBACK + channel as u8;
        self.write(port, (self.port(port) & 0xF0) | patch.feedback_connection());
        self.additive[channel] = patch.additive;
    }

    /// Program F-number and block for the channel's note and pitch bend
    fn set_frequency(&mut self, channel: usize) {
        let bend = self.pitch_bend[channel] as i32;
        let centre = PITCH_CENTRE as i32;
        let mut note = self.note[channel] as i32;
        let offset;

        if bend == centre {
            offset = 0;
        } else if bend > centre {
            let mut v = bend - centre;
            if v == 0x1FFF {
                v = 0x2000;
            }
            offset = (v / PITCH_STEP) & 3;
            note = (note + ((v / PITCH_STEP) >> 2)).min(127);
        } else {
            let steps = (centre - bend) / PITCH_STEP;
            let up = 4 - (steps & 3);
            if up == 4 {
                offset = 0;
            } else {
                offset = up;
                note -= 1;
            }
            note = (note - (steps >> 2)).max(0);
        }

        let mut octave = note / 12;
        if octave > 0 {
            octave -= 1;
        }
        let fnum = FNUM_TABLE[(((note % 12) << 2) + offset) as usize];

        self.write(REG_FNUM_LO + channel as u8, (fnum & 0xFF) as u8);
        let port = REG_KEYON_BLOCK + channel as u8;
        self.write(
            port,
            (self.port(port) & 0xE0) | ((fnum >> 8) & 3) as u8 | (((octave & 7) as u8) << 2),
        );
    }
}

impl SoundDriver for AdlibSoundDriver {
    fn name(&self) -> &str {
        "Adlib or SoundBlaster"
    }

    fn version_range(&self) -> (u16, u16) {
        (ADLIB_MIN_VERSION, ADLIB_MAX_VERSION)
    }

    fn open(&mut self) -> Result<()> {
        self.write(REG_TEST, WAVE_SELECT_ENABLE);
        self.reset();
        self.write(0x08, 0);
        for reg in 0x20..0xF6u8 {
            self.write(reg, 0);
        }
        self.write(REG_RHYTHM, 0);
        debug!("adlib: opened at {} Hz", self.sample_rate);
        Ok(())
    }

    fn close(&mut self) {
        for reg in REG_KEYON_BLOCK..REG_KEYON_BLOCK + 8 {
            self.write(reg, self.port(reg) & !KEY_ON_BIT);
        }
        for reg in REG_LEVELS..REG_LEVELS + 0x15 {
            self.write(reg, 0x3F);
        }
        self.reset();
        self.voiced = [false; CHANNEL_COUNT];
        debug!("adlib: closed");
    }

    fn group_data(&self) -> &GroupData {
        &self.group_data
    }

    fn requires_patch_bank(&self) -> bool {
        true
    }

    fn install_patch(&mut self, data: Vec<u8>) -> Result<()> {
        debug!("adlib: installed {} byte patch bank", data.len());
        self.bank = PatchBank::new(data);
        self.patch_offset = [None; CHANNEL_COUNT];
        Ok(())
    }

    fn set_master_volume(&mut self, volume: u8) -> u8 {
        let previous = self.master_volume;
        self.master_volume = volume.min(127);
        for channel in 0..CHANNEL_COUNT {
            self.update_channel_volume(channel);
        }
        previous
    }

    fn start_note(&mut self, voice: u8, program: Option<u8>, note: u8, velocity: u8) {
        let channel = voice as usize;
        let Some(program) = program else { return };
        if channel >= CHANNEL_COUNT {
            return;
        }
        let Some((_, offset, note)) = self.bank.lookup(program, note) else {
            trace!("adlib: no instrument for program {} note {}", program, note);
            return;
        };
        self.patch_offset[channel] = Some(offset);

        // Fast release so a retrigger does not click
        for op in [Self::modulator_offset(channel), Self::carrier_offset(channel)] {
            let port = REG_SUSTAIN_RELEASE + op;
            self.write(port, (self.port(port) & 0xF0) | 0x0F);
        }
        if self.voiced[channel] {
            self.clear_voice(channel);
        }

        self.note[channel] = note;
        self.velocity[channel] = velocity;

        self.update_channel(channel);
        self.set_frequency(channel);
        self.update_channel_volume(channel);
        self.set_voice(channel);
        trace!("adlib: voice {} program {} note {} velocity {}", voice, program, note, velocity);
    }

    fn release_voice(&mut self, voice: u8) {
        let channel = voice as usize;
        if channel < CHANNEL_COUNT && self.voiced[channel] {
            self.clear_voice(channel);
        }
    }

    fn voice_controller(&mut self, voice: u8, command: u8, value: u8) {
        let channel = voice as usize;
        if channel < CHANNEL_COUNT && command == 7 {
            self.channel_volume[channel] = value.min(127);
            self.update_channel_volume(channel);
        }
    }

    fn set_voice_pitch(&mut self, voice: u8, pitch_bend: u16) {
        let channel = voice as usize;
        if channel < CHANNEL_COUNT {
            self.pitch_bend[channel] = pitch_bend.min(0x3FFF);
            self.set_frequency(channel);
        }
    }

    fn read_buffer(&mut self, buffer: &mut [i16]) -> usize {
        let mut pos = 0;
        while pos < buffer.len() {
            let count = (self.samples_left as usize).min(buffer.len() - pos);
            self.chip.generate_samples_into(&mut buffer[pos..pos + count]);
            pos += count;
            self.samples_left -= count as u32;
            if self.samples_left == 0 {
                if let Some(timer) = &self.timer {
                    raise_timer(timer);
                }
                self.samples_left = self.sample_rate / TIMER_HZ;
            }
        }
        buffer.len()
    }

    fn set_update_callback(&mut self, signal: TimerSignal) {
        self.timer = Some(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::super::patch::{AdlibPatch, OperatorPatch};
    use super::super::timer_signal;
    use super::*;
    use std::sync::atomic::Ordering;

    fn organ_bank() -> Vec<u8> {
        let op = OperatorPatch {
            multiplier: 1,
            sustain: true,
            attack: 15,
            decay: 0,
            sustain_level: 0,
            release: 8,
            ..Default::default()
        };
        let patch = AdlibPatch {
            note_lo: 0,
            note_hi: 127,
            note_override: None,
            additive: false,
            modulator: OperatorPatch { total_level: 63, ..op },
            feedback: 0,
            carrier: op,
        };
        PatchBank::encode(&[vec![patch]])
    }

    fn opened() -> AdlibSoundDriver {
        let mut driver = AdlibSoundDriver::new(44_100);
        driver.open().unwrap();
        driver.install_patch(organ_bank()).unwrap();
        driver.set_master_volume(127);
        driver
    }

    #[test]
    fn test_open_enables_waveform_select() {
        let driver = opened();
        assert_eq!(driver.port(REG_TEST), WAVE_SELECT_ENABLE);
        assert_eq!(driver.port(0xB0), 0);
    }

    #[test]
    fn test_start_note_programs_frequency() {
        let mut driver = opened();
        driver.start_note(0, Some(0), 60, 127);
        // Middle C: F-number 343 (0x157) in block 4
        assert_eq!(driver.port(0xA0), 0x57);
        assert_eq!(driver.port(0xB0), KEY_ON_BIT | (4 << 2) | 0x01);
        assert!(driver.is_voiced(0));
        assert!(driver.chip().is_key_on(0));
    }

    #[test]
    fn test_start_note_without_program_is_ignored() {
        let mut driver = opened();
        driver.start_note(0, None, 60, 127);
        driver.start_note(1, Some(9), 60, 127);
        assert!(!driver.is_voiced(0));
        assert!(!driver.is_voiced(1));
    }

    #[test]
    fn test_release_voice_clears_key_on() {
        let mut driver = opened();
        driver.start_note(2, Some(0), 48, 100);
        driver.release_voice(2);
        assert!(!driver.is_voiced(2));
        assert_eq!(driver.port(0xB2) & KEY_ON_BIT, 0);
    }

    #[test]
    fn test_volume_levels() {
        let mut driver = opened();
        driver.voice_controller(0, 7, 127);
        driver.start_note(0, Some(0), 60, 127);
        // Full volume carrier: zero attenuation
        assert_eq!(driver.port(0x43) & 0x3F, 0);
        // FM connection keeps the modulator at its patch level
        assert_eq!(driver.port(0x40) & 0x3F, 63);

        driver.voice_controller(0, 7, 0);
        assert_eq!(driver.port(0x43) & 0x3F, 63);
    }

    #[test]
    fn test_pitch_bend_up_one_semitone() {
        let mut driver = opened();
        driver.start_note(0, Some(0), 60, 127);
        driver.set_voice_pitch(0, PITCH_CENTRE + 4 * PITCH_STEP as u16);
        // C#: table index 4
        assert_eq!(driver.port(0xA0), (FNUM_TABLE[4] & 0xFF) as u8);
    }

    #[test]
    fn test_master_volume_returns_previous() {
        let mut driver = AdlibSoundDriver::new(44_100);
        assert_eq!(driver.set_master_volume(100), 0);
        assert_eq!(driver.set_master_volume(50), 100);
    }

    #[test]
    fn test_timer_cadence() {
        let mut driver = opened();
        let signal = timer_signal();
        driver.set_update_callback(signal.clone());
        let mut buf = vec![0i16; 882 * 2 + 100];
        driver.read_buffer(&mut buf);
        assert_eq!(signal.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_sound_output_after_note() {
        let mut driver = opened();
        driver.voice_controller(0, 7, 127);
        driver.start_note(0, Some(0), 69, 127);
        let mut buf = vec![0i16; 2048];
        driver.read_buffer(&mut buf);
        assert!(buf.iter().any(|&s| s != 0));
    }
}
