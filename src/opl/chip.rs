//! YM3812 chip core
//!
//! Nine two-operator channels ticked at the native rate (master clock / 72)
//! and averaged down to the host rate. Rhythm mode and the timers are
//! latched in the register file but not synthesised.

use super::operator::Operator;
use super::registers::{
    RegisterGroup, CARRIER_SLOT, KEY_ON_BIT, MODULATOR_SLOT, WAVE_SELECT_ENABLE,
};
use super::tables::{Tables, KSL_ROM};
use super::{CHANNEL_COUNT, NATIVE_RATE, SLOT_COUNT};

const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Native samples per tremolo LFO step
const TREMOLO_STEP: u32 = 64;
/// Tremolo LFO positions per cycle
const TREMOLO_CYCLE: u16 = 210;
/// Native samples per vibrato LFO step
const VIBRATO_STEP: u32 = 1024;

/// Per-channel frequency and routing state
#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    fnum: u16,
    block: u8,
    keyed: bool,
    feedback: u8,
    additive: bool,
}

impl Channel {
    /// Key scale number used for rate scaling
    fn key_scale(&self, note_select: bool) -> u8 {
        let bit = if note_select {
            (self.fnum >> 8) & 1
        } else {
            (self.fnum >> 9) & 1
        };
        (self.block << 1) | bit as u8
    }

    /// Key scale level attenuation before the per-operator shift
    fn ksl_base(&self) -> u32 {
        let level = ((KSL_ROM[(self.fnum >> 6) as usize] as i32) << 2) - ((8 - self.block as i32) << 5);
        level.max(0) as u32
    }
}

/// YM3812 (OPL2) emulator
#[derive(Clone)]
pub struct Opl2 {
    regs: [u8; 256],
    slots: [Operator; SLOT_COUNT],
    channels: [Channel; CHANNEL_COUNT],
    tables: &'static Tables,

    waveform_select: bool,
    note_select: bool,
    deep_tremolo: bool,
    deep_vibrato: bool,
    tremolo_pos: u16,
    vibrato_pos: u8,
    lfo_clock: u32,

    host_replay_rate: u32,
    inner_cycle: u32,
    last_sample: i16,
    user_mute: [bool; CHANNEL_COUNT],
}

impl Opl2 {
    /// Create a chip rendering at 44.1 kHz
    pub fn new() -> Self {
        Self::with_sample_rate(DEFAULT_SAMPLE_RATE)
    }

    /// Create a chip rendering at the given host sample rate
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        let mut chip = Opl2 {
            regs: [0; 256],
            slots: std::array::from_fn(|_| Operator::new()),
            channels: [Channel::default(); CHANNEL_COUNT],
            tables: Tables::get(),
            waveform_select: false,
            note_select: false,
            deep_tremolo: false,
            deep_vibrato: false,
            tremolo_pos: 0,
            vibrato_pos: 0,
            lfo_clock: 0,
            host_replay_rate: sample_rate.max(1),
            inner_cycle: 0,
            last_sample: 0,
            user_mute: [false; CHANNEL_COUNT],
        };
        chip.reset();
        chip
    }

    /// Reset all registers and generators
    pub fn reset(&mut self) {
        self.regs = [0; 256];
        for slot in self.slots.iter_mut() {
            *slot = Operator::new();
        }
        self.channels = [Channel::default(); CHANNEL_COUNT];
        self.waveform_select = false;
        self.note_select = false;
        self.deep_tremolo = false;
        self.deep_vibrato = false;
        self.tremolo_pos = 0;
        self.vibrato_pos = 0;
        self.lfo_clock = 0;
        self.inner_cycle = 0;
        self.last_sample = 0;
    }

    /// Host sample rate
    pub fn sample_rate(&self) -> u32 {
        self.host_replay_rate
    }

    /// Read back a latched register value
    pub fn read_register(&self, addr: u8) -> u8 {
        self.regs[addr as usize]
    }

    /// Write a register
    pub fn write_register(&mut self, addr: u8, value: u8) {
        self.regs[addr as usize] = value;
        match RegisterGroup::from_addr(addr) {
            RegisterGroup::Test => self.waveform_select = value & WAVE_SELECT_ENABLE != 0,
            RegisterGroup::KeySplit => self.note_select = value & 0x40 != 0,
            RegisterGroup::Character(slot) => self.slots[slot].write_character(value),
            RegisterGroup::Levels(slot) => self.slots[slot].write_levels(value),
            RegisterGroup::AttackDecay(slot) => self.slots[slot].write_attack_decay(value),
            RegisterGroup::SustainRelease(slot) => self.slots[slot].write_sustain_release(value),
            RegisterGroup::Waveform(slot) => self.slots[slot].write_waveform(value),
            RegisterGroup::FnumLo(ch) => {
                let channel = &mut self.channels[ch];
                channel.fnum = (channel.fnum & 0x300) | value as u16;
            }
            RegisterGroup::KeyOnBlock(ch) => {
                let keyed = value & KEY_ON_BIT != 0;
                let channel = &mut self.channels[ch];
                channel.fnum = (channel.fnum & 0xFF) | (((value & 0x03) as u16) << 8);
                channel.block = (value >> 2) & 0x07;
                let was_keyed = channel.keyed;
                channel.keyed = keyed;
                if keyed && !was_keyed {
                    self.slots[MODULATOR_SLOT[ch]].key_on();
                    self.slots[CARRIER_SLOT[ch]].key_on();
                } else if !keyed && was_keyed {
                    self.slots[MODULATOR_SLOT[ch]].key_off();
                    self.slots[CARRIER_SLOT[ch]].key_off();
                }
            }
            RegisterGroup::Rhythm => {
                self.deep_tremolo = value & 0x80 != 0;
                self.deep_vibrato = value & 0x40 != 0;
            }
            RegisterGroup::Feedback(ch) => {
                self.channels[ch].feedback = (value >> 1) & 0x07;
                self.channels[ch].additive = value & 0x01 != 0;
            }
            RegisterGroup::Timer | RegisterGroup::Unused => {}
        }
    }

    /// Whether a channel's key-on bit is set
    pub fn is_key_on(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(|c| c.keyed)
    }

    /// F-number and block currently latched for a channel
    pub fn channel_frequency(&self, channel: usize) -> Option<(u16, u8)> {
        self.channels.get(channel).map(|c| (c.fnum, c.block))
    }

    /// Output frequency in Hz of a channel at multiplier 1
    pub fn channel_hz(&self, channel: usize) -> Option<f32> {
        self.channels.get(channel).map(|c| {
            c.fnum as f32 * NATIVE_RATE as f32 / (1u32 << (20 - c.block as u32)) as f32
        })
    }

    /// Mute or unmute a channel in the mix (does not touch registers)
    pub fn set_channel_mute(&mut self, channel: usize, mute: bool) {
        if let Some(m) = self.user_mute.get_mut(channel) {
            *m = mute;
        }
    }

    /// Whether a channel is muted in the mix
    pub fn is_channel_muted(&self, channel: usize) -> bool {
        self.user_mute.get(channel).copied().unwrap_or(false)
    }

    /// Last sample produced by [`compute_next_sample`](Self::compute_next_sample)
    pub fn last_sample(&self) -> i16 {
        self.last_sample
    }

    fn advance_lfo(&mut self) {
        self.lfo_clock = self.lfo_clock.wrapping_add(1);
        if self.lfo_clock % TREMOLO_STEP == 0 {
            self.tremolo_pos = (self.tremolo_pos + 1) % TREMOLO_CYCLE;
        }
        if self.lfo_clock % VIBRATO_STEP == 0 {
            self.vibrato_pos = (self.vibrato_pos + 1) & 7;
        }
    }

    fn tremolo(&self) -> u32 {
        let pos = if self.tremolo_pos >= TREMOLO_CYCLE / 2 {
            TREMOLO_CYCLE - self.tremolo_pos
        } else {
            self.tremolo_pos
        } as u32;
        if self.deep_tremolo {
            pos >> 2
        } else {
            pos >> 4
        }
    }

    fn vibrato_fnum(&self, fnum: u16) -> u16 {
        if self.vibrato_pos & 3 == 0 {
            return fnum;
        }
        let mut range = (fnum >> 7) & 7;
        if self.vibrato_pos & 1 != 0 {
            range >>= 1;
        }
        if !self.deep_vibrato {
            range >>= 1;
        }
        if self.vibrato_pos & 4 != 0 {
            fnum.saturating_sub(range)
        } else {
            (fnum + range).min(0x3FF)
        }
    }

    /// Run the chip for one native sample and return the mixed output
    fn tick(&mut self) -> i32 {
        let tremolo = self.tremolo();
        let mut mix = 0i32;

        for ch in 0..CHANNEL_COUNT {
            let channel = self.channels[ch];
            let key_scale = channel.key_scale(self.note_select);
            let ksl_base = channel.ksl_base();
            let (m, c) = (MODULATOR_SLOT[ch], CARRIER_SLOT[ch]);

            for slot in [m, c] {
                let fnum = if self.slots[slot].has_vibrato() {
                    self.vibrato_fnum(channel.fnum)
                } else {
                    channel.fnum
                };
                self.slots[slot].advance_phase(fnum, channel.block);
                self.slots[slot].advance_envelope(key_scale);
            }

            let feedback = if channel.feedback > 0 {
                self.slots[m].feedback_sum() >> (9 - channel.feedback)
            } else {
                0
            };
            let wse = self.waveform_select;
            let modulator =
                self.slots[m].compute(self.tables, feedback, ksl_base, tremolo, wse);
            let out = if channel.additive {
                modulator + self.slots[c].compute(self.tables, 0, ksl_base, tremolo, wse)
            } else {
                self.slots[c].compute(self.tables, modulator, ksl_base, tremolo, wse)
            };

            if !self.user_mute[ch] {
                mix += out;
            }
        }

        self.advance_lfo();
        mix
    }

    /// Called at host replay rate.
    /// Internally runs the chip at its native rate and averages the output
    /// for each host sample.
    pub fn compute_next_sample(&mut self) -> i16 {
        let mut acc = 0i32;
        let mut count = 0i32;

        loop {
            acc += self.tick();
            count += 1;
            self.inner_cycle += self.host_replay_rate;
            if self.inner_cycle >= NATIVE_RATE {
                break;
            }
        }
        self.inner_cycle -= NATIVE_RATE;

        let sample = (acc / count).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        self.last_sample = sample;
        sample
    }

    /// Fill a buffer with consecutive samples
    pub fn generate_samples_into(&mut self, buffer: &mut [i16]) {
        for sample in buffer.iter_mut() {
            *sample = self.compute_next_sample();
        }
    }
}

impl Default for Opl2 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Opl2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opl2")
            .field("sample_rate", &self.host_replay_rate)
            .field("waveform_select", &self.waveform_select)
            .field("keyed", &self.channels.iter().map(|c| c.keyed).collect::<Vec<_>>())
            .finish()
    }
}
