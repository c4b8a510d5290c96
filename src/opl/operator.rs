//! OPL2 Operator
//!
//! One operator slot: a phase generator driven by the channel F-number and
//! block, and a four-stage envelope generator working in the attenuation
//! domain (0 = full volume, 511 = silent).

use super::registers::OperatorFlags;
use super::tables::{Tables, ENV_MAX, KSL_SHIFT, MULT_X2};

/// Phase accumulator width (10 bits of waveform phase + 9 fractional bits)
const PHASE_MASK: u32 = (1 << 19) - 1;

/// Envelope generator stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    /// Moving exponentially towards zero attenuation
    Attack,
    /// Falling linearly towards the sustain level
    Decay,
    /// Holding (sustaining voices) or releasing (percussive voices)
    Sustain,
    /// Key released, falling to silence
    Release,
    /// Fully attenuated
    Off,
}

/// Single FM operator slot
#[derive(Debug, Clone)]
pub struct Operator {
    flags: OperatorFlags,
    mult: u8,
    ksl: u8,
    total_level: u8,
    attack: u8,
    decay: u8,
    sustain_level: u8,
    release: u8,
    waveform: u8,

    phase: u32,
    env_level: u16,
    env_acc: u32,
    stage: EnvelopeStage,
    keyed: bool,

    /// Last two outputs, used for modulator self-feedback
    out: i32,
    prev_out: i32,
}

impl Operator {
    /// Create a silent operator
    pub fn new() -> Self {
        Operator {
            flags: OperatorFlags::empty(),
            mult: 0,
            ksl: 0,
            total_level: 0,
            attack: 0,
            decay: 0,
            sustain_level: 0,
            release: 0,
            waveform: 0,
            phase: 0,
            env_level: ENV_MAX,
            env_acc: 0,
            stage: EnvelopeStage::Off,
            keyed: false,
            out: 0,
            prev_out: 0,
        }
    }

    /// Write the AM/VIB/EGT/KSR/MULT register
    pub fn write_character(&mut self, value: u8) {
        self.flags = OperatorFlags::from_bits_truncate(value);
        self.mult = value & 0x0F;
    }

    /// Write the KSL/TL register
    pub fn write_levels(&mut self, value: u8) {
        self.ksl = value >> 6;
        self.total_level = value & 0x3F;
    }

    /// Write the AR/DR register
    pub fn write_attack_decay(&mut self, value: u8) {
        self.attack = value >> 4;
        self.decay = value & 0x0F;
    }

    /// Write the SL/RR register
    pub fn write_sustain_release(&mut self, value: u8) {
        self.sustain_level = value >> 4;
        self.release = value & 0x0F;
    }

    /// Write the waveform select register
    pub fn write_waveform(&mut self, value: u8) {
        self.waveform = value & 0x03;
    }

    /// Key the operator on, restarting phase and envelope attack
    pub fn key_on(&mut self) {
        if !self.keyed {
            self.keyed = true;
            self.phase = 0;
            self.env_acc = 0;
            self.stage = EnvelopeStage::Attack;
        }
    }

    /// Key the operator off, entering release
    pub fn key_off(&mut self) {
        if self.keyed {
            self.keyed = false;
            if self.stage != EnvelopeStage::Off {
                self.stage = EnvelopeStage::Release;
            }
        }
    }

    /// Current envelope stage
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Current envelope attenuation (0..=511)
    pub fn envelope_level(&self) -> u16 {
        self.env_level
    }

    /// Whether tremolo applies to this operator
    pub fn has_tremolo(&self) -> bool {
        self.flags.contains(OperatorFlags::TREMOLO)
    }

    /// Whether vibrato applies to this operator
    pub fn has_vibrato(&self) -> bool {
        self.flags.contains(OperatorFlags::VIBRATO)
    }

    /// Sum of the last two outputs, for modulator feedback
    pub fn feedback_sum(&self) -> i32 {
        self.out + self.prev_out
    }

    /// Effective envelope rate for a 4-bit register rate
    fn effective_rate(&self, rate: u8, key_scale: u8) -> u8 {
        if rate == 0 {
            return 0;
        }
        let offset = if self.flags.contains(OperatorFlags::KSR) {
            key_scale
        } else {
            key_scale >> 2
        };
        (rate * 4 + offset).min(63)
    }

    /// Accumulate a rate and return how many envelope steps are due
    fn rate_steps(&mut self, rate: u8) -> u32 {
        if rate == 0 {
            return 0;
        }
        let step = ((4 + (rate as u32 & 3)) << (rate >> 2)) * 2;
        self.env_acc += step;
        let steps = self.env_acc >> 16;
        self.env_acc &= 0xFFFF;
        steps
    }

    /// Advance the envelope generator by one native sample
    pub fn advance_envelope(&mut self, key_scale: u8) {
        match self.stage {
            EnvelopeStage::Attack => {
                let rate = self.effective_rate(self.attack, key_scale);
                if rate >= 60 {
                    self.env_level = 0;
                } else {
                    for _ in 0..self.rate_steps(rate) {
                        self.env_level = self.env_level.saturating_sub((self.env_level >> 3) + 1);
                    }
                }
                if self.env_level == 0 {
                    self.env_acc = 0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                let target = self.sustain_target();
                let rate = self.effective_rate(self.decay, key_scale);
                let steps = self.rate_steps(rate) as u16;
                self.env_level = (self.env_level + steps).min(ENV_MAX);
                if self.env_level >= target {
                    self.env_level = target;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => {
                if !self.flags.contains(OperatorFlags::SUSTAIN) {
                    self.release_step(key_scale);
                }
            }
            EnvelopeStage::Release => self.release_step(key_scale),
            EnvelopeStage::Off => self.env_level = ENV_MAX,
        }
    }

    fn release_step(&mut self, key_scale: u8) {
        let rate = self.effective_rate(self.release, key_scale);
        let steps = self.rate_steps(rate) as u16;
        self.env_level = (self.env_level + steps).min(ENV_MAX);
        if self.env_level >= ENV_MAX {
            self.stage = EnvelopeStage::Off;
        }
    }

    fn sustain_target(&self) -> u16 {
        if self.sustain_level == 0x0F {
            0x1F << 4
        } else {
            (self.sustain_level as u16) << 4
        }
    }

    /// Advance the phase generator by one native sample
    pub fn advance_phase(&mut self, fnum: u16, block: u8) {
        let inc = ((fnum as u32) << block) >> 1;
        self.phase = (self.phase + ((inc * MULT_X2[self.mult as usize]) >> 1)) & PHASE_MASK;
    }

    /// Compute the operator output for the current phase.
    ///
    /// `modulation` is added to the 10-bit phase, `ksl_base` is the channel's
    /// key scale attenuation before the per-operator shift.
    pub fn compute(
        &mut self,
        tables: &Tables,
        modulation: i32,
        ksl_base: u32,
        tremolo: u32,
        waveform_enabled: bool,
    ) -> i32 {
        let mut attenuation = self.env_level as u32
            + ((self.total_level as u32) << 2)
            + (ksl_base >> KSL_SHIFT[self.ksl as usize]);
        if self.has_tremolo() {
            attenuation += tremolo;
        }
        let phase = ((self.phase >> 9) as i32 + modulation) as u32;
        let waveform = if waveform_enabled { self.waveform } else { 0 };
        let out = if self.stage == EnvelopeStage::Off {
            0
        } else {
            tables.waveform(waveform, phase, attenuation)
        };
        self.prev_out = self.out;
        self.out = out;
        out
    }
}

impl Default for Operator {
    fn default() -> Self {
        Self::new()
    }
}
