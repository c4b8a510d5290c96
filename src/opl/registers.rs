//! OPL2 Register Definitions
//!
//! The chip exposes a flat 256-byte register space. Operator registers are
//! addressed through a sparse offset map (offsets 6, 7, 14 and 15 of each
//! 8-byte block are holes), channel registers are addressed directly.

use bitflags::bitflags;
use std::fmt;

/// Test / waveform-select enable register
pub const REG_TEST: u8 = 0x01;
/// Timer 1 preset
pub const REG_TIMER1: u8 = 0x02;
/// Timer 2 preset
pub const REG_TIMER2: u8 = 0x03;
/// Timer control / IRQ reset
pub const REG_TIMER_CONTROL: u8 = 0x04;
/// CSM mode and keyboard split (note select)
pub const REG_KEY_SPLIT: u8 = 0x08;
/// AM / VIB / EG type / KSR / multiplier (per operator)
pub const REG_CHARACTER: u8 = 0x20;
/// Key scale level / total level (per operator)
pub const REG_LEVELS: u8 = 0x40;
/// Attack / decay rates (per operator)
pub const REG_ATTACK_DECAY: u8 = 0x60;
/// Sustain level / release rate (per operator)
pub const REG_SUSTAIN_RELEASE: u8 = 0x80;
/// F-number low byte (per channel)
pub const REG_FNUM_LO: u8 = 0xA0;
/// Key-on, block and F-number high bits (per channel)
pub const REG_KEYON_BLOCK: u8 = 0xB0;
/// Tremolo / vibrato depth and rhythm control
pub const REG_RHYTHM: u8 = 0xBD;
/// Feedback and connection (per channel)
pub const REG_FEEDBACK: u8 = 0xC0;
/// Waveform select (per operator)
pub const REG_WAVEFORM: u8 = 0xE0;

/// Key-on bit in the 0xB0 block
pub const KEY_ON_BIT: u8 = 0x20;
/// Waveform-select enable bit in register 0x01
pub const WAVE_SELECT_ENABLE: u8 = 0x20;

/// Modulator (operator 1) slot of each channel
pub const MODULATOR_SLOT: [usize; 9] = [0, 1, 2, 6, 7, 8, 12, 13, 14];

/// Carrier (operator 2) slot of each channel
pub const CARRIER_SLOT: [usize; 9] = [3, 4, 5, 9, 10, 11, 15, 16, 17];

/// Register offset of each operator slot within an operator register block
pub const SLOT_OFFSET: [u8; 18] = [
    0, 1, 2, 3, 4, 5, 8, 9, 10, 11, 12, 13, 16, 17, 18, 19, 20, 21,
];

bitflags! {
    /// Operator characteristic register (0x20-0x35) bitflags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OperatorFlags: u8 {
        /// Amplitude modulation (tremolo)
        const TREMOLO = 0x80;
        /// Frequency modulation (vibrato)
        const VIBRATO = 0x40;
        /// Sustaining envelope (hold at sustain level while keyed)
        const SUSTAIN = 0x20;
        /// Key scale rate
        const KSR = 0x10;
    }
}

/// Map a register offset (low five bits of an operator register) to its slot
pub fn slot_for_offset(offset: u8) -> Option<usize> {
    SLOT_OFFSET.iter().position(|&o| o == offset)
}

/// Register classification used by the chip's write dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterGroup {
    /// 0x01
    Test,
    /// 0x02-0x04
    Timer,
    /// 0x08
    KeySplit,
    /// 0x20-0x35
    Character(usize),
    /// 0x40-0x55
    Levels(usize),
    /// 0x60-0x75
    AttackDecay(usize),
    /// 0x80-0x95
    SustainRelease(usize),
    /// 0xA0-0xA8
    FnumLo(usize),
    /// 0xB0-0xB8
    KeyOnBlock(usize),
    /// 0xBD
    Rhythm,
    /// 0xC0-0xC8
    Feedback(usize),
    /// 0xE0-0xF5
    Waveform(usize),
    /// Anything the YM3812 does not decode
    Unused,
}

impl RegisterGroup {
    /// Classify a raw register address
    pub fn from_addr(addr: u8) -> Self {
        let operator = |base: u8| slot_for_offset(addr - base);
        match addr {
            REG_TEST => RegisterGroup::Test,
            REG_TIMER1..=REG_TIMER_CONTROL => RegisterGroup::Timer,
            REG_KEY_SPLIT => RegisterGroup::KeySplit,
            0x20..=0x35 => operator(REG_CHARACTER).map_or(RegisterGroup::Unused, RegisterGroup::Character),
            0x40..=0x55 => operator(REG_LEVELS).map_or(RegisterGroup::Unused, RegisterGroup::Levels),
            0x60..=0x75 => {
                operator(REG_ATTACK_DECAY).map_or(RegisterGroup::Unused, RegisterGroup::AttackDecay)
            }
            0x80..=0x95 => operator(REG_SUSTAIN_RELEASE)
                .map_or(RegisterGroup::Unused, RegisterGroup::SustainRelease),
            0xA0..=0xA8 => RegisterGroup::FnumLo((addr - REG_FNUM_LO) as usize),
            0xB0..=0xB8 => RegisterGroup::KeyOnBlock((addr - REG_KEYON_BLOCK) as usize),
            REG_RHYTHM => RegisterGroup::Rhythm,
            0xC0..=0xC8 => RegisterGroup::Feedback((addr - REG_FEEDBACK) as usize),
            0xE0..=0xF5 => operator(REG_WAVEFORM).map_or(RegisterGroup::Unused, RegisterGroup::Waveform),
            _ => RegisterGroup::Unused,
        }
    }
}

impl fmt::Display for RegisterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterGroup::Test => write!(f, "Test / Waveform Enable"),
            RegisterGroup::Timer => write!(f, "Timer"),
            RegisterGroup::KeySplit => write!(f, "CSM / Keyboard Split"),
            RegisterGroup::Character(s) => write!(f, "Slot {} AM/VIB/EG/KSR/MULT", s),
            RegisterGroup::Levels(s) => write!(f, "Slot {} KSL/TL", s),
            RegisterGroup::AttackDecay(s) => write!(f, "Slot {} AR/DR", s),
            RegisterGroup::SustainRelease(s) => write!(f, "Slot {} SL/RR", s),
            RegisterGroup::FnumLo(c) => write!(f, "Channel {} F-Number Low", c),
            RegisterGroup::KeyOnBlock(c) => write!(f, "Channel {} Key-On/Block", c),
            RegisterGroup::Rhythm => write!(f, "AM/VIB Depth / Rhythm"),
            RegisterGroup::Feedback(c) => write!(f, "Channel {} Feedback/Connection", c),
            RegisterGroup::Waveform(s) => write!(f, "Slot {} Waveform", s),
            RegisterGroup::Unused => write!(f, "Unused"),
        }
    }
}
