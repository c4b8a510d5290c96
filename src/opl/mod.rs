//! OPL2 (YM3812) FM Synthesis Domain
//!
//! Register-level emulation of the Yamaha YM3812 found on Adlib and
//! SoundBlaster cards: nine two-operator FM channels, per-operator envelope
//! generators, log-sin/exp waveform synthesis and the tremolo/vibrato LFOs.
//!
//! Implementation:
//! - `chip` - Register file, channel routing and sample generation
//! - `operator` - Phase and envelope generator for a single operator slot
//! - `registers` - Register map and operator slot addressing
//! - `tables` - Log-sin, exponent and key-scale lookup tables

// Internal modules
pub mod chip;
pub mod operator;
pub mod registers;
pub mod tables;

// Re-export public API
pub use chip::Opl2;
pub use operator::{EnvelopeStage, Operator};
pub use registers::{RegisterGroup, CARRIER_SLOT, MODULATOR_SLOT, SLOT_OFFSET};

/// Master clock of an Adlib card in Hz
pub const OPL_CLOCK: u32 = 3_579_545;

/// Native sample rate of the chip (master clock / 72)
pub const NATIVE_RATE: u32 = OPL_CLOCK / 72;

/// Number of two-operator melodic channels
pub const CHANNEL_COUNT: usize = 9;

/// Number of operator slots
pub const SLOT_COUNT: usize = 18;
