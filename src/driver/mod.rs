//! Sound Driver Abstraction
//!
//! A sound driver fronts one physical or emulated synthesizer. The manager
//! talks to every installed device through the [`SoundDriver`] trait, which
//! exposes two command families:
//!
//! - Voice commands for pooled voice groups (note start, release, per-voice
//!   controllers and pitch)
//! - Channel commands for fixed-slot groups (controllers, program, pitch bend
//!   and the raw shorthand opcodes of the track bytecode)
//!
//! Commands a device does not implement default to no-ops, mirroring the
//! optional methods of the chip backend trait.
//!
//! Drivers also describe their voice capacity through a byte-coded
//! [`GroupData`] table, and raise a [`TimerSignal`] from `read_buffer` at a
//! fixed sample cadence so that the logic thread can run the sound server.

pub mod adlib;
pub mod patch;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::{Result, SoundError};

pub use adlib::AdlibSoundDriver;
pub use patch::{AdlibPatch, OperatorPatch, PatchBank};

/// Driver number of the Adlib / SoundBlaster FM driver
pub const ADLIB_DRIVER_NUM: u32 = 3;

/// Driver number reserved for the Roland MT-32 driver (not provided)
pub const ROLAND_DRIVER_NUM: u32 = 2;

/// Terminator byte of a driver group table
pub const GROUP_END: u8 = 0xFF;

/// Pending-tick counter shared between a driver's audio path and the
/// logic thread.
///
/// The driver increments it every timer period; the manager drains it in
/// `service_timer`. Nothing else crosses the thread boundary.
pub type TimerSignal = Arc<AtomicU32>;

/// Create a fresh timer signal with no pending ticks
pub fn timer_signal() -> TimerSignal {
    Arc::new(AtomicU32::new(0))
}

/// Raise one pending tick on a timer signal
pub fn raise_timer(signal: &TimerSignal) {
    signal.fetch_add(1, Ordering::AcqRel);
}

/// Voice block kind declared by a driver for one voice group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBlock {
    /// Fixed per-channel slots; one tag byte per slot.
    /// Bit 7 set marks a reserved slot, the low seven bits are the slot's
    /// channel / voice number.
    Fixed(Vec<u8>),
    /// Pool of interchangeable voices
    Pooled {
        /// Number of voices in the pool
        count: u8,
        /// Reserved byte carried by the table format
        reserved: u8,
    },
}

/// One `(group id, block)` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// Voice group id (0..16)
    pub group: u8,
    /// Voices supplied to that group
    pub block: GroupBlock,
}

/// Static voice-group capability table of a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupData {
    /// Capability mask matched against sound resource group tables
    pub mask: u32,
    /// Group declarations in table order
    pub entries: Vec<GroupEntry>,
}

impl GroupData {
    /// Parse a byte-coded group table.
    ///
    /// Layout: `(group:u8, flag:u8, ...)*` terminated by `0xff`. A zero
    /// flag introduces a list of slot tags terminated by `0xff`; a non-zero
    /// flag is followed by `(count:u8, reserved:u8)`.
    pub fn parse(mask: u32, data: &[u8]) -> Result<Self> {
        let truncated = || SoundError::ResourceFormat("truncated driver group table".into());
        let mut entries = Vec::new();
        let mut pos = 0;

        loop {
            let group = *data.get(pos).ok_or_else(truncated)?;
            pos += 1;
            if group == GROUP_END {
                break;
            }
            let flag = *data.get(pos).ok_or_else(truncated)?;
            pos += 1;

            let block = if flag == 0 {
                let len = data[pos..]
                    .iter()
                    .position(|&b| b == GROUP_END)
                    .ok_or_else(truncated)?;
                let tags = data[pos..pos + len].to_vec();
                pos += len + 1;
                GroupBlock::Fixed(tags)
            } else {
                let count = *data.get(pos).ok_or_else(truncated)?;
                let reserved = *data.get(pos + 1).ok_or_else(truncated)?;
                pos += 2;
                GroupBlock::Pooled { count, reserved }
            };

            entries.push(GroupEntry { group, block });
        }

        Ok(GroupData { mask, entries })
    }

    /// Encode back into the byte-coded table format
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.push(entry.group);
            match &entry.block {
                GroupBlock::Fixed(tags) => {
                    out.push(0);
                    out.extend_from_slice(tags);
                    out.push(GROUP_END);
                }
                GroupBlock::Pooled { count, reserved } => {
                    out.push(1);
                    out.push(*count);
                    out.push(*reserved);
                }
            }
        }
        out.push(GROUP_END);
        out
    }

    /// Declarations for a single group id
    pub fn blocks_for(&self, group: u8) -> impl Iterator<Item = &GroupBlock> {
        self.entries
            .iter()
            .filter(move |e| e.group == group)
            .map(|e| &e.block)
    }
}

/// Detection status of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Hardware probe ran and found the device
    Detected,
    /// Listed without probing
    Skipped,
}

/// Entry of the available-driver registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    /// Driver number used by `install_driver`
    pub driver_num: u32,
    /// Detection status
    pub status: DriverStatus,
    /// Memory footprint reported to the game's setup screen
    pub footprint: u32,
    /// Short menu description
    pub short_description: String,
    /// Device family identifier
    pub long_description: String,
}

impl fmt::Display for DriverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({}) [{:?}]",
            self.driver_num, self.short_description, self.long_description, self.status
        )
    }
}

/// Common interface for synthesizer devices
///
/// Voice commands address a physical voice number; channel commands address
/// the voice number of a fixed slot together with its voice group.
pub trait SoundDriver: Send {
    /// Short device name
    fn name(&self) -> &str;

    /// Driver resource version window `(min, max)`
    fn version_range(&self) -> (u16, u16);

    /// Acquire and initialise the device
    fn open(&mut self) -> Result<()>;

    /// Silence and release the device
    fn close(&mut self);

    /// Voice group capability table
    fn group_data(&self) -> &GroupData;

    /// Whether the driver needs a patch bank resource to produce sound
    fn requires_patch_bank(&self) -> bool {
        false
    }

    /// Install an instrument bank; ownership of the buffer passes to the driver
    fn install_patch(&mut self, _data: Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Set the master volume (0..=127), returning the previous value
    fn set_master_volume(&mut self, volume: u8) -> u8;

    /// Assign an instrument to a voice and trigger a note.
    ///
    /// `program` of `None` keeps the currently loaded instrument.
    fn start_note(&mut self, _voice: u8, _program: Option<u8>, _note: u8, _velocity: u8) {}

    /// Release the note playing on a voice
    fn release_voice(&mut self, _voice: u8) {}

    /// Continuous controller for a pooled voice
    fn voice_controller(&mut self, _voice: u8, _command: u8, _value: u8) {}

    /// Pitch bend (0..=0x3fff, centre 0x2000) for a pooled voice
    fn set_voice_pitch(&mut self, _voice: u8, _pitch_bend: u16) {}

    /// Percussion trigger for a pooled voice
    fn percussion_touch(&mut self, _voice: u8, _group: u8, _value: u8) {}

    /// Continuous controller for a fixed slot
    fn channel_controller(&mut self, _channel: u8, _group: u8, _command: u8, _value: u8) {}

    /// Pitch bend for a fixed slot
    fn set_channel_pitch_bend(&mut self, _channel: u8, _pitch_bend: u16) {}

    /// Program change for a fixed slot
    fn set_program(&mut self, _channel: u8, _program: u8) {}

    /// Velocity set for a fixed slot
    fn set_velocity(&mut self, _channel: u8, _group: u8, _velocity: u8) {}

    /// Note-touch opcode for a fixed slot
    fn note_touch(&mut self, _channel: u8, _group: u8) {}

    /// Note shorthand opcode for a fixed slot
    fn note_shorthand(&mut self, _channel: u8, _group: u8) {}

    /// Wide parameter opcode for a fixed slot
    fn wide_command(&mut self, _channel: u8, _group: u8, _value: u16) {}

    /// Called once per server tick
    fn poll(&mut self) {}

    /// Generate a block of mono samples, returning the number written
    fn read_buffer(&mut self, buffer: &mut [i16]) -> usize {
        buffer.fill(0);
        buffer.len()
    }

    /// Register the timer signal raised every timer period
    fn set_update_callback(&mut self, _signal: TimerSignal) {}
}

/// A driver on the manager's installed list
pub struct InstalledDriver {
    /// Driver number it was installed under
    pub num: u32,
    /// The device
    pub driver: Box<dyn SoundDriver>,
}

impl fmt::Debug for InstalledDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledDriver")
            .field("num", &self.num)
            .field("name", &self.driver.name())
            .finish()
    }
}

/// Instantiate the built-in driver for a driver number
pub fn instantiate_driver(driver_num: u32, sample_rate: u32) -> Option<Box<dyn SoundDriver>> {
    match driver_num {
        ADLIB_DRIVER_NUM => Some(Box::new(AdlibSoundDriver::new(sample_rate))),
        _ => None,
    }
}
