//! Shared test fixtures: a driver that records every call it receives

#![allow(dead_code)]

use std::sync::Arc;

use fm_sound_server::driver::{
    raise_timer, GroupBlock, GroupData, GroupEntry, SoundDriver, TimerSignal,
};
use fm_sound_server::resource::{DRIVER_RES_VERSION, SOUND_RES_VERSION};
use fm_sound_server::sound::TrackEvent;
use fm_sound_server::{MemoryResources, SoundConfig, SoundManager};
use parking_lot::Mutex;

/// Driver number the recording driver is installed under
pub const RECORDING_DRIVER_NUM: u32 = 7;

/// Voice group used by pooled test drivers
pub const POOL_GROUP: u16 = 1;
/// Capability mask of pooled test drivers
pub const POOL_MASK: u32 = 1;
/// Voice group used by fixed-slot test drivers
pub const FIXED_GROUP: u16 = 2;
/// Capability mask of fixed-slot test drivers
pub const FIXED_MASK: u32 = 2;

/// A driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Close,
    MasterVolume(u8),
    InstallPatch(usize),
    StartNote {
        voice: u8,
        program: Option<u8>,
        note: u8,
        velocity: u8,
    },
    ReleaseVoice(u8),
    VoiceController {
        voice: u8,
        command: u8,
        value: u8,
    },
    VoicePitch {
        voice: u8,
        pitch_bend: u16,
    },
    PercussionTouch {
        voice: u8,
        group: u8,
        value: u8,
    },
    ChannelController {
        channel: u8,
        group: u8,
        command: u8,
        value: u8,
    },
    ChannelPitch {
        channel: u8,
        pitch_bend: u16,
    },
    Program {
        channel: u8,
        program: u8,
    },
    Velocity {
        channel: u8,
        group: u8,
        velocity: u8,
    },
    NoteTouch {
        channel: u8,
        group: u8,
    },
    NoteShorthand {
        channel: u8,
        group: u8,
    },
    Wide {
        channel: u8,
        group: u8,
        value: u16,
    },
}

/// Calls recorded by a [`RecordingDriver`]
pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Take every recorded call, leaving the log empty
pub fn drain(log: &CallLog) -> Vec<Call> {
    std::mem::take(&mut *log.lock())
}

/// Driver recording calls into a shared log
pub struct RecordingDriver {
    log: CallLog,
    group_data: GroupData,
    versions: (u16, u16),
    needs_bank: bool,
    fail_open: bool,
    samples_per_tick: usize,
    samples_left: usize,
    timer: Option<TimerSignal>,
}

impl RecordingDriver {
    /// Driver with a pooled voice group
    pub fn pooled(count: u8) -> (Self, CallLog) {
        Self::with_group(
            POOL_MASK,
            GroupEntry {
                group: POOL_GROUP as u8,
                block: GroupBlock::Pooled { count, reserved: 0 },
            },
        )
    }

    /// Driver with a fixed-slot voice group
    pub fn fixed(tags: &[u8]) -> (Self, CallLog) {
        Self::with_group(
            FIXED_MASK,
            GroupEntry {
                group: FIXED_GROUP as u8,
                block: GroupBlock::Fixed(tags.to_vec()),
            },
        )
    }

    /// Driver declaring a single group entry
    pub fn with_group(mask: u32, entry: GroupEntry) -> (Self, CallLog) {
        let log = CallLog::default();
        let driver = RecordingDriver {
            log: Arc::clone(&log),
            group_data: GroupData {
                mask,
                entries: vec![entry],
            },
            versions: (SOUND_RES_VERSION, DRIVER_RES_VERSION),
            needs_bank: false,
            fail_open: false,
            samples_per_tick: 100,
            samples_left: 100,
            timer: None,
        };
        (driver, log)
    }

    /// Restrict the supported resource versions
    pub fn with_versions(mut self, min: u16, max: u16) -> Self {
        self.versions = (min, max);
        self
    }

    /// Require a patch bank on install
    pub fn requiring_bank(mut self) -> Self {
        self.needs_bank = true;
        self
    }

    /// Fail to open
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Raise the timer every `samples` rendered samples
    pub fn with_tick_length(mut self, samples: usize) -> Self {
        self.samples_per_tick = samples;
        self.samples_left = samples;
        self
    }

    fn record(&self, call: Call) {
        self.log.lock().push(call);
    }
}

impl SoundDriver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn version_range(&self) -> (u16, u16) {
        self.versions
    }

    fn open(&mut self) -> fm_sound_server::Result<()> {
        self.record(Call::Open);
        if self.fail_open {
            return Err(fm_sound_server::SoundError::Device("no such device".into()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.record(Call::Close);
    }

    fn group_data(&self) -> &GroupData {
        &self.group_data
    }

    fn requires_patch_bank(&self) -> bool {
        self.needs_bank
    }

    fn install_patch(&mut self, data: Vec<u8>) -> fm_sound_server::Result<()> {
        self.record(Call::InstallPatch(data.len()));
        Ok(())
    }

    fn set_master_volume(&mut self, volume: u8) -> u8 {
        self.record(Call::MasterVolume(volume));
        volume
    }

    fn start_note(&mut self, voice: u8, program: Option<u8>, note: u8, velocity: u8) {
        self.record(Call::StartNote {
            voice,
            program,
            note,
            velocity,
        });
    }

    fn release_voice(&mut self, voice: u8) {
        self.record(Call::ReleaseVoice(voice));
    }

    fn voice_controller(&mut self, voice: u8, command: u8, value: u8) {
        self.record(Call::VoiceController {
            voice,
            command,
            value,
        });
    }

    fn set_voice_pitch(&mut self, voice: u8, pitch_bend: u16) {
        self.record(Call::VoicePitch { voice, pitch_bend });
    }

    fn percussion_touch(&mut self, voice: u8, group: u8, value: u8) {
        self.record(Call::PercussionTouch {
            voice,
            group,
            value,
        });
    }

    fn channel_controller(&mut self, channel: u8, group: u8, command: u8, value: u8) {
        self.record(Call::ChannelController {
            channel,
            group,
            command,
            value,
        });
    }

    fn set_channel_pitch_bend(&mut self, channel: u8, pitch_bend: u16) {
        self.record(Call::ChannelPitch {
            channel,
            pitch_bend,
        });
    }

    fn set_program(&mut self, channel: u8, program: u8) {
        self.record(Call::Program { channel, program });
    }

    fn set_velocity(&mut self, channel: u8, group: u8, velocity: u8) {
        self.record(Call::Velocity {
            channel,
            group,
            velocity,
        });
    }

    fn note_touch(&mut self, channel: u8, group: u8) {
        self.record(Call::NoteTouch { channel, group });
    }

    fn note_shorthand(&mut self, channel: u8, group: u8) {
        self.record(Call::NoteShorthand { channel, group });
    }

    fn wide_command(&mut self, channel: u8, group: u8, value: u16) {
        self.record(Call::Wide {
            channel,
            group,
            value,
        });
    }

    fn read_buffer(&mut self, buffer: &mut [i16]) -> usize {
        buffer.fill(0);
        let mut remaining = buffer.len();
        while remaining > 0 {
            let step = remaining.min(self.samples_left);
            remaining -= step;
            self.samples_left -= step;
            if self.samples_left == 0 {
                self.samples_left = self.samples_per_tick;
                if let Some(timer) = &self.timer {
                    raise_timer(timer);
                }
            }
        }
        buffer.len()
    }

    fn set_update_callback(&mut self, signal: TimerSignal) {
        self.timer = Some(signal);
    }
}

/// Manager over `resources` with the given driver installed
pub fn manager_with(resources: MemoryResources, driver: RecordingDriver) -> SoundManager {
    let mut manager = SoundManager::new(resources, SoundConfig::default());
    let installed = manager
        .install_driver_instance(RECORDING_DRIVER_NUM, Box::new(driver))
        .expect("install recording driver");
    assert!(installed);
    manager
}

/// Event stream helper
pub fn events(list: &[TrackEvent]) -> Vec<u8> {
    fm_sound_server::sound::track::encode_events(list)
}

/// Start-note calls in a call list
pub fn started_notes(calls: &[Call]) -> Vec<u8> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::StartNote { note, .. } => Some(*note),
            _ => None,
        })
        .collect()
}

/// Run the server `ticks` times
pub fn tick(manager: &mut SoundManager, ticks: u32) {
    for _ in 0..ticks {
        manager.update().expect("server tick");
    }
}
