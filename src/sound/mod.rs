//! Sounds and their track state
//!
//! A [`Sound`] is one playable music or effect resource. Priming loads its
//! track chunks for the voice group arrangement the installed drivers can
//! play; the manager then services every track once per server tick.
//!
//! # Lifecycle
//! - created empty in the manager's [`SoundArena`]
//! - primed: tracks loaded, joins the sound list
//! - playing: on the priority-ordered play list
//! - stopped / unprimed: leaves both lists, tracks freed

mod arena;
mod service;
pub mod track;

use std::sync::Arc;

use crate::resource::{
    self, ResourceKind, ResourceSource, TrackChunk, TrackMode, SOUND_RES_VERSION,
    TRACK_EVENTS_OFFSET,
};
use crate::{Result, SoundError, SOUND_ARR_SIZE};

pub use arena::{SoundArena, SoundHandle};
pub(crate) use service::TrackContext;
pub use track::{EventCursor, TrackEvent};

/// Channel flag: channel has no track in the loaded arrangement
pub const CHANNEL_UNUSED: u16 = 0x8000;
/// Channel flag: notes trigger percussion tracks
pub const CHANNEL_PERCUSSION: u16 = 0x10;
/// Channel flag mask selecting the fixed-slot allocation mode
pub const CHANNEL_MODE_MASK: u16 = 3;
/// Allocation mode binding a channel to the slot tagged with its number
pub const CHANNEL_MODE_PINNED: u16 = 1;

/// Highest volume, priority, fade destination and hold value
pub const MAX_LEVEL: u8 = 127;
/// Centre position of the pitch wheel
pub const PITCH_BEND_CENTRE: u16 = 0x2000;

/// Per-channel parameters of a sound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    /// Program (instrument) number
    pub program: u8,
    /// Modulation wheel
    pub modulation: u8,
    /// Channel volume before sound volume scaling
    pub volume: u8,
    /// Pan position
    pub pan: u8,
    /// Damper pedal value
    pub damper: u8,
    /// Pitch bend, centre 0x2000
    pub pitch_bend: u16,
    /// Voice group the channel draws voices from
    pub voice_group: u16,
    /// Voices the channel requires
    pub num_voices: u8,
    /// Allocation sub-priority, 0 for channels that must play
    pub sub_priority: u8,
    /// Channel flags
    pub flags: u16,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            program: 0,
            modulation: 0,
            volume: 0,
            pan: 0,
            damper: 0,
            pitch_bend: PITCH_BEND_CENTRE,
            voice_group: 0,
            num_voices: 0,
            sub_priority: 0,
            flags: CHANNEL_UNUSED,
        }
    }
}

impl ChannelState {
    /// True when the loaded arrangement drives this channel
    pub fn is_used(&self) -> bool {
        self.flags & CHANNEL_UNUSED == 0
    }

    /// True when the channel needs a slot tagged with its own number
    pub fn is_pinned_mode(&self) -> bool {
        self.flags & CHANNEL_MODE_MASK == CHANNEL_MODE_PINNED
    }

    /// True when notes on the channel trigger percussion tracks
    pub fn is_percussion(&self) -> bool {
        self.flags & CHANNEL_PERCUSSION != 0
    }
}

/// Decoder state of one track
#[derive(Debug, Clone)]
pub struct TrackState {
    pub(crate) chunk: Arc<TrackChunk>,
    pub(crate) voice_group: u16,
    pub(crate) running: bool,
    pub(crate) index: usize,
    pub(crate) rest: u32,
    pub(crate) loop_running: bool,
    pub(crate) loop_index: usize,
    pub(crate) loop_rest: u32,
}

impl TrackState {
    fn new(chunk: Arc<TrackChunk>, voice_group: u16) -> Self {
        let mut track = TrackState {
            chunk,
            voice_group,
            running: true,
            index: 0,
            rest: 0,
            loop_running: true,
            loop_index: 0,
            loop_rest: 0,
        };
        track.reset();
        track
    }

    fn reset(&mut self) {
        let start = match self.chunk.mode {
            TrackMode::Channel => TRACK_EVENTS_OFFSET,
            TrackMode::Percussion => 0,
        };
        self.running = true;
        self.index = start;
        self.rest = 0;
        self.loop_running = true;
        self.loop_index = start;
        self.loop_rest = 0;
    }

    fn save_loop_point(&mut self) {
        self.loop_running = self.running;
        self.loop_index = self.index;
        self.loop_rest = self.rest;
    }

    fn restore_loop_point(&mut self) {
        self.running = self.loop_running;
        self.index = self.loop_index;
        self.rest = self.loop_rest;
    }

    /// Loaded chunk
    pub fn chunk(&self) -> &TrackChunk {
        &self.chunk
    }

    /// Voice group assigned by the group table
    pub fn voice_group(&self) -> u16 {
        self.voice_group
    }

    /// False once the terminator was reached
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Byte offset of the next event
    pub fn index(&self) -> usize {
        self.index
    }

    /// Remaining rest ticks
    pub fn rest(&self) -> u32 {
        self.rest
    }
}

/// Silent control track standing in for the data of an empty sound
fn placeholder_chunk() -> TrackChunk {
    let mut data = vec![0u8; TRACK_EVENTS_OFFSET];
    data[1] = 0xFF;
    data.extend_from_slice(&[0xFF, 0x80]);
    TrackChunk {
        mode: TrackMode::Channel,
        channel: None,
        voices: 0,
        sub_priority: 0,
        flags: 0,
        program: 0,
        volume: 0,
        pan: 0,
        percussion_note: 0,
        data,
    }
}

/// Armed volume fade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fade {
    /// Target volume
    pub dest: u8,
    /// Ticks between steps
    pub ticks: u8,
    /// Largest volume change per step
    pub steps: u8,
    /// Ticks left until the next step
    pub counter: u8,
    /// Stop the sound once the target is reached
    pub stop_after: bool,
}

impl Fade {
    /// Advance one server tick; returns the new volume when a step is due
    pub fn tick(&mut self, volume: u8) -> Option<u8> {
        self.counter = self.counter.saturating_sub(1);
        if self.counter != 0 {
            return None;
        }
        self.counter = self.ticks;

        let next = if volume > self.dest {
            volume.saturating_sub(self.steps).max(self.dest)
        } else {
            volume.saturating_add(self.steps).min(self.dest)
        };
        Some(next)
    }
}

/// A playable sound
#[derive(Debug, Clone)]
pub struct Sound {
    pub(crate) res_id: Option<u32>,
    pub(crate) group: u32,
    pub(crate) res_priority: u8,
    pub(crate) fixed_priority: Option<u8>,
    pub(crate) res_loop: u16,
    pub(crate) fixed_loop: Option<u16>,
    pub(crate) priority: u8,
    pub(crate) loop_count: u16,
    pub(crate) volume: u8,
    pub(crate) paused: u32,
    pub(crate) muted: u32,
    pub(crate) hold: Option<u8>,
    pub(crate) cue_value: Option<u8>,
    pub(crate) fade: Option<Fade>,
    pub(crate) timer: u32,
    pub(crate) loop_timer: u32,
    pub(crate) primed: bool,
    pub(crate) empty: bool,
    pub(crate) stopped_asynchronously: bool,
    pub(crate) channels: [ChannelState; SOUND_ARR_SIZE],
    pub(crate) tracks: Vec<TrackState>,
}

impl Default for Sound {
    fn default() -> Self {
        Self::new()
    }
}

impl Sound {
    /// Create an unprimed sound at full volume
    pub fn new() -> Self {
        Sound {
            res_id: None,
            group: 0,
            res_priority: 0,
            fixed_priority: None,
            res_loop: 1,
            fixed_loop: None,
            priority: 0,
            loop_count: 0,
            volume: MAX_LEVEL,
            paused: 0,
            muted: 0,
            hold: None,
            cue_value: None,
            fade: None,
            timer: 0,
            loop_timer: 0,
            primed: false,
            empty: false,
            stopped_asynchronously: false,
            channels: [ChannelState::default(); SOUND_ARR_SIZE],
            tracks: Vec::new(),
        }
    }

    /// Resource id, `None` for an empty placeholder sound
    pub fn res_id(&self) -> Option<u32> {
        self.res_id
    }

    /// Voice group arrangement chosen at prime time
    pub fn group(&self) -> u32 {
        self.group
    }

    /// Effective priority
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Remaining loop count, 0 loops forever
    pub fn loop_count(&self) -> u16 {
        self.loop_count
    }

    /// Sound volume
    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Tracks loaded
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Placeholder without resource data
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Pause count is non-zero
    pub fn is_paused(&self) -> bool {
        self.paused != 0
    }

    /// Mute count is non-zero
    pub fn is_muted(&self) -> bool {
        self.muted != 0
    }

    /// Pending cue raised by the control track
    pub fn cue_value(&self) -> Option<u8> {
        self.cue_value
    }

    /// Ticks played since the start (or loop point)
    pub fn time_index(&self) -> u32 {
        self.timer
    }

    /// Armed fade, if any
    pub fn fade(&self) -> Option<&Fade> {
        self.fade.as_ref()
    }

    /// Finished on its own and awaits `dispatch`
    pub fn is_stopped_asynchronously(&self) -> bool {
        self.stopped_asynchronously
    }

    /// Channel parameters
    pub fn channel(&self, channel: usize) -> Option<&ChannelState> {
        self.channels.get(channel)
    }

    /// Loaded tracks
    pub fn tracks(&self) -> &[TrackState] {
        &self.tracks
    }

    pub(crate) fn scaled_volume(&self, value: u8) -> u8 {
        (self.volume as u32 * value as u32 / MAX_LEVEL as u32) as u8
    }

    /// Load the resource and reset playback state.
    ///
    /// With `dont_queue` set (re-orientation after a driver change) the
    /// user-facing state survives: priority, loop, pause, mute, hold, cue
    /// and fade. On error the sound is left unprimed.
    pub(crate) fn load(
        &mut self,
        resources: &dyn ResourceSource,
        res_id: Option<u32>,
        groups_available: u32,
        dont_queue: bool,
    ) -> Result<()> {
        self.unload();

        match res_id {
            Some(id) => {
                let data = resources
                    .get_resource(ResourceKind::Sound, id, 0)
                    .ok_or_else(|| SoundError::ResourceNotFound(format!("sound {}", id)))?;
                let header = resource::parse_header(&data)?;
                resource::check_version(&header, SOUND_RES_VERSION)?;
                let entries = resource::parse_group_table(&data)?;
                let group = resource::determine_group(&entries, groups_available);
                let info = resource::extract_track_info(&entries, group)?;

                let mut tracks = Vec::with_capacity(info.tracks.len());
                for track in &info.tracks {
                    let chunk = resources
                        .get_resource(ResourceKind::Sound, id, track.chunk as u32)
                        .ok_or_else(|| {
                            SoundError::ResourceNotFound(format!(
                                "sound {} track chunk {}",
                                id, track.chunk
                            ))
                        })?;
                    let chunk = resource::parse_track_chunk(chunk)?;
                    tracks.push(TrackState::new(Arc::new(chunk), track.voice_group));
                }

                self.res_id = Some(id);
                self.empty = false;
                self.group = group;
                self.res_priority = header.priority.min(MAX_LEVEL as u16) as u8;
                self.res_loop = header.loop_count;
                self.tracks = tracks;
            }
            None => {
                self.res_id = None;
                self.empty = true;
                self.group = 0;
                self.res_priority = 0;
                self.res_loop = 0;
                self.tracks = vec![TrackState::new(Arc::new(placeholder_chunk()), 0)];
            }
        }

        self.prime_sound(dont_queue);
        self.primed = true;
        Ok(())
    }

    /// Free the tracks
    pub(crate) fn unload(&mut self) {
        if self.primed {
            self.tracks.clear();
            self.primed = false;
            self.stopped_asynchronously = false;
        }
    }

    fn prime_sound(&mut self, dont_queue: bool) {
        if !dont_queue {
            self.priority = self.fixed_priority.unwrap_or(self.res_priority);
            self.loop_count = self.fixed_loop.unwrap_or(self.res_loop);
            self.paused = 0;
            self.muted = 0;
            self.hold = None;
            self.cue_value = None;
            self.fade = None;
        }
        self.timer = 0;
        self.loop_timer = 0;
        self.prime_channel_data();
    }

    pub(crate) fn prime_channel_data(&mut self) {
        if self.empty {
            for channel in self.channels.iter_mut() {
                *channel = ChannelState {
                    volume: MAX_LEVEL,
                    pan: 64,
                    flags: CHANNEL_MODE_PINNED,
                    ..ChannelState::default()
                };
            }
        } else {
            for channel in self.channels.iter_mut() {
                channel.flags = CHANNEL_UNUSED;
            }
            for track in &self.tracks {
                let chunk = &track.chunk;
                if let Some(ch) = chunk.channel {
                    self.channels[ch as usize] = ChannelState {
                        program: chunk.program,
                        modulation: 0,
                        volume: chunk.volume,
                        pan: chunk.pan,
                        damper: 0,
                        pitch_bend: PITCH_BEND_CENTRE,
                        voice_group: track.voice_group,
                        num_voices: chunk.voices,
                        sub_priority: chunk.sub_priority,
                        flags: chunk.flags,
                    };
                }
            }
        }

        for track in self.tracks.iter_mut() {
            track.reset();
        }
    }

    pub(crate) fn rewind_to_loop(&mut self) {
        for track in self.tracks.iter_mut() {
            track.restore_loop_point();
        }
        self.timer = self.loop_timer;
    }

    pub(crate) fn save_loop_point(&mut self) {
        for track in self.tracks.iter_mut() {
            track.save_loop_point();
        }
        self.loop_timer = self.timer;
    }

    /// Apply a controller to the channel's stored parameters
    pub(crate) fn apply_channel_command(&mut self, channel: u8, command: u8, value: u8) {
        let state = &mut self.channels[channel as usize];
        match command {
            track::CTRL_MODULATION => state.modulation = value,
            track::CTRL_VOLUME => state.volume = value,
            track::CTRL_PAN => state.pan = value,
            track::CTRL_DAMPER => state.damper = value,
            track::CTRL_NUM_VOICES => state.num_voices = value,
            _ => {}
        }
    }
}
