//! Per-tick track servicing
//!
//! Channel tracks decode events until they rest, terminate or hit a hold
//! point. Each channel is routed either to the fixed slot it owns, to the
//! pooled voices it owns, or nowhere (control track, fast-forward, or no
//! voice assigned). Channel state is updated in every case so that a later
//! voice assignment starts from the right parameters.

use std::sync::Arc;

use log::trace;

use super::track::{self, EventCursor, TrackEvent};
use super::{Sound, SoundHandle, MAX_LEVEL};
use crate::driver::InstalledDriver;
use crate::resource::TrackMode;
use crate::voice::{VoiceTable, VoiceType, VoiceTypeStruct};
use crate::Result;

/// Everything a sound needs from the manager while its tracks run
pub(crate) struct TrackContext<'a> {
    pub handle: SoundHandle,
    pub voices: &'a mut VoiceTable,
    pub drivers: &'a mut [InstalledDriver],
    pub fast_forward: bool,
    pub need_to_rethink: &'a mut bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Silent,
    Fixed { voice: u8, driver: usize },
    Pooled,
}

/// Owned pooled voice to play a new note on.
///
/// Prefers the oldest idle voice; otherwise steals the oldest sounding one.
fn find_voice(
    group: &VoiceTypeStruct,
    drivers: &mut [InstalledDriver],
    sound: SoundHandle,
    channel: u8,
) -> Option<usize> {
    let mut idle: Option<(usize, u32)> = None;
    let mut busy: Option<(usize, u32)> = None;

    for (idx, entry) in group.entries.iter().enumerate() {
        if !entry.is_owned_by(sound, channel) {
            continue;
        }
        let slot = if entry.note.is_none() { &mut idle } else { &mut busy };
        if slot.map_or(true, |(_, age)| entry.age >= age) {
            *slot = Some((idx, entry.age));
        }
    }

    if let Some((idx, _)) = idle {
        return Some(idx);
    }
    let (idx, _) = busy?;
    let entry = &group.entries[idx];
    if let Some(d) = drivers.get_mut(entry.driver) {
        d.driver.release_voice(entry.voice_num);
    }
    Some(idx)
}

impl Sound {
    /// Run every track for one tick.
    ///
    /// Returns `true` when the sound completed its last loop.
    pub(crate) fn service_tracks(&mut self, ctx: &mut TrackContext<'_>) -> Result<bool> {
        if self.empty {
            return Ok(false);
        }

        let mut all_stopped = true;
        for index in 0..self.tracks.len() {
            match self.tracks[index].chunk.mode {
                TrackMode::Channel => self.service_channel_track(index, ctx)?,
                TrackMode::Percussion => self.service_percussion_track(index, ctx),
            }
            if self.tracks[index].running {
                all_stopped = false;
            }
        }

        self.timer += 1;
        if !all_stopped {
            return Ok(false);
        }
        if self.loop_count > 0 {
            self.loop_count -= 1;
            if self.loop_count == 0 {
                return Ok(true);
            }
        }
        self.rewind_to_loop();
        Ok(false)
    }

    fn route(&self, channel: u8, ctx: &TrackContext<'_>) -> Route {
        let group_id = self.channels[channel as usize].voice_group as usize;
        match ctx.voices.group(group_id) {
            None => Route::Silent,
            Some(group) if group.voice_type == VoiceType::Pooled => Route::Pooled,
            Some(group) => group
                .entries
                .iter()
                .find(|e| e.is_owned_by(ctx.handle, channel))
                .map_or(Route::Silent, |e| Route::Fixed {
                    voice: e.voice_num,
                    driver: e.driver,
                }),
        }
    }

    fn service_channel_track(&mut self, index: usize, ctx: &mut TrackContext<'_>) -> Result<()> {
        {
            let track = &mut self.tracks[index];
            if track.rest > 0 {
                track.rest -= 1;
                return Ok(());
            }
            if !track.running {
                return Ok(());
            }
        }

        let chunk = Arc::clone(&self.tracks[index].chunk);
        let channel = chunk.channel;
        let ff = ctx.fast_forward;
        let route = match channel {
            Some(ch) if !ff => self.route(ch, ctx),
            _ => Route::Silent,
        };
        let group = channel.map_or(0, |ch| self.channels[ch as usize].voice_group as u8);
        let mut cursor = EventCursor::new(&chunk.data, self.tracks[index].index);

        loop {
            match cursor.next_event()? {
                TrackEvent::NoteTouch(note) => match (channel, route) {
                    (Some(ch), Route::Pooled) => self.update_damper(ch, note, ctx),
                    (Some(_), Route::Fixed { voice, driver }) => {
                        ctx.drivers[driver].driver.note_touch(voice, group)
                    }
                    _ => {}
                },
                TrackEvent::Note { note, velocity } => match (channel, route) {
                    (Some(ch), Route::Pooled) => {
                        if self.channels[ch as usize].is_percussion() {
                            self.trigger_percussion(ch, note, ctx);
                        } else {
                            self.start_pooled_note(ch, note, velocity, ctx);
                        }
                    }
                    (Some(_), Route::Fixed { voice, driver }) => {
                        ctx.drivers[driver].driver.note_shorthand(voice, group)
                    }
                    _ => {}
                },
                TrackEvent::Rest(ticks) => {
                    let track = &mut self.tracks[index];
                    track.rest = ticks.saturating_sub(1);
                    track.index = cursor.position();
                    return Ok(());
                }
                TrackEvent::Controller { command, value } => match channel {
                    None => {
                        if self.hold_reached(command, value) {
                            return Ok(());
                        }
                    }
                    Some(ch) => {
                        self.apply_channel_command(ch, command, value);
                        let value = if command == track::CTRL_VOLUME {
                            self.scaled_volume(value)
                        } else {
                            value
                        };
                        match route {
                            Route::Pooled => self.pooled_controller(ch, command, value, ctx),
                            Route::Fixed { voice, driver } => ctx.drivers[driver]
                                .driver
                                .channel_controller(voice, group, command, value),
                            Route::Silent => {}
                        }
                    }
                },
                TrackEvent::Wide(value) => {
                    if let Route::Fixed { voice, driver } = route {
                        ctx.drivers[driver].driver.wide_command(voice, group, value);
                    }
                }
                TrackEvent::PitchBend(pitch_bend) => {
                    if let Some(ch) = channel {
                        self.channels[ch as usize].pitch_bend = pitch_bend;
                        match route {
                            Route::Pooled => self.pooled_pitch(ch, pitch_bend, ctx),
                            Route::Fixed { voice, driver } => ctx.drivers[driver]
                                .driver
                                .set_channel_pitch_bend(voice, pitch_bend),
                            Route::Silent => {}
                        }
                    }
                }
                TrackEvent::Program(program) => match channel {
                    Some(ch) => {
                        self.channels[ch as usize].program = program;
                        if let Route::Fixed { voice, driver } = route {
                            ctx.drivers[driver].driver.set_program(voice, program);
                        }
                    }
                    None => self.set_track_pos(index, cursor.position(), program, ff),
                },
                TrackEvent::Velocity(velocity) => {
                    if let Route::Fixed { voice, driver } = route {
                        ctx.drivers[driver].driver.set_velocity(voice, group, velocity);
                    }
                }
                TrackEvent::End => {
                    let track = &mut self.tracks[index];
                    track.running = false;
                    track.index = cursor.position();
                    return Ok(());
                }
            }
        }
    }

    /// Fire a percussion track's note once on a pooled voice
    fn service_percussion_track(&mut self, index: usize, ctx: &mut TrackContext<'_>) {
        if ctx.fast_forward || !self.tracks[index].running {
            return;
        }
        self.tracks[index].running = false;

        let chunk = Arc::clone(&self.tracks[index].chunk);
        let Some(ch) = chunk.channel else {
            return;
        };
        let group_id = self.channels[ch as usize].voice_group as usize;
        let Some(group) = ctx.voices.group_mut(group_id) else {
            return;
        };
        if group.voice_type != VoiceType::Pooled {
            return;
        }

        if let Some(idx) = find_voice(group, ctx.drivers, ctx.handle, ch) {
            let entry = &mut group.entries[idx];
            entry.reset_note();
            entry.note = Some(chunk.percussion_note);
            if let Some(d) = ctx.drivers.get_mut(entry.driver) {
                d.driver
                    .start_note(entry.voice_num, None, chunk.percussion_note, MAX_LEVEL);
            }
        }
    }

    /// Rewind to the loop point when the control track reaches the hold value
    fn hold_reached(&mut self, command: u8, value: u8) -> bool {
        if command == track::CTRL_NO_HOLD || self.hold != Some(value) {
            return false;
        }
        self.rewind_to_loop();
        true
    }

    fn set_track_pos(&mut self, index: usize, position: usize, value: u8, fast_forward: bool) {
        self.tracks[index].index = position;
        if value == track::CUE_MARKER {
            if !fast_forward {
                self.cue_value = Some(value);
            }
        } else {
            self.save_loop_point();
        }
    }

    fn pooled_group<'c>(
        &self,
        channel: u8,
        voices: &'c mut VoiceTable,
    ) -> Option<&'c mut VoiceTypeStruct> {
        voices.group_mut(self.channels[channel as usize].voice_group as usize)
    }

    fn start_pooled_note(&mut self, channel: u8, note: u8, velocity: u8, ctx: &mut TrackContext<'_>) {
        let program = self.channels[channel as usize].program;
        let Some(group) = self.pooled_group(channel, ctx.voices) else {
            return;
        };
        if let Some(idx) = find_voice(group, ctx.drivers, ctx.handle, channel) {
            let entry = &mut group.entries[idx];
            entry.reset_note();
            entry.note = Some(note);
            trace!("voice {} note {} vel {}", entry.voice_num, note, velocity);
            if let Some(d) = ctx.drivers.get_mut(entry.driver) {
                d.driver
                    .start_note(entry.voice_num, Some(program), note, velocity);
            }
        }
    }

    /// Note on a percussion channel: play the matching percussion track's note
    fn trigger_percussion(&mut self, channel: u8, note: u8, ctx: &mut TrackContext<'_>) {
        let has_track = self.tracks.iter().any(|t| {
            t.chunk.mode == TrackMode::Percussion && t.chunk.percussion_note == note
        });
        if !has_track {
            return;
        }
        let group_id = self.channels[channel as usize].voice_group as u8;
        let Some(group) = self.pooled_group(channel, ctx.voices) else {
            return;
        };
        if let Some(idx) = find_voice(group, ctx.drivers, ctx.handle, channel) {
            let entry = &mut group.entries[idx];
            entry.reset_note();
            entry.note = Some(note);
            if let Some(d) = ctx.drivers.get_mut(entry.driver) {
                d.driver.start_note(entry.voice_num, None, note, MAX_LEVEL);
                d.driver.percussion_touch(entry.voice_num, group_id, 0);
            }
        }
    }

    /// Note-touch on a pooled channel: hold under the damper, else release
    fn update_damper(&mut self, channel: u8, note: u8, ctx: &mut TrackContext<'_>) {
        let damper = self.channels[channel as usize].damper != 0;
        let Some(group) = self.pooled_group(channel, ctx.voices) else {
            return;
        };
        let handle = ctx.handle;
        let Some(entry) = group
            .entries
            .iter_mut()
            .find(|e| e.note == Some(note) && e.is_owned_by(handle, channel))
        else {
            return;
        };

        if damper {
            entry.held = true;
        } else {
            entry.note = None;
            entry.held = false;
            if let Some(d) = ctx.drivers.get_mut(entry.driver) {
                d.driver.release_voice(entry.voice_num);
            }
        }
    }

    fn pooled_controller(&mut self, channel: u8, command: u8, value: u8, ctx: &mut TrackContext<'_>) {
        if command == track::CTRL_NUM_VOICES {
            *ctx.need_to_rethink = true;
            return;
        }
        let Some(group) = self.pooled_group(channel, ctx.voices) else {
            return;
        };
        let handle = ctx.handle;

        for entry in group
            .entries
            .iter_mut()
            .filter(|e| e.is_owned_by(handle, channel))
        {
            let Some(d) = ctx.drivers.get_mut(entry.driver) else {
                continue;
            };
            if command == track::CTRL_DAMPER {
                if value == 0 && entry.held {
                    entry.note = None;
                    entry.held = false;
                    d.driver.release_voice(entry.voice_num);
                }
            } else {
                d.driver.voice_controller(entry.voice_num, command, value);
            }
        }
    }

    fn pooled_pitch(&mut self, channel: u8, pitch_bend: u16, ctx: &mut TrackContext<'_>) {
        let Some(group) = self.pooled_group(channel, ctx.voices) else {
            return;
        };
        let handle = ctx.handle;
        for entry in group.entries.iter().filter(|e| e.is_owned_by(handle, channel)) {
            if let Some(d) = ctx.drivers.get_mut(entry.driver) {
                d.driver.set_voice_pitch(entry.voice_num, pitch_bend);
            }
        }
    }
}
