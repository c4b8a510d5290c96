//! Voice allocation
//!
//! A rethink runs in two phases. The propose phase walks the play list in
//! priority order and, for each sound, hands channels voices in order of
//! their sub-priority. Channels with sub-priority 0 must play: when one
//! cannot be satisfied every proposal made for its sound is rolled back.
//! The commit phase turns proposals into assignments, reusing the slots
//! owners already held so that an unchanged allocation costs no driver
//! traffic, and pushes full channel state to voices that changed hands.

use log::{debug, trace};

use super::SoundManager;
use crate::driver::InstalledDriver;
use crate::sound::track::{
    CTRL_ALL_NOTES_OFF, CTRL_DAMPER, CTRL_MODULATION, CTRL_PAN, CTRL_VOLUME,
};
use crate::sound::{Sound, SoundArena, SoundHandle};
use crate::voice::{Assignment, VoiceTable, VoiceType, VoiceTypeStruct};
use crate::SOUND_ARR_SIZE;

/// Priority band width of one play-list position
const POSITION_STRIDE: i32 = SOUND_ARR_SIZE as i32;

impl SoundManager {
    /// Recompute which sound channels own which voices
    pub fn rethink_voice_types(&mut self) {
        self.suspend_sound_server();
        self.voices.begin_pass();

        for (position, &handle) in self.play_list.iter().enumerate() {
            let Some(sound) = self.sounds.get(handle) else {
                continue;
            };
            if sound.is_muted() || sound.is_paused() {
                continue;
            }
            propose_sound(
                &mut self.voices,
                handle,
                sound,
                position as i32 * POSITION_STRIDE,
            );
        }

        commit(&mut self.voices, &self.sounds, &mut self.drivers);
        self.restart_sound_server();
    }
}

/// Allocation priority of a channel; 0 means the channel must play
fn channel_priority(sub_priority: u8, offset: i32) -> i32 {
    if sub_priority == 0 {
        0
    } else {
        POSITION_STRIDE - sub_priority as i32 + offset
    }
}

fn propose_sound(voices: &mut VoiceTable, handle: SoundHandle, sound: &Sound, offset: i32) {
    let snapshot = voices.snapshot();
    let mut worked = [false; SOUND_ARR_SIZE];

    loop {
        let mut next: Option<(usize, i32)> = None;
        for (channel, state) in sound.channels.iter().enumerate() {
            if !state.is_used() || worked[channel] {
                continue;
            }
            let priority = channel_priority(state.sub_priority, offset);
            if next.map_or(true, |(_, best)| priority < best) {
                next = Some((channel, priority));
            }
        }
        let Some((channel, priority)) = next else {
            break;
        };
        worked[channel] = true;

        let state = &sound.channels[channel];
        let owner = Assignment {
            sound: handle,
            channel: channel as u8,
            priority,
        };
        let must = priority == 0;

        let granted = match voices.group_mut(state.voice_group as usize) {
            None => false,
            // Placeholders only reserve the slots tagged with their channels
            Some(group)
                if sound.is_empty()
                    && group.voice_type == VoiceType::Fixed
                    && !group.has_voice_num(owner.channel) =>
            {
                continue;
            }
            Some(group) => match group.voice_type {
                VoiceType::Pooled => {
                    let count = state.num_voices as usize;
                    group.claim_pool(owner, count)
                        || (must && group.evict_pool(count) && group.claim_pool(owner, count))
                }
                VoiceType::Fixed if state.is_pinned_mode() => group.claim_pinned(owner),
                VoiceType::Fixed => {
                    group.claim_free_fixed(owner) || (must && group.evict_fixed(owner))
                }
            },
        };

        if !granted {
            if must {
                debug!(
                    "sound {:?} channel {} cannot play; dropping its proposals",
                    handle, channel
                );
                voices.restore(&snapshot);
                return;
            }
            trace!("sound {:?} channel {} skipped", handle, channel);
        }
    }
}

fn commit(voices: &mut VoiceTable, sounds: &SoundArena, drivers: &mut [InstalledDriver]) {
    for (group_id, group) in voices.groups_mut() {
        match group.voice_type {
            VoiceType::Fixed => commit_fixed(group, group_id as u8, sounds, drivers),
            VoiceType::Pooled => commit_pooled(group, sounds, drivers),
        }
    }
}

fn commit_fixed(
    group: &mut VoiceTypeStruct,
    group_id: u8,
    sounds: &SoundArena,
    drivers: &mut [InstalledDriver],
) {
    let entries = &mut group.entries;
    let mut changed = Vec::new();

    for (idx, entry) in entries.iter_mut().enumerate() {
        if entry.proposed_pinned {
            entry.current = entry.proposed.take();
            entry.pinned = true;
            entry.proposed_pinned = false;
            if !same_owner(entry.current, entry.previous) {
                changed.push(idx);
            }
        }
    }

    // Owners keep the slot they held before the pass
    for idx in 0..entries.len() {
        let Some(owner) = entries[idx].proposed else {
            continue;
        };
        let kept = entries.iter().position(|e| {
            e.usable && e.current.is_none() && e.previous.map_or(false, |p| p.same_owner(&owner))
        });
        if let Some(slot) = kept {
            entries[idx].proposed = None;
            entries[slot].current = Some(owner);
        }
    }

    for idx in 0..entries.len() {
        let Some(owner) = entries[idx].proposed.take() else {
            continue;
        };
        let slot = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.usable && e.current.is_none())
            .max_by_key(|(_, e)| e.voice_num)
            .map(|(slot, _)| slot);
        match slot {
            Some(slot) => {
                entries[slot].current = Some(owner);
                changed.push(slot);
            }
            None => debug!("no fixed slot left for channel {}", owner.channel),
        }
    }

    for entry in entries.iter() {
        if entry.current.is_none() && entry.previous.is_some() {
            if let Some(d) = drivers.get_mut(entry.driver) {
                d.driver
                    .channel_controller(entry.voice_num, group_id, CTRL_ALL_NOTES_OFF, 0);
            }
        }
    }

    for idx in changed {
        let entry = &entries[idx];
        let Some(owner) = entry.current else {
            continue;
        };
        let (Some(sound), Some(d)) = (sounds.get(owner.sound), drivers.get_mut(entry.driver))
        else {
            continue;
        };
        let state = &sound.channels[owner.channel as usize];
        let voice = entry.voice_num;
        let driver = &mut d.driver;
        driver.channel_controller(voice, group_id, CTRL_ALL_NOTES_OFF, 0);
        driver.channel_controller(voice, group_id, CTRL_MODULATION, state.modulation);
        driver.channel_controller(
            voice,
            group_id,
            CTRL_VOLUME,
            sound.scaled_volume(state.volume),
        );
        driver.channel_controller(voice, group_id, CTRL_PAN, state.pan);
        driver.channel_controller(voice, group_id, CTRL_DAMPER, state.damper);
        driver.set_program(voice, state.program);
        driver.set_channel_pitch_bend(voice, state.pitch_bend);
    }
}

fn commit_pooled(group: &mut VoiceTypeStruct, sounds: &SoundArena, drivers: &mut [InstalledDriver]) {
    let entries = &mut group.entries;

    // Voices that stay with their owner keep their note state
    for idx in 0..entries.len() {
        let Some(owner) = entries[idx].proposed else {
            continue;
        };
        let kept = entries
            .iter()
            .position(|e| e.current.is_none() && e.previous.map_or(false, |p| p.same_owner(&owner)));
        if let Some(slot) = kept {
            entries[idx].proposed = None;
            entries[slot].current = Some(owner);
        }
    }

    let mut changed = Vec::new();
    for idx in 0..entries.len() {
        let Some(owner) = entries[idx].proposed.take() else {
            continue;
        };
        if let Some(slot) = entries.iter().position(|e| e.current.is_none()) {
            entries[slot].current = Some(owner);
            changed.push(slot);
        }
    }

    for entry in entries.iter_mut() {
        if entry.current.is_none() && entry.previous.is_some() {
            entry.reset_note();
            if let Some(d) = drivers.get_mut(entry.driver) {
                d.driver.release_voice(entry.voice_num);
            }
        }
    }

    for idx in changed {
        let entry = &mut entries[idx];
        entry.reset_note();
        let Some(owner) = entry.current else {
            continue;
        };
        let (Some(sound), Some(d)) = (sounds.get(owner.sound), drivers.get_mut(entry.driver))
        else {
            continue;
        };
        let state = &sound.channels[owner.channel as usize];
        let voice = entry.voice_num;
        let driver = &mut d.driver;
        driver.release_voice(voice);
        driver.voice_controller(voice, CTRL_MODULATION, state.modulation);
        driver.voice_controller(voice, CTRL_VOLUME, sound.scaled_volume(state.volume));
        driver.voice_controller(voice, CTRL_PAN, state.pan);
        driver.set_voice_pitch(voice, state.pitch_bend);
    }
}

fn same_owner(a: Option<Assignment>, b: Option<Assignment>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.same_owner(&b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_channels_sort_first() {
        assert_eq!(channel_priority(0, 32), 0);
        assert_eq!(channel_priority(1, 0), 15);
        assert_eq!(channel_priority(15, 16), 17);
        assert!(channel_priority(15, 0) < channel_priority(1, 0));
    }

    #[test]
    fn test_later_play_list_positions_rank_lower() {
        assert!(channel_priority(1, 0) < channel_priority(15, POSITION_STRIDE));
    }
}
