//! Voice allocation across the play list

mod common;

use common::*;
use fm_sound_server::sound::TrackEvent;
use fm_sound_server::{MemoryResources, SoundResourceBuilder, TrackSpec};

fn long_rest() -> Vec<u8> {
    events(&[TrackEvent::Rest(1000), TrackEvent::End])
}

fn pooled_sound(id: u32, priority: u16, channels: &[(u8, u8, u8)]) -> SoundResourceBuilder {
    let tracks = channels
        .iter()
        .map(|&(channel, voices, sub_priority)| {
            TrackSpec::channel(channel, POOL_GROUP, long_rest())
                .with_voices(voices)
                .with_sub_priority(sub_priority)
        })
        .collect();
    SoundResourceBuilder::new(id).priority(priority).group(POOL_MASK, tracks)
}

fn fixed_sound(id: u32, priority: u16, tracks: Vec<TrackSpec>) -> SoundResourceBuilder {
    SoundResourceBuilder::new(id).priority(priority).group(FIXED_MASK, tracks)
}

fn pool_free(manager: &fm_sound_server::SoundManager) -> usize {
    manager
        .voices()
        .group(POOL_GROUP as usize)
        .map(|g| g.num_voices)
        .unwrap_or(0)
}

#[test]
fn test_rethink_twice_makes_no_driver_calls() {
    let mut resources = MemoryResources::new();
    pooled_sound(1, 10, &[(0, 2, 0), (1, 1, 3)]).install(&mut resources);
    pooled_sound(2, 20, &[(0, 1, 0)]).install(&mut resources);

    let (driver, log) = RecordingDriver::pooled(4);
    let mut manager = manager_with(resources, driver);
    let a = manager.create_sound();
    let b = manager.create_sound();
    manager.play(a, 1).unwrap();
    manager.play(b, 2).unwrap();
    assert!(!drain(&log).is_empty());

    let before = manager.voices().clone();
    manager.rethink_voice_types();

    assert!(drain(&log).is_empty());
    assert_eq!(manager.voices().voices_of(a), before.voices_of(a));
    assert_eq!(manager.voices().voices_of(b), before.voices_of(b));
}

#[test]
fn test_new_owner_receives_channel_state() {
    let mut resources = MemoryResources::new();
    SoundResourceBuilder::new(1)
        .group(
            POOL_MASK,
            vec![TrackSpec::channel(0, POOL_GROUP, long_rest()).with_volume(100)],
        )
        .install(&mut resources);

    let (driver, log) = RecordingDriver::pooled(1);
    let mut manager = manager_with(resources, driver);
    drain(&log);

    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();

    assert_eq!(
        drain(&log),
        vec![
            Call::ReleaseVoice(0),
            Call::VoiceController { voice: 0, command: 1, value: 0 },
            Call::VoiceController { voice: 0, command: 7, value: 100 },
            Call::VoiceController { voice: 0, command: 10, value: 64 },
            Call::VoicePitch { voice: 0, pitch_bend: 0x2000 },
        ]
    );
}

#[test]
fn test_pool_is_conserved() {
    let mut resources = MemoryResources::new();
    pooled_sound(1, 10, &[(0, 3, 0)]).install(&mut resources);
    pooled_sound(2, 20, &[(0, 2, 0)]).install(&mut resources);

    let (driver, _log) = RecordingDriver::pooled(4);
    let mut manager = manager_with(resources, driver);
    let a = manager.create_sound();
    let b = manager.create_sound();
    manager.play(a, 1).unwrap();
    manager.play(b, 2).unwrap();

    // b's must channel cannot fit and cannot evict another must channel
    assert_eq!(manager.voices().voices_of(a), 3);
    assert_eq!(manager.voices().voices_of(b), 0);
    assert_eq!(pool_free(&manager) + 3, 4);

    manager.stop(a).unwrap();
    assert_eq!(manager.voices().voices_of(a), 0);
    assert_eq!(manager.voices().voices_of(b), 2);
    assert_eq!(pool_free(&manager) + 2, 4);
}

#[test]
fn test_must_channel_preempts_optional_channel() {
    let mut resources = MemoryResources::new();
    // channel 0 must play, channel 1 is optional
    pooled_sound(1, 10, &[(0, 1, 0), (1, 3, 5)]).install(&mut resources);
    pooled_sound(2, 20, &[(0, 2, 0)]).install(&mut resources);

    let (driver, _log) = RecordingDriver::pooled(4);
    let mut manager = manager_with(resources, driver);
    let a = manager.create_sound();
    manager.play(a, 1).unwrap();
    assert_eq!(manager.voices().voices_of(a), 4);

    let b = manager.create_sound();
    manager.play(b, 2).unwrap();
    assert_eq!(manager.voices().voices_of(a), 1);
    assert_eq!(manager.voices().voices_of(b), 2);

    manager.stop(b).unwrap();
    assert_eq!(manager.voices().voices_of(a), 4);
}

#[test]
fn test_optional_channel_is_skipped_when_pool_is_full() {
    let mut resources = MemoryResources::new();
    pooled_sound(1, 10, &[(0, 4, 0)]).install(&mut resources);
    pooled_sound(2, 20, &[(0, 1, 4)]).install(&mut resources);

    let (driver, _log) = RecordingDriver::pooled(4);
    let mut manager = manager_with(resources, driver);
    let a = manager.create_sound();
    let b = manager.create_sound();
    manager.play(a, 1).unwrap();
    manager.play(b, 2).unwrap();

    assert_eq!(manager.voices().voices_of(a), 4);
    assert_eq!(manager.voices().voices_of(b), 0);
    assert!(manager.is_playing(b));
}

#[test]
fn test_muted_and_paused_sounds_hold_no_voices() {
    let mut resources = MemoryResources::new();
    pooled_sound(1, 10, &[(0, 2, 0)]).install(&mut resources);

    let (driver, log) = RecordingDriver::pooled(4);
    let mut manager = manager_with(resources, driver);
    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();
    drain(&log);

    manager.mute(sound, true).unwrap();
    assert_eq!(manager.voices().voices_of(sound), 0);
    let released: Vec<_> = drain(&log)
        .into_iter()
        .filter(|c| matches!(c, Call::ReleaseVoice(_)))
        .collect();
    assert_eq!(released.len(), 2);

    manager.mute(sound, false).unwrap();
    assert_eq!(manager.voices().voices_of(sound), 2);

    manager.pause(sound, true).unwrap();
    manager.pause(sound, true).unwrap();
    manager.pause(sound, false).unwrap();
    assert_eq!(manager.voices().voices_of(sound), 0);
    manager.pause(sound, false).unwrap();
    assert_eq!(manager.voices().voices_of(sound), 2);
}

#[test]
fn test_fixed_slots_take_highest_free_voice() {
    let mut resources = MemoryResources::new();
    SoundResourceBuilder::new(1)
        .group(
            FIXED_MASK,
            vec![TrackSpec::channel(0, FIXED_GROUP, long_rest()).with_program(12)],
        )
        .install(&mut resources);

    let (driver, log) = RecordingDriver::fixed(&[0, 1, 2, 0x83]);
    let mut manager = manager_with(resources, driver);
    drain(&log);

    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();

    let calls = drain(&log);
    assert_eq!(
        calls.first(),
        Some(&Call::ChannelController { channel: 2, group: 2, command: 123, value: 0 })
    );
    assert!(calls.contains(&Call::Program { channel: 2, program: 12 }));
    assert!(calls.contains(&Call::ChannelPitch { channel: 2, pitch_bend: 0x2000 }));

    manager.stop(sound).unwrap();
    assert_eq!(
        drain(&log),
        vec![Call::ChannelController { channel: 2, group: 2, command: 123, value: 0 }]
    );
}

#[test]
fn test_pinned_channel_uses_its_reserved_slot() {
    let mut resources = MemoryResources::new();
    SoundResourceBuilder::new(1)
        .group(
            FIXED_MASK,
            vec![TrackSpec::channel(3, FIXED_GROUP, long_rest())
                .with_flags(fm_sound_server::sound::CHANNEL_MODE_PINNED)],
        )
        .install(&mut resources);

    let (driver, log) = RecordingDriver::fixed(&[0, 1, 2, 0x83]);
    let mut manager = manager_with(resources, driver);
    drain(&log);

    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();

    let group = manager.voices().group(FIXED_GROUP as usize).unwrap();
    let slot = group
        .entries
        .iter()
        .find(|e| e.current.is_some())
        .unwrap();
    assert_eq!(slot.voice_num, 3);
    assert!(slot.pinned);
    assert!(drain(&log).contains(&Call::Program { channel: 3, program: 0 }));
}

#[test]
fn test_fixed_rethink_twice_makes_no_driver_calls() {
    let mut resources = MemoryResources::new();
    fixed_sound(
        1,
        10,
        vec![
            TrackSpec::channel(5, FIXED_GROUP, long_rest()),
            TrackSpec::channel(6, FIXED_GROUP, long_rest()).with_sub_priority(3),
        ],
    )
    .install(&mut resources);
    fixed_sound(
        2,
        20,
        vec![TrackSpec::channel(1, FIXED_GROUP, long_rest())
            .with_flags(fm_sound_server::sound::CHANNEL_MODE_PINNED)],
    )
    .install(&mut resources);

    let (driver, log) = RecordingDriver::fixed(&[0, 1, 2]);
    let mut manager = manager_with(resources, driver);
    let a = manager.create_sound();
    let b = manager.create_sound();
    manager.play(a, 1).unwrap();
    manager.play(b, 2).unwrap();
    assert!(!drain(&log).is_empty());
    assert_eq!(manager.voices().voices_of(a), 2);
    assert_eq!(manager.voices().voices_of(b), 1);

    manager.rethink_voice_types();

    assert!(drain(&log).is_empty());
    assert_eq!(manager.voices().voices_of(a), 2);
    assert_eq!(manager.voices().voices_of(b), 1);
}

#[test]
fn test_must_channel_evicts_optional_fixed_slot() {
    let mut resources = MemoryResources::new();
    fixed_sound(
        1,
        10,
        vec![
            TrackSpec::channel(0, FIXED_GROUP, long_rest()).with_sub_priority(3),
            TrackSpec::channel(1, FIXED_GROUP, long_rest()).with_sub_priority(4),
        ],
    )
    .install(&mut resources);
    fixed_sound(2, 20, vec![TrackSpec::channel(0, FIXED_GROUP, long_rest())])
        .install(&mut resources);

    let (driver, log) = RecordingDriver::fixed(&[0, 1]);
    let mut manager = manager_with(resources, driver);
    let a = manager.create_sound();
    manager.play(a, 1).unwrap();
    assert_eq!(manager.voices().voices_of(a), 2);

    let b = manager.create_sound();
    manager.play(b, 2).unwrap();
    assert_eq!(manager.voices().voices_of(a), 1);
    assert_eq!(manager.voices().voices_of(b), 1);
    drain(&log);

    manager.rethink_voice_types();

    assert!(drain(&log).is_empty());
    assert_eq!(manager.voices().voices_of(a), 1);
    assert_eq!(manager.voices().voices_of(b), 1);
}
