//! Driver installation, rollback and rendering

mod common;

use common::*;
use fm_sound_server::driver::{AdlibPatch, GroupBlock, GroupEntry, OperatorPatch, ADLIB_DRIVER_NUM};
use fm_sound_server::sound::TrackEvent;
use fm_sound_server::{
    MemoryResources, PatchBank, ResourceKind, SoundConfig, SoundError, SoundManager,
    SoundResourceBuilder, TrackSpec,
};

#[test]
fn test_driver_version_mismatch_is_an_error() {
    let (driver, log) = RecordingDriver::pooled(4);
    let driver = driver.with_versions(0x100, 0x101);
    let mut manager = SoundManager::new(MemoryResources::new(), SoundConfig::default());

    let result = manager.install_driver_instance(RECORDING_DRIVER_NUM, Box::new(driver));
    assert!(matches!(result, Err(SoundError::ResourceVersion(_))));
    assert!(!manager.is_installed(RECORDING_DRIVER_NUM));
    assert!(drain(&log).is_empty());
    assert!(manager.is_server_active());
}

#[test]
fn test_missing_patch_bank_rolls_back_install() {
    let (driver, log) = RecordingDriver::pooled(4);
    let mut manager = SoundManager::new(MemoryResources::new(), SoundConfig::default());

    let installed = manager
        .install_driver_instance(RECORDING_DRIVER_NUM, Box::new(driver.requiring_bank()))
        .unwrap();

    assert!(!installed);
    assert!(!manager.is_installed(RECORDING_DRIVER_NUM));
    assert!(manager.voices().is_empty());
    assert_eq!(manager.groups_available(), 0);
    assert!(manager.is_server_active());
    let calls = drain(&log);
    assert_eq!(calls.first(), Some(&Call::Open));
    assert_eq!(calls.last(), Some(&Call::Close));
}

#[test]
fn test_patch_bank_is_handed_to_driver() {
    let mut resources = MemoryResources::new();
    resources.insert(ResourceKind::Bank, RECORDING_DRIVER_NUM, 0, vec![0; 64]);
    let (driver, log) = RecordingDriver::pooled(4);
    let mut manager = SoundManager::new(resources, SoundConfig::default());

    assert!(manager
        .install_driver_instance(RECORDING_DRIVER_NUM, Box::new(driver.requiring_bank()))
        .unwrap());
    assert!(drain(&log).contains(&Call::InstallPatch(64)));
}

#[test]
fn test_failed_open_is_not_installed() {
    let (driver, _log) = RecordingDriver::pooled(4);
    let mut manager = SoundManager::new(MemoryResources::new(), SoundConfig::default());
    let installed = manager
        .install_driver_instance(RECORDING_DRIVER_NUM, Box::new(driver.failing_open()))
        .unwrap();
    assert!(!installed);
    assert!(manager.installed_drivers().is_empty());
}

#[test]
fn test_unknown_driver_number_is_skipped() {
    let mut manager = SoundManager::new(MemoryResources::new(), SoundConfig::default());
    assert!(!manager.install_driver(42).unwrap());
}

#[test]
fn test_conflicting_group_types_are_rejected() {
    let (pooled, _) = RecordingDriver::pooled(4);
    let (fixed, fixed_log) = RecordingDriver::with_group(
        FIXED_MASK,
        GroupEntry {
            group: POOL_GROUP as u8,
            block: GroupBlock::Fixed(vec![0, 1]),
        },
    );
    let mut manager = SoundManager::new(MemoryResources::new(), SoundConfig::default());
    assert!(manager.install_driver_instance(1, Box::new(pooled)).unwrap());

    let result = manager.install_driver_instance(2, Box::new(fixed));
    assert!(matches!(result, Err(SoundError::Device(_))));
    assert_eq!(manager.installed_drivers(), vec![1]);
    assert_eq!(drain(&fixed_log).last(), Some(&Call::Close));
    assert_eq!(
        manager.voices().group(POOL_GROUP as usize).map(|g| g.total),
        Some(4)
    );
    assert!(manager.is_server_active());
}

#[test]
fn test_uninstall_reorients_playing_sounds() {
    let rest = events(&[TrackEvent::Rest(1000), TrackEvent::End]);
    let mut resources = MemoryResources::new();
    SoundResourceBuilder::new(1)
        .group(POOL_MASK, vec![TrackSpec::channel(0, POOL_GROUP, rest.clone())])
        .group(FIXED_MASK, vec![TrackSpec::channel(0, FIXED_GROUP, rest)])
        .install(&mut resources);

    let (pooled, pooled_log) = RecordingDriver::pooled(2);
    let (fixed, fixed_log) = RecordingDriver::fixed(&[0, 1]);
    let mut manager = manager_with(resources, pooled);
    assert!(manager.install_driver_instance(8, Box::new(fixed)).unwrap());

    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();
    assert_eq!(manager.sound(sound).unwrap().group(), POOL_MASK);
    tick(&mut manager, 7);
    drain(&fixed_log);

    manager.uninstall_driver(RECORDING_DRIVER_NUM).unwrap();

    assert!(drain(&pooled_log).contains(&Call::Close));
    assert_eq!(manager.installed_drivers(), vec![8]);
    assert!(manager.is_playing(sound));
    assert_eq!(manager.sound(sound).unwrap().group(), FIXED_MASK);
    assert_eq!(manager.time_index(sound).unwrap(), 7);
    assert_eq!(manager.voices().voices_of(sound), 1);
    assert!(drain(&fixed_log).contains(&Call::Program { channel: 1, program: 0 }));
}

#[test]
fn test_render_services_timer_ticks() {
    let mut resources = MemoryResources::new();
    SoundResourceBuilder::new(1)
        .group(
            POOL_MASK,
            vec![TrackSpec::channel(
                0,
                POOL_GROUP,
                events(&[TrackEvent::Rest(1000), TrackEvent::End]),
            )],
        )
        .install(&mut resources);

    let (driver, _log) = RecordingDriver::pooled(2);
    let config = SoundConfig {
        sample_rate: 5000,
        ..SoundConfig::default()
    };
    let mut manager = SoundManager::new(resources, config);
    assert!(manager
        .install_driver_instance(RECORDING_DRIVER_NUM, Box::new(driver.with_tick_length(100)))
        .unwrap());
    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();

    let mut buffer = vec![0i16; 1000];
    manager.render(&mut buffer).unwrap();
    assert_eq!(manager.time_index(sound).unwrap(), 10);
}

#[test]
fn test_events_delay_divides_server_rate() {
    let mut resources = MemoryResources::new();
    SoundResourceBuilder::new(1)
        .group(
            POOL_MASK,
            vec![TrackSpec::channel(
                0,
                POOL_GROUP,
                events(&[TrackEvent::Rest(1000), TrackEvent::End]),
            )],
        )
        .install(&mut resources);

    let (driver, _log) = RecordingDriver::pooled(2);
    let config = SoundConfig {
        events_delay: 2,
        ..SoundConfig::default()
    };
    let mut manager = SoundManager::new(resources, config);
    assert!(manager
        .install_driver_instance(RECORDING_DRIVER_NUM, Box::new(driver))
        .unwrap());
    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();

    tick(&mut manager, 9);
    assert_eq!(manager.time_index(sound).unwrap(), 3);
}

#[test]
fn test_adlib_driver_renders_a_note() {
    let op = OperatorPatch {
        multiplier: 1,
        sustain: true,
        attack: 15,
        sustain_level: 0,
        release: 8,
        ..Default::default()
    };
    let patch = AdlibPatch {
        note_lo: 0,
        note_hi: 127,
        modulator: OperatorPatch { total_level: 63, ..op },
        carrier: op,
        ..Default::default()
    };
    let bank = PatchBank::encode(&[vec![patch]]);

    let mut resources = MemoryResources::new();
    resources.insert(ResourceKind::Bank, ADLIB_DRIVER_NUM, 0, bank);
    SoundResourceBuilder::new(1)
        .group(
            9,
            vec![TrackSpec::channel(
                0,
                1,
                events(&[
                    TrackEvent::Note { note: 60, velocity: 120 },
                    TrackEvent::Rest(100),
                    TrackEvent::End,
                ]),
            )],
        )
        .install(&mut resources);

    let mut manager = SoundManager::new(resources, SoundConfig::default());
    manager.install_config_drivers().unwrap();
    assert!(manager.is_installed(ADLIB_DRIVER_NUM));

    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();

    let mut buffer = vec![0i16; 44_100 / 5];
    manager.render(&mut buffer).unwrap();
    assert!(manager.time_index(sound).unwrap() >= 9);
    assert!(buffer.iter().any(|&s| s != 0));
}
