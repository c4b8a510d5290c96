use super::*;
use crate::driver::{raise_timer, GroupBlock, GroupEntry};
use crate::resource::{MemoryResources, SoundResourceBuilder, TrackSpec};
use crate::sound::track::encode_events;
use crate::sound::TrackEvent;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Pooled driver remembering the last master volume it was given
struct VolumeSpy {
    group_data: GroupData,
    master: Arc<AtomicU8>,
}

impl VolumeSpy {
    fn new() -> (Self, Arc<AtomicU8>) {
        let master = Arc::new(AtomicU8::new(0));
        let spy = VolumeSpy {
            group_data: GroupData {
                mask: 1,
                entries: vec![GroupEntry {
                    group: 1,
                    block: GroupBlock::Pooled {
                        count: 2,
                        reserved: 0,
                    },
                }],
            },
            master: Arc::clone(&master),
        };
        (spy, master)
    }
}

impl SoundDriver for VolumeSpy {
    fn name(&self) -> &str {
        "spy"
    }

    fn version_range(&self) -> (u16, u16) {
        (SOUND_RES_VERSION, DRIVER_RES_VERSION)
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn group_data(&self) -> &GroupData {
        &self.group_data
    }

    fn set_master_volume(&mut self, volume: u8) -> u8 {
        self.master.swap(volume, Ordering::Relaxed)
    }
}

fn manager() -> SoundManager {
    SoundManager::new(MemoryResources::new(), SoundConfig::default())
}

#[test]
fn test_guards_restore_counts() {
    let mut manager = manager();
    assert!(manager.is_server_active());
    {
        let mut guard = manager.suspend();
        assert!(!guard.is_server_active());
        let inner = guard.disable();
        assert!(!inner.is_server_active());
    }
    assert!(manager.is_server_active());
}

#[test]
fn test_enable_never_underflows() {
    let mut manager = manager();
    manager.enable_sound_server();
    manager.restart_sound_server();
    assert!(manager.is_server_active());
    manager.disable_sound_server();
    assert!(!manager.is_server_active());
}

#[test]
fn test_driver_list_lists_adlib() {
    let mut manager = manager();
    let list = manager.driver_list().to_vec();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].driver_num, ADLIB_DRIVER_NUM);
    assert_eq!(list[0].status, DriverStatus::Skipped);

    let detected = manager.build_driver_list(true).to_vec();
    assert_eq!(detected[0].status, DriverStatus::Detected);

    manager.dump_driver_list();
    assert_eq!(manager.driver_list()[0].status, DriverStatus::Skipped);
}

#[test]
fn test_master_volume_reaches_drivers() {
    let (spy, master) = VolumeSpy::new();
    let mut manager = manager();
    assert!(manager.install_driver_instance(5, Box::new(spy)).unwrap());
    assert_eq!(master.load(Ordering::Relaxed), 127);

    manager.set_master_vol(200);
    assert_eq!(manager.master_vol(), 127);

    manager.set_master_vol(40);
    assert_eq!(master.load(Ordering::Relaxed), 40);
}

#[test]
fn test_sync_sounds_halves_music_volume() {
    let (spy, master) = VolumeSpy::new();
    let mut manager = manager();
    manager.install_driver_instance(5, Box::new(spy)).unwrap();

    let config = SoundConfig {
        music_volume: 100,
        ..SoundConfig::default()
    };
    manager.sync_sounds(&config);
    assert_eq!(master.load(Ordering::Relaxed), 50);

    let muted = SoundConfig {
        music_mute: true,
        ..config
    };
    manager.sync_sounds(&muted);
    assert_eq!(manager.master_vol(), 0);
}

#[test]
fn test_factory_is_used_for_install() {
    let mut manager = manager().with_driver_factory(|num, _| {
        (num == 5).then(|| Box::new(VolumeSpy::new().0) as Box<dyn SoundDriver>)
    });
    assert!(manager.install_driver(5).unwrap());
    assert!(manager.install_driver(5).unwrap());
    assert_eq!(manager.installed_drivers(), vec![5]);
    assert_eq!(manager.groups_available(), 1);
    assert!(!manager.install_driver(ADLIB_DRIVER_NUM).unwrap());
}

#[test]
fn test_determine_group_follows_installed_mask() {
    let (header, _) = SoundResourceBuilder::new(1)
        .group(4, vec![])
        .group(1, vec![])
        .build();
    let mut manager = manager();
    assert_eq!(manager.determine_group(&header).unwrap(), 0);

    manager
        .install_driver_instance(5, Box::new(VolumeSpy::new().0))
        .unwrap();
    assert_eq!(manager.determine_group(&header).unwrap(), 1);
    assert!(manager.check_res_version(&header).is_ok());
}

#[test]
fn test_voice_count_controller_requests_rethink() {
    let mut resources = MemoryResources::new();
    SoundResourceBuilder::new(1)
        .group(
            1,
            vec![TrackSpec::channel(
                0,
                1,
                encode_events(&[
                    TrackEvent::Controller {
                        command: 75,
                        value: 2,
                    },
                    TrackEvent::Rest(50),
                    TrackEvent::End,
                ]),
            )],
        )
        .install(&mut resources);

    let mut manager = SoundManager::new(resources, SoundConfig::default());
    manager
        .install_driver_instance(5, Box::new(VolumeSpy::new().0))
        .unwrap();
    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();
    assert_eq!(manager.voices().voices_of(sound), 1);

    manager.update().unwrap();
    assert!(manager.need_to_rethink());

    manager.update().unwrap();
    assert!(!manager.need_to_rethink());
    assert_eq!(manager.voices().voices_of(sound), 2);
}

#[test]
fn test_failed_update_keeps_remaining_periods() {
    let mut resources = MemoryResources::new();
    // Note-on with its data byte missing
    SoundResourceBuilder::new(1)
        .group(1, vec![TrackSpec::channel(0, 1, vec![0x80])])
        .install(&mut resources);

    let mut manager = SoundManager::new(resources, SoundConfig::default());
    manager
        .install_driver_instance(5, Box::new(VolumeSpy::new().0))
        .unwrap();
    let sound = manager.create_sound();
    manager.play(sound, 1).unwrap();

    let timer = manager.timer_signal();
    for _ in 0..3 {
        raise_timer(&timer);
    }
    assert!(matches!(
        manager.service_timer(),
        Err(SoundError::ResourceFormat(_))
    ));
    assert_eq!(timer.load(Ordering::Acquire), 2);
}

#[test]
fn test_drop_stops_sounds() {
    let mut manager = manager();
    let sound = manager.create_sound();
    manager.prime_empty(sound).unwrap();
    manager.go(sound).unwrap();
    assert_eq!(manager.sound_list(), &[sound]);
    drop(manager);
}
