//! Sound Manager
//!
//! Owns every sound, the priority-ordered play list, the installed drivers
//! and the voice group tables built from them. All methods run on the logic
//! thread; drivers only communicate back through the shared [`TimerSignal`].
//!
//! # Server gating
//! The sound server runs only while both the disable and suspend counts are
//! zero. Operations that restructure the play list or voice tables hold a
//! suspend count for their duration; driver installation holds a disable
//! count. [`SuspendGuard`] and [`DisableGuard`] keep the counts balanced for
//! callers.

mod rethink;
mod server;

use std::ops::{Deref, DerefMut};

use log::{debug, warn};

use crate::config::SoundConfig;
use crate::driver::{
    instantiate_driver, timer_signal, DriverInfo, DriverStatus, GroupData, InstalledDriver,
    SoundDriver, TimerSignal, ADLIB_DRIVER_NUM,
};
use crate::resource::{self, ResourceKind, ResourceSource, DRIVER_RES_VERSION, SOUND_RES_VERSION};
use crate::sound::track::CTRL_VOLUME;
use crate::sound::{Fade, Sound, SoundArena, SoundHandle, MAX_LEVEL};
use crate::voice::{VoiceTable, VoiceType};
use crate::{Result, SoundError};

/// Creates a driver for a driver number and output sample rate
pub type DriverFactory = Box<dyn FnMut(u32, u32) -> Option<Box<dyn SoundDriver>> + Send>;

/// Coordinates sounds, drivers and voice allocation
pub struct SoundManager {
    resources: Box<dyn ResourceSource>,
    config: SoundConfig,
    factory: DriverFactory,
    sounds: SoundArena,
    sound_list: Vec<SoundHandle>,
    play_list: Vec<SoundHandle>,
    drivers: Vec<InstalledDriver>,
    voices: VoiceTable,
    groups_available: u32,
    available_drivers: Vec<DriverInfo>,
    drivers_detected: bool,
    master_volume: u8,
    server_disabled: u32,
    server_suspended: u32,
    need_to_rethink: bool,
    fast_forward: bool,
    update_ticks: u32,
    timer: TimerSignal,
}

impl std::fmt::Debug for SoundManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundManager")
            .field("sounds", &self.sounds.len())
            .field("play_list", &self.play_list)
            .field("drivers", &self.drivers)
            .field("master_volume", &self.master_volume)
            .field("server_disabled", &self.server_disabled)
            .field("server_suspended", &self.server_suspended)
            .field("need_to_rethink", &self.need_to_rethink)
            .finish()
    }
}

/// Holds the sound server suspended until dropped
pub struct SuspendGuard<'a> {
    manager: &'a mut SoundManager,
}

impl Deref for SuspendGuard<'_> {
    type Target = SoundManager;

    fn deref(&self) -> &SoundManager {
        self.manager
    }
}

impl DerefMut for SuspendGuard<'_> {
    fn deref_mut(&mut self) -> &mut SoundManager {
        self.manager
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.manager.restart_sound_server();
    }
}

/// Holds the sound server disabled until dropped
pub struct DisableGuard<'a> {
    manager: &'a mut SoundManager,
}

impl Deref for DisableGuard<'_> {
    type Target = SoundManager;

    fn deref(&self) -> &SoundManager {
        self.manager
    }
}

impl DerefMut for DisableGuard<'_> {
    fn deref_mut(&mut self) -> &mut SoundManager {
        self.manager
    }
}

impl Drop for DisableGuard<'_> {
    fn drop(&mut self) {
        self.manager.enable_sound_server();
    }
}

impl SoundManager {
    /// Create a manager reading resources from `resources`
    pub fn new<R: ResourceSource + 'static>(resources: R, config: SoundConfig) -> Self {
        let master_volume = config.master_volume.min(MAX_LEVEL);
        SoundManager {
            resources: Box::new(resources),
            config,
            factory: Box::new(instantiate_driver),
            sounds: SoundArena::new(),
            sound_list: Vec::new(),
            play_list: Vec::new(),
            drivers: Vec::new(),
            voices: VoiceTable::new(),
            groups_available: 0,
            available_drivers: Vec::new(),
            drivers_detected: false,
            master_volume,
            server_disabled: 0,
            server_suspended: 0,
            need_to_rethink: false,
            fast_forward: false,
            update_ticks: 0,
            timer: timer_signal(),
        }
    }

    /// Replace the function used by `install_driver` to create drivers
    pub fn with_driver_factory<F>(mut self, factory: F) -> Self
    where
        F: FnMut(u32, u32) -> Option<Box<dyn SoundDriver>> + Send + 'static,
    {
        self.factory = Box::new(factory);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &SoundConfig {
        &self.config
    }

    /// Timer signal shared with the installed drivers
    pub fn timer_signal(&self) -> TimerSignal {
        self.timer.clone()
    }

    // ----- driver registry -------------------------------------------------

    /// Build the list of drivers this build can install
    pub fn build_driver_list(&mut self, detect: bool) -> &[DriverInfo] {
        self.available_drivers.clear();
        self.available_drivers.push(DriverInfo {
            driver_num: ADLIB_DRIVER_NUM,
            status: if detect {
                DriverStatus::Detected
            } else {
                DriverStatus::Skipped
            },
            footprint: 15000,
            short_description: "Adlib or SoundBlaster".to_string(),
            long_description: "3812fm".to_string(),
        });
        self.drivers_detected = true;
        &self.available_drivers
    }

    /// Available drivers, building the list without detection when needed
    pub fn driver_list(&mut self) -> &[DriverInfo] {
        if !self.drivers_detected {
            self.build_driver_list(false);
        }
        &self.available_drivers
    }

    /// Forget the available-driver list
    pub fn dump_driver_list(&mut self) {
        self.available_drivers.clear();
        self.drivers_detected = false;
    }

    /// Install every driver named by the configuration
    pub fn install_config_drivers(&mut self) -> Result<()> {
        for num in self.config.drivers.clone() {
            self.install_driver(num)?;
        }
        Ok(())
    }

    /// Instantiate and install a driver by number.
    ///
    /// Returns `Ok(false)` when the driver cannot be created, opened or
    /// given its patch bank; the manager is left as it was.
    pub fn install_driver(&mut self, driver_num: u32) -> Result<bool> {
        if self.is_installed(driver_num) {
            return Ok(true);
        }
        let sample_rate = self.config.sample_rate;
        match (self.factory)(driver_num, sample_rate) {
            Some(driver) => self.install_driver_instance(driver_num, driver),
            None => {
                warn!("no driver available for driver number {}", driver_num);
                Ok(false)
            }
        }
    }

    /// Install an already constructed driver under a driver number
    pub fn install_driver_instance(
        &mut self,
        driver_num: u32,
        driver: Box<dyn SoundDriver>,
    ) -> Result<bool> {
        if self.is_installed(driver_num) {
            return Ok(true);
        }
        let (min, max) = driver.version_range();
        if !(min..=max).contains(&DRIVER_RES_VERSION) {
            return Err(SoundError::ResourceVersion(format!(
                "driver {} supports versions {:#x}..={:#x}, resources are {:#x}",
                driver.name(),
                min,
                max,
                DRIVER_RES_VERSION
            )));
        }

        self.disable_sound_server();
        self.mute_play_list(true);

        let result = self.attach_driver(driver_num, driver);
        if let Ok(true) = result {
            debug!("installed driver {}", driver_num);
            if let Err(e) = self.orient_all() {
                warn!("re-orienting sounds after driver install failed: {}", e);
            }
        }

        self.mute_play_list(false);
        self.enable_sound_server();
        result
    }

    fn attach_driver(&mut self, driver_num: u32, mut driver: Box<dyn SoundDriver>) -> Result<bool> {
        if let Err(e) = driver.open() {
            warn!("driver {} failed to open: {}", driver.name(), e);
            return Ok(false);
        }
        driver.set_update_callback(self.timer.clone());
        self.drivers.push(InstalledDriver {
            num: driver_num,
            driver,
        });

        if let Err(e) = self.rebuild_voice_table() {
            self.detach_last();
            return Err(e);
        }

        let index = self.drivers.len() - 1;
        let master_volume = self.master_volume;
        let installed = &mut self.drivers[index];
        installed.driver.set_master_volume(master_volume);

        if installed.driver.requires_patch_bank() {
            let bank = self.resources.get_resource(ResourceKind::Bank, driver_num, 0);
            let outcome = match bank {
                Some(bank) => self.drivers[index].driver.install_patch(bank),
                None => Err(SoundError::ResourceNotFound(format!(
                    "patch bank for driver {}",
                    driver_num
                ))),
            };
            if let Err(e) = outcome {
                warn!("unloading driver {}: {}", driver_num, e);
                self.detach_last();
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn detach_last(&mut self) {
        if let Some(mut installed) = self.drivers.pop() {
            installed.driver.close();
        }
        // Removing a driver cannot introduce a voice type conflict
        if let Err(e) = self.rebuild_voice_table() {
            warn!("voice table rebuild failed: {}", e);
        }
    }

    /// Close and remove an installed driver
    pub fn uninstall_driver(&mut self, driver_num: u32) -> Result<()> {
        let Some(index) = self.drivers.iter().position(|d| d.num == driver_num) else {
            return Ok(());
        };

        self.disable_sound_server();
        self.mute_play_list(true);

        let mut installed = self.drivers.remove(index);
        installed.driver.close();
        let result = self.rebuild_voice_table().and_then(|_| self.orient_all());
        debug!("uninstalled driver {}", driver_num);

        self.mute_play_list(false);
        self.enable_sound_server();
        result
    }

    /// True when a driver with this number is installed
    pub fn is_installed(&self, driver_num: u32) -> bool {
        self.drivers.iter().any(|d| d.num == driver_num)
    }

    /// Installed driver numbers in install order
    pub fn installed_drivers(&self) -> Vec<u32> {
        self.drivers.iter().map(|d| d.num).collect()
    }

    /// Union of the installed drivers' capability masks
    pub fn groups_available(&self) -> u32 {
        self.groups_available
    }

    /// Current voice group tables
    pub fn voices(&self) -> &VoiceTable {
        &self.voices
    }

    fn rebuild_voice_table(&mut self) -> Result<()> {
        let tables: Vec<&GroupData> = self.drivers.iter().map(|d| d.driver.group_data()).collect();
        self.groups_available = tables.iter().fold(0, |mask, g| mask | g.mask);
        self.voices = VoiceTable::build(&tables)?;
        Ok(())
    }

    fn mute_play_list(&mut self, flag: bool) {
        for handle in self.play_list.clone() {
            // Handles on the play list are always live
            let _ = self.mute(handle, flag);
        }
    }

    fn orient_all(&mut self) -> Result<()> {
        for handle in self.sound_list.clone() {
            self.orient_after_driver_change(handle)?;
        }
        Ok(())
    }

    // ----- global state ----------------------------------------------------

    /// Set the master volume on every driver (clamped to 127)
    pub fn set_master_vol(&mut self, volume: u8) {
        let volume = volume.min(MAX_LEVEL);
        if volume != self.master_volume {
            self.master_volume = volume;
            for installed in &mut self.drivers {
                installed.driver.set_master_volume(volume);
            }
        }
    }

    /// Master volume
    pub fn master_vol(&self) -> u8 {
        self.master_volume
    }

    /// Apply the configured music volume as master volume
    pub fn sync_sounds(&mut self, config: &SoundConfig) {
        self.config = config.clone();
        let volume = config.effective_music_volume() / 2;
        debug!(
            "volume music={} sfx={}",
            config.effective_music_volume(),
            config.effective_sfx_volume()
        );
        self.set_master_vol(volume.min(MAX_LEVEL as u16) as u8);
    }

    /// Increment the disable count
    pub fn disable_sound_server(&mut self) {
        self.server_disabled += 1;
    }

    /// Decrement the disable count
    pub fn enable_sound_server(&mut self) {
        self.server_disabled = self.server_disabled.saturating_sub(1);
    }

    /// Increment the suspend count
    pub fn suspend_sound_server(&mut self) {
        self.server_suspended += 1;
    }

    /// Decrement the suspend count
    pub fn restart_sound_server(&mut self) {
        self.server_suspended = self.server_suspended.saturating_sub(1);
    }

    /// Suspend the server for the lifetime of the guard
    pub fn suspend(&mut self) -> SuspendGuard<'_> {
        self.suspend_sound_server();
        SuspendGuard { manager: self }
    }

    /// Disable the server for the lifetime of the guard
    pub fn disable(&mut self) -> DisableGuard<'_> {
        self.disable_sound_server();
        DisableGuard { manager: self }
    }

    /// True when the server would run on the next tick
    pub fn is_server_active(&self) -> bool {
        self.server_disabled == 0 && self.server_suspended == 0
    }

    /// A voice rethink is pending
    pub fn need_to_rethink(&self) -> bool {
        self.need_to_rethink
    }

    // ----- resource helpers ------------------------------------------------

    /// Group arrangement a sound resource would use with the installed drivers
    pub fn determine_group(&self, data: &[u8]) -> Result<u32> {
        let entries = resource::parse_group_table(data)?;
        Ok(resource::determine_group(&entries, self.groups_available))
    }

    /// Fail when a sound resource does not support this engine's version
    pub fn check_res_version(&self, data: &[u8]) -> Result<()> {
        let header = resource::parse_header(data)?;
        resource::check_version(&header, SOUND_RES_VERSION)
    }

    // ----- lists -----------------------------------------------------------

    /// Primed sounds
    pub fn sound_list(&self) -> &[SoundHandle] {
        &self.sound_list
    }

    /// Playing sounds in priority order
    pub fn play_list(&self) -> &[SoundHandle] {
        &self.play_list
    }

    fn insert_into_play_list(&mut self, handle: SoundHandle) {
        let priority = self.sounds.get(handle).map_or(0, |s| s.priority);
        let sounds = &self.sounds;
        let position = self
            .play_list
            .iter()
            .position(|&h| sounds.get(h).map_or(false, |s| s.priority >= priority))
            .unwrap_or(self.play_list.len());
        self.play_list.insert(position, handle);
    }

    fn take_from_play_list(&mut self, handle: SoundHandle) -> bool {
        match self.play_list.iter().position(|&h| h == handle) {
            Some(position) => {
                self.play_list.remove(position);
                true
            }
            None => false,
        }
    }

    /// Insert a sound into the play list by priority and rethink voices
    pub fn add_to_play_list(&mut self, handle: SoundHandle) -> Result<()> {
        self.sound(handle)?;
        self.suspend_sound_server();
        if !self.is_on_play_list(handle) {
            self.insert_into_play_list(handle);
        }
        if let Some(sound) = self.sounds.get_mut(handle) {
            sound.stopped_asynchronously = false;
        }
        self.rethink_voice_types();
        self.restart_sound_server();
        Ok(())
    }

    /// Remove a sound from the play list, rethinking voices when it was there
    pub fn remove_from_play_list(&mut self, handle: SoundHandle) {
        self.suspend_sound_server();
        if self.take_from_play_list(handle) {
            self.rethink_voice_types();
        }
        self.restart_sound_server();
    }

    /// True when the sound is on the play list
    pub fn is_on_play_list(&self, handle: SoundHandle) -> bool {
        self.play_list.contains(&handle)
    }

    /// Remove from the play list on the server's behalf; stopped on `dispatch`
    fn finish_asynchronously(&mut self, handle: SoundHandle) {
        self.take_from_play_list(handle);
        if let Some(sound) = self.sounds.get_mut(handle) {
            sound.stopped_asynchronously = true;
        }
        self.need_to_rethink = true;
    }

    /// Push a sound's scaled channel volumes to the voices it owns
    pub fn update_sound_vol(&mut self, handle: SoundHandle) {
        self.suspend_sound_server();
        self.push_sound_volume(handle);
        self.restart_sound_server();
    }

    fn push_sound_volume(&mut self, handle: SoundHandle) {
        let Some(sound) = self.sounds.get(handle) else {
            return;
        };
        for (group_id, group) in self.voices.groups() {
            for entry in &group.entries {
                let Some(owner) = entry.current.filter(|a| a.sound == handle) else {
                    continue;
                };
                let Some(installed) = self.drivers.get_mut(entry.driver) else {
                    continue;
                };
                let volume = sound.scaled_volume(sound.channels[owner.channel as usize].volume);
                match group.voice_type {
                    VoiceType::Fixed => installed.driver.channel_controller(
                        entry.voice_num,
                        group_id as u8,
                        CTRL_VOLUME,
                        volume,
                    ),
                    VoiceType::Pooled => installed.driver.voice_controller(
                        entry.voice_num,
                        CTRL_VOLUME,
                        volume,
                    ),
                }
            }
        }
    }

    /// Re-resolve priority; reorders the play list when it changed
    pub fn update_sound_pri(&mut self, handle: SoundHandle) {
        self.suspend_sound_server();
        if let Some(sound) = self.sounds.get_mut(handle) {
            let priority = sound.fixed_priority.unwrap_or(sound.res_priority);
            if priority != sound.priority {
                sound.priority = priority;
                if self.take_from_play_list(handle) {
                    self.insert_into_play_list(handle);
                    self.rethink_voice_types();
                }
            }
        }
        self.restart_sound_server();
    }

    /// Re-resolve the loop count
    pub fn update_sound_loop(&mut self, handle: SoundHandle) {
        if let Some(sound) = self.sounds.get_mut(handle) {
            sound.loop_count = sound.fixed_loop.unwrap_or(sound.res_loop);
        }
    }

    // ----- sound arena -----------------------------------------------------

    /// Create an unprimed sound
    pub fn create_sound(&mut self) -> SoundHandle {
        self.sounds.insert(Sound::new())
    }

    /// Stop and free a sound
    pub fn destroy_sound(&mut self, handle: SoundHandle) -> Result<()> {
        self.stop(handle)?;
        self.sounds.remove(handle);
        Ok(())
    }

    /// Borrow a sound
    pub fn sound(&self, handle: SoundHandle) -> Result<&Sound> {
        self.sounds
            .get(handle)
            .ok_or(SoundError::InvalidHandle)
    }

    fn sound_mut(&mut self, handle: SoundHandle) -> Result<&mut Sound> {
        self.sounds
            .get_mut(handle)
            .ok_or(SoundError::InvalidHandle)
    }

    // ----- per-sound operations --------------------------------------------

    /// Prime a resource and start playing it
    pub fn play(&mut self, handle: SoundHandle, res_id: u32) -> Result<()> {
        self.prime(handle, res_id)?;
        self.add_to_play_list(handle)
    }

    /// Load a resource without playing it, stopping any previous content
    pub fn prime(&mut self, handle: SoundHandle, res_id: u32) -> Result<()> {
        self.prime_with(handle, Some(res_id))
    }

    /// Prime a silent placeholder sound
    pub fn prime_empty(&mut self, handle: SoundHandle) -> Result<()> {
        self.prime_with(handle, None)
    }

    fn prime_with(&mut self, handle: SoundHandle, res_id: Option<u32>) -> Result<()> {
        self.stop(handle)?;
        let groups = self.groups_available;
        let sound = self
            .sounds
            .get_mut(handle)
            .ok_or(SoundError::InvalidHandle)?;
        sound.load(self.resources.as_ref(), res_id, groups, false)?;
        if !self.sound_list.contains(&handle) {
            self.sound_list.push(handle);
        }
        Ok(())
    }

    /// Stop playback and free the tracks
    pub fn unprime(&mut self, handle: SoundHandle) -> Result<()> {
        self.stop(handle)
    }

    /// Leave the play list and free the tracks
    pub fn stop(&mut self, handle: SoundHandle) -> Result<()> {
        self.sound(handle)?;
        self.remove_from_play_list(handle);
        let sound = self.sound_mut(handle)?;
        if sound.primed {
            sound.unload();
            self.sound_list.retain(|&h| h != handle);
        }
        Ok(())
    }

    /// Start a primed sound
    pub fn go(&mut self, handle: SoundHandle) -> Result<()> {
        if !self.sound(handle)?.primed {
            return Err(SoundError::NotPrimed);
        }
        self.add_to_play_list(handle)
    }

    /// Take a sound off the play list, keeping its tracks
    pub fn halt(&mut self, handle: SoundHandle) {
        self.remove_from_play_list(handle);
    }

    /// True when the sound is on the play list
    pub fn is_playing(&self, handle: SoundHandle) -> bool {
        self.is_on_play_list(handle)
    }

    /// True when the sound's tracks are loaded
    pub fn is_primed(&self, handle: SoundHandle) -> bool {
        self.sounds.get(handle).map_or(false, |s| s.primed)
    }

    /// Nested pause; paused sounds neither advance nor hold voices
    pub fn pause(&mut self, handle: SoundHandle, flag: bool) -> Result<()> {
        self.suspend_sound_server();
        let result = self.sound_mut(handle).map(|sound| {
            if flag {
                sound.paused += 1;
            } else {
                sound.paused = sound.paused.saturating_sub(1);
            }
        });
        if result.is_ok() {
            self.rethink_voice_types();
        }
        self.restart_sound_server();
        result
    }

    /// Nested mute; muted sounds advance but hold no voices
    pub fn mute(&mut self, handle: SoundHandle, flag: bool) -> Result<()> {
        self.suspend_sound_server();
        let result = self.sound_mut(handle).map(|sound| {
            if flag {
                sound.muted += 1;
            } else {
                sound.muted = sound.muted.saturating_sub(1);
            }
        });
        if result.is_ok() {
            self.rethink_voice_types();
        }
        self.restart_sound_server();
        result
    }

    /// Arm a volume fade
    pub fn fade(
        &mut self,
        handle: SoundHandle,
        dest: u8,
        ticks: u8,
        steps: u8,
        stop_after: bool,
    ) -> Result<()> {
        let mut guard = self.suspend();
        let sound = guard.sound_mut(handle)?;
        sound.fade = Some(Fade {
            dest: dest.min(MAX_LEVEL),
            ticks: ticks.min(MAX_LEVEL),
            steps,
            counter: 0,
            stop_after,
        });
        Ok(())
    }

    /// Ticks played since the start or the last loop rewind
    pub fn time_index(&self, handle: SoundHandle) -> Result<u32> {
        Ok(self.sound(handle)?.timer)
    }

    /// Pending cue of the sound
    pub fn cue_value(&self, handle: SoundHandle) -> Result<Option<u8>> {
        Ok(self.sound(handle)?.cue_value)
    }

    /// Overwrite the pending cue
    pub fn set_cue_value(&mut self, handle: SoundHandle, cue: Option<u8>) -> Result<()> {
        self.sound_mut(handle)?.cue_value = cue;
        Ok(())
    }

    /// Set the sound volume (clamped to 127)
    pub fn set_vol(&mut self, handle: SoundHandle, volume: u8) -> Result<()> {
        let volume = volume.min(MAX_LEVEL);
        let sound = self.sound_mut(handle)?;
        if sound.volume != volume {
            sound.volume = volume;
            if self.is_playing(handle) {
                self.update_sound_vol(handle);
            }
        }
        Ok(())
    }

    /// Sound volume
    pub fn vol(&self, handle: SoundHandle) -> Result<u8> {
        Ok(self.sound(handle)?.volume)
    }

    /// Override the resource priority (clamped to 127)
    pub fn set_pri(&mut self, handle: SoundHandle, priority: u8) -> Result<()> {
        self.sound_mut(handle)?.fixed_priority = Some(priority.min(MAX_LEVEL));
        self.update_sound_pri(handle);
        Ok(())
    }

    /// Effective priority
    pub fn pri(&self, handle: SoundHandle) -> Result<u8> {
        Ok(self.sound(handle)?.priority)
    }

    /// Override the resource loop count; 0 loops forever
    pub fn set_loop(&mut self, handle: SoundHandle, count: u16) -> Result<()> {
        self.sound_mut(handle)?.fixed_loop = Some(count);
        self.update_sound_loop(handle);
        Ok(())
    }

    /// Remaining loop count
    pub fn loop_count(&self, handle: SoundHandle) -> Result<u16> {
        Ok(self.sound(handle)?.loop_count)
    }

    /// Hold playback at the control-track marker carrying this value
    pub fn hold_at(&mut self, handle: SoundHandle, amount: u8) -> Result<()> {
        self.sound_mut(handle)?.hold = Some(amount.min(MAX_LEVEL));
        Ok(())
    }

    /// Clear the hold point
    pub fn release(&mut self, handle: SoundHandle) -> Result<()> {
        self.sound_mut(handle)?.hold = None;
        Ok(())
    }

    /// Reload a primed sound for the current driver set, keeping its position
    pub fn orient_after_driver_change(&mut self, handle: SoundHandle) -> Result<()> {
        let groups = self.groups_available;
        let sound = self
            .sounds
            .get_mut(handle)
            .ok_or(SoundError::InvalidHandle)?;
        if sound.empty || !sound.primed {
            return Ok(());
        }
        let time_index = sound.timer;
        let res_id = sound.res_id;
        if let Err(e) = sound.load(self.resources.as_ref(), res_id, groups, true) {
            self.take_from_play_list(handle);
            self.sound_list.retain(|&h| h != handle);
            return Err(e);
        }
        self.set_time_index(handle, time_index)
    }
}

impl Drop for SoundManager {
    fn drop(&mut self) {
        for handle in self.sound_list.clone() {
            if let Err(e) = self.stop(handle) {
                warn!("failed to stop sound {:?} on shutdown: {}", handle, e);
            }
        }
        for installed in &mut self.drivers {
            installed.driver.close();
        }
    }
}

#[cfg(test)]
mod tests;
