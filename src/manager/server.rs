//! Server tick
//!
//! Drivers raise the shared timer signal once per timer period while they
//! render. [`SoundManager::service_timer`] drains it on the logic thread and
//! runs [`SoundManager::update`] per period; every `events_delay + 1`
//! updates the sound server proper runs: a pending rethink, one tick of
//! every playing sound's tracks and fade, voice ageing and driver polls.

use std::sync::atomic::Ordering;

use log::{debug, trace};

use super::SoundManager;
use crate::sound::{SoundHandle, TrackContext};
use crate::{Result, SoundError};

/// Server ticks per second
pub const TICK_RATE: u32 = 50;

impl SoundManager {
    /// One timer period
    pub fn update(&mut self) -> Result<()> {
        self.update_ticks += 1;
        if self.update_ticks > self.config.events_delay {
            self.update_ticks = 0;
            self.sound_server()?;
        }
        Ok(())
    }

    /// Run `update` once for every timer period the drivers signalled.
    ///
    /// Returns the number of periods serviced. When an update fails the
    /// periods after it stay pending for the next call.
    pub fn service_timer(&mut self) -> Result<u32> {
        let pending = self.timer.swap(0, Ordering::AcqRel);
        for serviced in 0..pending {
            if let Err(e) = self.update() {
                self.timer.fetch_add(pending - serviced - 1, Ordering::AcqRel);
                return Err(e);
            }
        }
        Ok(pending)
    }

    /// Render mono samples from every installed driver and service the
    /// timer periods that elapsed while rendering.
    ///
    /// The buffer is rendered in tick-sized blocks so that events land on
    /// the tick they were scheduled for.
    pub fn render(&mut self, buffer: &mut [i16]) -> Result<()> {
        let block = (self.config.sample_rate / TICK_RATE).max(1) as usize;
        let mut scratch = Vec::new();

        for chunk in buffer.chunks_mut(block) {
            chunk.fill(0);
            for installed in &mut self.drivers {
                scratch.clear();
                scratch.resize(chunk.len(), 0i16);
                let written = installed.driver.read_buffer(&mut scratch).min(chunk.len());
                for (out, sample) in chunk.iter_mut().zip(&scratch[..written]) {
                    *out = out.saturating_add(*sample);
                }
            }
            self.service_timer()?;
        }
        Ok(())
    }

    /// Stop sounds that finished inside the server
    pub fn dispatch(&mut self) -> Result<()> {
        for handle in self.sound_list.clone() {
            let finished = self
                .sounds
                .get(handle)
                .map_or(false, |s| s.stopped_asynchronously);
            if finished {
                debug!("sound {:?} finished", handle);
                self.stop(handle)?;
            }
        }
        Ok(())
    }

    /// One server tick; does nothing while disabled or suspended
    pub fn sound_server(&mut self) -> Result<()> {
        if !self.is_server_active() {
            return Ok(());
        }

        if self.need_to_rethink {
            self.rethink_voice_types();
            self.need_to_rethink = false;
        }

        self.process_fading()?;

        for installed in &mut self.drivers {
            installed.driver.poll();
        }
        Ok(())
    }

    fn process_fading(&mut self) -> Result<()> {
        for handle in self.play_list.clone() {
            self.service_sound(handle)?;

            let step = self.sounds.get_mut(handle).and_then(|sound| {
                let volume = sound.volume;
                let fade = sound.fade.as_mut()?;
                fade.tick(volume).map(|next| (next, fade.dest, fade.stop_after))
            });
            let Some((volume, dest, stop_after)) = step else {
                continue;
            };

            if let Some(sound) = self.sounds.get_mut(handle) {
                sound.volume = volume;
                if volume == dest {
                    sound.fade = None;
                }
            }
            trace!("sound {:?} fade volume {}", handle, volume);
            self.push_sound_volume(handle);
            if volume == dest && stop_after {
                self.finish_asynchronously(handle);
            }
        }

        self.voices.age_pooled();
        Ok(())
    }

    fn service_sound(&mut self, handle: SoundHandle) -> Result<()> {
        let Some(sound) = self.sounds.get_mut(handle) else {
            return Ok(());
        };
        if sound.is_paused() {
            return Ok(());
        }
        let mut ctx = TrackContext {
            handle,
            voices: &mut self.voices,
            drivers: &mut self.drivers,
            fast_forward: self.fast_forward,
            need_to_rethink: &mut self.need_to_rethink,
        };
        if sound.service_tracks(&mut ctx)? {
            self.finish_asynchronously(handle);
        }
        Ok(())
    }

    /// Seek a primed sound to a tick position.
    ///
    /// The sound is muted while its tracks fast-forward from the start, so
    /// only channel state is updated; voices are reassigned on unmute.
    pub fn set_time_index(&mut self, handle: SoundHandle, index: u32) -> Result<()> {
        if !self.sound(handle)?.primed {
            return Ok(());
        }
        self.mute(handle, true)?;
        let result = self.seek(handle, index);
        self.mute(handle, false)?;
        result
    }

    fn seek(&mut self, handle: SoundHandle, index: u32) -> Result<()> {
        self.disable_sound_server();
        self.fast_forward = true;
        let result = self.fast_forward_to(handle, index);
        self.fast_forward = false;
        self.enable_sound_server();
        result
    }

    fn fast_forward_to(&mut self, handle: SoundHandle, index: u32) -> Result<()> {
        let sound = self
            .sounds
            .get_mut(handle)
            .ok_or(SoundError::InvalidHandle)?;
        if sound.timer == index {
            return Ok(());
        }
        sound.timer = 0;
        sound.loop_timer = 0;
        sound.prime_channel_data();

        for _ in 0..index {
            let timer = self.sounds.get(handle).map_or(index, |s| s.timer);
            if timer >= index {
                break;
            }
            let Some(sound) = self.sounds.get_mut(handle) else {
                break;
            };
            let mut ctx = TrackContext {
                handle,
                voices: &mut self.voices,
                drivers: &mut self.drivers,
                fast_forward: true,
                need_to_rethink: &mut self.need_to_rethink,
            };
            if sound.service_tracks(&mut ctx)? {
                self.finish_asynchronously(handle);
                break;
            }
        }
        Ok(())
    }
}
