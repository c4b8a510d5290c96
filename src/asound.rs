//! Cue-driven sound wrapper for game logic
//!
//! [`ASound`] pairs a managed sound with an optional action. The action is
//! signalled with every cue the sound's control track emits and once more
//! when the sound stops on its own. The owner calls [`ASound::dispatch`]
//! once per game frame.

use std::fmt;

use crate::manager::SoundManager;
use crate::sound::SoundHandle;
use crate::Result;

/// Notification delivered to an [`ASound`] action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ASoundEvent {
    /// The control track emitted a cue value
    Cue(u8),
    /// The sound finished and is no longer primed
    Finished,
}

/// Callback signalled by [`ASound::dispatch`]
pub type SoundAction = Box<dyn FnMut(ASoundEvent) + Send>;

/// Managed sound with an end-of-sound action
pub struct ASound {
    handle: SoundHandle,
    action: Option<SoundAction>,
    cue_value: Option<u8>,
}

impl fmt::Debug for ASound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ASound")
            .field("handle", &self.handle)
            .field("has_action", &self.action.is_some())
            .field("cue_value", &self.cue_value)
            .finish()
    }
}

impl ASound {
    /// Create the underlying sound in the manager
    pub fn new(manager: &mut SoundManager) -> Self {
        ASound {
            handle: manager.create_sound(),
            action: None,
            cue_value: None,
        }
    }

    /// Handle of the underlying sound
    pub fn handle(&self) -> SoundHandle {
        self.handle
    }

    /// Last cue forwarded to the action, `None` when idle
    pub fn cue_value(&self) -> Option<u8> {
        self.cue_value
    }

    /// Play a resource at `volume`, signalling `action` on cues and completion
    pub fn play(
        &mut self,
        manager: &mut SoundManager,
        res_id: u32,
        action: Option<SoundAction>,
        volume: u8,
    ) -> Result<()> {
        self.action = action;
        self.cue_value = Some(0);
        manager.set_vol(self.handle, volume)?;
        manager.play(self.handle, res_id)
    }

    /// Stop the sound and drop the action without signalling it
    pub fn stop(&mut self, manager: &mut SoundManager) -> Result<()> {
        manager.stop(self.handle)?;
        self.action = None;
        Ok(())
    }

    /// Load a resource without playing it
    pub fn prime(
        &mut self,
        manager: &mut SoundManager,
        res_id: u32,
        action: Option<SoundAction>,
    ) -> Result<()> {
        self.action = action;
        self.cue_value = Some(0);
        manager.prime(self.handle, res_id)
    }

    /// Free the tracks and drop the action
    pub fn unprime(&mut self, manager: &mut SoundManager) -> Result<()> {
        self.action = None;
        manager.unprime(self.handle)
    }

    /// Start a primed sound
    pub fn go(&mut self, manager: &mut SoundManager) -> Result<()> {
        manager.go(self.handle)
    }

    /// Fade to `dest`; a given action replaces the current one
    pub fn fade(
        &mut self,
        manager: &mut SoundManager,
        dest: u8,
        ticks: u8,
        steps: u8,
        stop_after: bool,
        action: Option<SoundAction>,
    ) -> Result<()> {
        if action.is_some() {
            self.action = action;
        }
        manager.fade(self.handle, dest, ticks, steps, stop_after)
    }

    /// True when the sound is on the play list
    pub fn is_playing(&self, manager: &SoundManager) -> bool {
        manager.is_playing(self.handle)
    }

    /// Set the sound volume
    pub fn set_vol(&mut self, manager: &mut SoundManager, volume: u8) -> Result<()> {
        manager.set_vol(self.handle, volume)
    }

    /// Hold at a control-track marker
    pub fn hold_at(&mut self, manager: &mut SoundManager, amount: u8) -> Result<()> {
        manager.hold_at(self.handle, amount)
    }

    /// Clear the hold point
    pub fn release(&mut self, manager: &mut SoundManager) -> Result<()> {
        manager.release(self.handle)
    }

    /// Forward pending cues and completion to the action
    pub fn dispatch(&mut self, manager: &mut SoundManager) -> Result<()> {
        if let Some(cue) = manager.cue_value(self.handle)? {
            self.cue_value = Some(cue);
            manager.set_cue_value(self.handle, None)?;
            if let Some(action) = self.action.as_mut() {
                action(ASoundEvent::Cue(cue));
            }
        }

        if self.cue_value.is_some() && !manager.is_primed(self.handle) {
            self.cue_value = None;
            if let Some(mut action) = self.action.take() {
                action(ASoundEvent::Finished);
            }
        }
        Ok(())
    }

    /// Stop and free the underlying sound
    pub fn destroy(mut self, manager: &mut SoundManager) -> Result<()> {
        self.action = None;
        manager.destroy_sound(self.handle)
    }
}
