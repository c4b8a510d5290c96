//! Generational storage for sounds
//!
//! Sounds are referenced from the play list, the sound list and every voice
//! assignment. Handles carry a generation so that a stale handle to a
//! destroyed sound never aliases the sound that later reuses its slot.

use super::Sound;

/// Stable reference to a sound owned by a [`SoundArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle {
    index: u32,
    generation: u32,
}

impl SoundHandle {
    /// Slot index inside the arena
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    sound: Option<Sound>,
}

/// Slot arena with free-list reuse
#[derive(Debug, Default)]
pub struct SoundArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl SoundArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a sound and return its handle
    pub fn insert(&mut self, sound: Sound) -> SoundHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.sound = Some(sound);
            return SoundHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            sound: Some(sound),
        });
        SoundHandle {
            index,
            generation: 0,
        }
    }

    /// Remove a sound, returning it if the handle was live
    pub fn remove(&mut self, handle: SoundHandle) -> Option<Sound> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let sound = slot.sound.take()?;
        self.free.push(handle.index);
        Some(sound)
    }

    /// Borrow a live sound
    pub fn get(&self, handle: SoundHandle) -> Option<&Sound> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.sound.as_ref())
    }

    /// Mutably borrow a live sound
    pub fn get_mut(&mut self, handle: SoundHandle) -> Option<&mut Sound> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.sound.as_mut())
    }

    /// True when the handle refers to a live sound
    pub fn contains(&self, handle: SoundHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live sounds
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no sound is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles of every live sound in slot order
    pub fn handles(&self) -> Vec<SoundHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.sound.is_some())
            .map(|(index, slot)| SoundHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }
}
