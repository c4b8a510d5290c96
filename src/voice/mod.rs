//! Voice Group Tables
//!
//! Installed drivers declare voice groups through their [`GroupData`]. The
//! manager merges those declarations into one [`VoiceTypeStruct`] per group
//! id. Each entry is one physical voice slot carrying three assignment
//! snapshots:
//!
//! - `current`: the owner the driver is playing for
//! - `proposed`: the owner chosen by the running rethink pass
//! - `previous`: the owner before the running rethink pass
//!
//! Fixed groups have one slot per driver channel tag. Pooled groups hand out
//! interchangeable voices and track the note each voice plays.

use crate::driver::{GroupBlock, GroupData};
use crate::sound::SoundHandle;
use crate::{Result, SoundError, SOUND_ARR_SIZE};

/// Slot tag bit marking a fixed slot reserved for pinned channels
pub const TAG_RESERVED: u8 = 0x80;

/// How a group hands out voices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceType {
    /// Fixed per-channel slots (TYPE_0)
    Fixed,
    /// Pool of interchangeable voices (TYPE_1)
    Pooled,
}

/// Owner of a voice slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// Owning sound
    pub sound: SoundHandle,
    /// Channel of the owning sound
    pub channel: u8,
    /// Allocation priority, 0 for channels that must play
    pub priority: i32,
}

impl Assignment {
    /// Same sound and channel, regardless of priority
    pub fn same_owner(&self, other: &Assignment) -> bool {
        self.sound == other.sound && self.channel == other.channel
    }

    /// Owned by the given sound channel
    pub fn is(&self, sound: SoundHandle, channel: u8) -> bool {
        self.sound == sound && self.channel == channel
    }
}

/// One physical voice slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStructEntry {
    /// Voice / channel number on the owning driver
    pub voice_num: u8,
    /// False for reserved fixed slots
    pub usable: bool,
    /// Index of the owning driver in the installed list
    pub driver: usize,
    /// Committed owner
    pub current: Option<Assignment>,
    /// Committed owner is bound to this exact slot
    pub pinned: bool,
    /// Owner proposed by the running pass
    pub proposed: Option<Assignment>,
    /// Proposed owner is bound to this exact slot
    pub proposed_pinned: bool,
    /// Owner before the running pass
    pub previous: Option<Assignment>,
    /// Note sounding on a pooled voice
    pub note: Option<u8>,
    /// Note kept sounding by the damper pedal
    pub held: bool,
    /// Server ticks since the voice last started a note
    pub age: u32,
}

impl VoiceStructEntry {
    fn new(voice_num: u8, usable: bool, driver: usize) -> Self {
        VoiceStructEntry {
            voice_num,
            usable,
            driver,
            current: None,
            pinned: false,
            proposed: None,
            proposed_pinned: false,
            previous: None,
            note: None,
            held: false,
            age: 0,
        }
    }

    /// Committed to the given sound channel
    pub fn is_owned_by(&self, sound: SoundHandle, channel: u8) -> bool {
        self.current.map_or(false, |a| a.is(sound, channel))
    }

    /// Clear note state after a release or reassignment
    pub fn reset_note(&mut self) {
        self.note = None;
        self.held = false;
        self.age = 0;
    }

    fn propose(&mut self, owner: Assignment, pinned: bool) {
        self.proposed = Some(owner);
        self.proposed_pinned = pinned;
    }

    fn clear_proposal(&mut self) {
        self.proposed = None;
        self.proposed_pinned = false;
    }
}

/// Voices of one group id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTypeStruct {
    /// Allocation model
    pub voice_type: VoiceType,
    /// Number of slots
    pub total: usize,
    /// Free pool size during a pass (pooled groups)
    pub num_voices: usize,
    /// Slots in driver install order
    pub entries: Vec<VoiceStructEntry>,
}

impl VoiceTypeStruct {
    fn new(voice_type: VoiceType, entries: Vec<VoiceStructEntry>) -> Self {
        VoiceTypeStruct {
            voice_type,
            total: entries.len(),
            num_voices: entries.len(),
            entries,
        }
    }

    /// Move current owners to `previous` and clear the working state
    pub fn begin_pass(&mut self) {
        for entry in &mut self.entries {
            entry.previous = entry.current.take();
            entry.pinned = false;
            entry.clear_proposal();
        }
        self.num_voices = self.total;
    }

    /// Reserve `count` free pooled voices
    pub fn claim_pool(&mut self, owner: Assignment, count: usize) -> bool {
        if self.num_voices < count {
            return false;
        }
        let mut remaining = count;
        for entry in self.entries.iter_mut().filter(|e| e.proposed.is_none()) {
            if remaining == 0 {
                break;
            }
            entry.propose(owner, false);
            remaining -= 1;
        }
        self.num_voices -= count;
        true
    }

    /// Evict the lowest-ranked pooled proposals until `count` voices are free.
    ///
    /// Only proposals with a non-zero priority are evictable. Returns false
    /// when the pool cannot be freed far enough.
    pub fn evict_pool(&mut self, count: usize) -> bool {
        while self.num_voices < count {
            let worst = self
                .entries
                .iter()
                .filter_map(|e| e.proposed.map(|a| a.priority))
                .max()
                .unwrap_or(0);
            if worst <= 0 {
                return false;
            }
            for entry in &mut self.entries {
                if entry.proposed.map_or(false, |a| a.priority == worst) {
                    entry.clear_proposal();
                    self.num_voices += 1;
                }
            }
        }
        true
    }

    fn highest_free_slot(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.usable && e.proposed.is_none())
            .max_by_key(|(_, e)| e.voice_num)
            .map(|(idx, _)| idx)
    }

    /// Give the free usable fixed slot with the highest voice number
    pub fn claim_free_fixed(&mut self, owner: Assignment) -> bool {
        match self.highest_free_slot() {
            Some(idx) => {
                self.entries[idx].propose(owner, false);
                true
            }
            None => false,
        }
    }

    /// Take the usable fixed slot whose proposal ranks lowest
    pub fn evict_fixed(&mut self, owner: Assignment) -> bool {
        let mut victim: Option<(usize, i32)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            if !entry.usable {
                continue;
            }
            if let Some(a) = entry.proposed {
                if a.priority > victim.map_or(0, |(_, p)| p) {
                    victim = Some((idx, a.priority));
                }
            }
        }
        match victim {
            Some((idx, _)) => {
                self.entries[idx].propose(owner, false);
                true
            }
            None => false,
        }
    }

    /// True when some slot is tagged with `voice_num`
    pub fn has_voice_num(&self, voice_num: u8) -> bool {
        self.entries.iter().any(|e| e.voice_num == voice_num)
    }

    /// Bind a channel to the fixed slot tagged with its own channel number.
    ///
    /// An unpinned occupant of the tagged slot is moved to a free slot when
    /// one exists. Otherwise only a must-play owner (priority 0) may evict
    /// an occupant with a non-zero priority.
    pub fn claim_pinned(&mut self, owner: Assignment) -> bool {
        let tagged: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.voice_num == owner.channel)
            .map(|(idx, _)| idx)
            .collect();

        if let Some(&idx) = tagged.iter().find(|&&i| self.entries[i].proposed.is_none()) {
            self.entries[idx].propose(owner, true);
            return true;
        }

        if let Some(&idx) = tagged.iter().find(|&&i| !self.entries[i].proposed_pinned) {
            if let Some(free) = self.highest_free_slot() {
                let displaced = self.entries[idx].proposed;
                if let Some(displaced) = displaced {
                    self.entries[free].propose(displaced, false);
                }
                self.entries[idx].propose(owner, true);
                return true;
            }
        }

        if owner.priority != 0 {
            return false;
        }

        let victim = tagged
            .iter()
            .copied()
            .filter_map(|i| self.entries[i].proposed.map(|a| (i, a.priority)))
            .filter(|&(_, p)| p > 0)
            .max_by_key(|&(_, p)| p);
        match victim {
            Some((idx, _)) => {
                self.entries[idx].propose(owner, true);
                true
            }
            None => false,
        }
    }

    /// Number of slots committed to a sound
    pub fn voices_of(&self, sound: SoundHandle) -> usize {
        self.entries
            .iter()
            .filter(|e| e.current.map_or(false, |a| a.sound == sound))
            .count()
    }
}

/// Saved proposals of every group, used to roll back a failed sound
#[derive(Debug, Clone)]
pub struct ProposalSnapshot {
    groups: Vec<Option<(usize, Vec<(Option<Assignment>, bool)>)>>,
}

/// The 16 voice groups built from the installed drivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTable {
    groups: Vec<Option<VoiceTypeStruct>>,
}

impl Default for VoiceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceTable {
    /// Table with no groups
    pub fn new() -> Self {
        VoiceTable {
            groups: vec![None; SOUND_ARR_SIZE],
        }
    }

    /// Merge the group tables of the installed drivers, in install order.
    ///
    /// Every driver declaring a group must agree on its voice type.
    pub fn build(drivers: &[&GroupData]) -> Result<Self> {
        let mut table = Self::new();

        for group in 0..SOUND_ARR_SIZE {
            let mut voice_type = None;
            let mut entries = Vec::new();

            for (driver, data) in drivers.iter().enumerate() {
                for block in data.blocks_for(group as u8) {
                    let kind = match block {
                        GroupBlock::Fixed(_) => VoiceType::Fixed,
                        GroupBlock::Pooled { .. } => VoiceType::Pooled,
                    };
                    match voice_type {
                        None => voice_type = Some(kind),
                        Some(existing) if existing != kind => {
                            return Err(SoundError::Device(format!(
                                "voice group {} declared as both {:?} and {:?}",
                                group, existing, kind
                            )));
                        }
                        Some(_) => {}
                    }

                    match block {
                        GroupBlock::Fixed(tags) => {
                            entries.extend(tags.iter().map(|&tag| {
                                VoiceStructEntry::new(tag & 0x7F, tag & TAG_RESERVED == 0, driver)
                            }));
                        }
                        GroupBlock::Pooled { count, .. } => {
                            entries.extend((0..*count).map(|v| VoiceStructEntry::new(v, true, driver)));
                        }
                    }
                }
            }

            if let (Some(voice_type), false) = (voice_type, entries.is_empty()) {
                table.groups[group] = Some(VoiceTypeStruct::new(voice_type, entries));
            }
        }

        Ok(table)
    }

    /// Group by id
    pub fn group(&self, id: usize) -> Option<&VoiceTypeStruct> {
        self.groups.get(id).and_then(|g| g.as_ref())
    }

    /// Mutable group by id
    pub fn group_mut(&mut self, id: usize) -> Option<&mut VoiceTypeStruct> {
        self.groups.get_mut(id).and_then(|g| g.as_mut())
    }

    /// Existing groups with their ids
    pub fn groups(&self) -> impl Iterator<Item = (usize, &VoiceTypeStruct)> {
        self.groups
            .iter()
            .enumerate()
            .filter_map(|(id, g)| g.as_ref().map(|g| (id, g)))
    }

    /// Existing groups with their ids, mutably
    pub fn groups_mut(&mut self) -> impl Iterator<Item = (usize, &mut VoiceTypeStruct)> {
        self.groups
            .iter_mut()
            .enumerate()
            .filter_map(|(id, g)| g.as_mut().map(|g| (id, g)))
    }

    /// True when no driver supplies any voice
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.is_none())
    }

    /// Start a rethink pass on every group
    pub fn begin_pass(&mut self) {
        for (_, group) in self.groups_mut() {
            group.begin_pass();
        }
    }

    /// Save the proposals of every group
    pub fn snapshot(&self) -> ProposalSnapshot {
        ProposalSnapshot {
            groups: self
                .groups
                .iter()
                .map(|g| {
                    g.as_ref().map(|g| {
                        let entries = g
                            .entries
                            .iter()
                            .map(|e| (e.proposed, e.proposed_pinned))
                            .collect();
                        (g.num_voices, entries)
                    })
                })
                .collect(),
        }
    }

    /// Restore proposals saved by [`VoiceTable::snapshot`]
    pub fn restore(&mut self, snapshot: &ProposalSnapshot) {
        for (group, saved) in self.groups.iter_mut().zip(&snapshot.groups) {
            if let (Some(group), Some((num_voices, entries))) = (group.as_mut(), saved) {
                group.num_voices = *num_voices;
                for (entry, (proposed, pinned)) in group.entries.iter_mut().zip(entries) {
                    entry.proposed = *proposed;
                    entry.proposed_pinned = *pinned;
                }
            }
        }
    }

    /// Committed voices of a sound across all groups
    pub fn voices_of(&self, sound: SoundHandle) -> usize {
        self.groups().map(|(_, g)| g.voices_of(sound)).sum()
    }

    /// Increment the age of every pooled voice
    pub fn age_pooled(&mut self) {
        for (_, group) in self.groups_mut() {
            if group.voice_type == VoiceType::Pooled {
                for entry in &mut group.entries {
                    entry.age = entry.age.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::{Sound, SoundArena};

    fn handles(n: usize) -> Vec<SoundHandle> {
        let mut arena = SoundArena::new();
        (0..n).map(|_| arena.insert(Sound::new())).collect()
    }

    fn owner(sound: SoundHandle, channel: u8, priority: i32) -> Assignment {
        Assignment {
            sound,
            channel,
            priority,
        }
    }

    #[test]
    fn test_build_pooled_group() {
        let data = GroupData::parse(9, &[1, 1, 9, 1, 0xFF]).unwrap();
        let table = VoiceTable::build(&[&data]).unwrap();
        let group = table.group(1).unwrap();
        assert_eq!(group.voice_type, VoiceType::Pooled);
        assert_eq!(group.total, 9);
        assert_eq!(group.num_voices, 9);
        assert_eq!(group.entries[8].voice_num, 8);
        assert!(table.group(0).is_none());
    }

    #[test]
    fn test_build_fixed_group_with_reserved_tag() {
        let data = GroupData::parse(1, &[0, 0, 0x01, 0x82, 0x03, 0xFF, 0xFF]).unwrap();
        let table = VoiceTable::build(&[&data]).unwrap();
        let group = table.group(0).unwrap();
        assert_eq!(group.voice_type, VoiceType::Fixed);
        assert_eq!(group.total, 3);
        assert_eq!(group.entries[1].voice_num, 2);
        assert!(!group.entries[1].usable);
        assert!(group.entries[2].usable);
    }

    #[test]
    fn test_conflicting_voice_types() {
        let a = GroupData::parse(1, &[1, 1, 4, 0, 0xFF]).unwrap();
        let b = GroupData::parse(2, &[1, 0, 0x00, 0xFF, 0xFF]).unwrap();
        assert!(matches!(VoiceTable::build(&[&a, &b]), Err(SoundError::Device(_))));
    }

    #[test]
    fn test_pool_claim_and_evict() {
        let h = handles(2);
        let data = GroupData::parse(9, &[1, 1, 4, 0, 0xFF]).unwrap();
        let mut table = VoiceTable::build(&[&data]).unwrap();
        let group = table.group_mut(1).unwrap();

        assert!(group.claim_pool(owner(h[0], 0, 20), 3));
        assert_eq!(group.num_voices, 1);
        assert!(!group.claim_pool(owner(h[1], 0, 0), 2));

        assert!(group.evict_pool(2));
        assert_eq!(group.num_voices, 4);
        assert!(group.claim_pool(owner(h[1], 0, 0), 2));
        assert_eq!(group.num_voices, 2);

        // Only must-play proposals remain, nothing further can be evicted
        assert!(group.claim_pool(owner(h[1], 1, 0), 2));
        assert!(!group.evict_pool(1));
    }

    #[test]
    fn test_pinned_claim_relocates_occupant() {
        let h = handles(2);
        let data = GroupData::parse(1, &[0, 0, 0x01, 0x02, 0xFF, 0xFF]).unwrap();
        let mut table = VoiceTable::build(&[&data]).unwrap();
        let group = table.group_mut(0).unwrap();

        // General allocation takes the highest voice number first
        assert!(group.claim_free_fixed(owner(h[0], 5, 0)));
        assert_eq!(group.entries[1].proposed.map(|a| a.channel), Some(5));

        assert!(group.claim_pinned(owner(h[1], 2, 0)));
        assert_eq!(group.entries[1].proposed.map(|a| a.sound), Some(h[1]));
        assert!(group.entries[1].proposed_pinned);
        assert_eq!(group.entries[0].proposed.map(|a| a.sound), Some(h[0]));
    }

    #[test]
    fn test_snapshot_restore() {
        let h = handles(1);
        let data = GroupData::parse(9, &[1, 1, 4, 0, 0xFF]).unwrap();
        let mut table = VoiceTable::build(&[&data]).unwrap();
        let snapshot = table.snapshot();

        table.group_mut(1).unwrap().claim_pool(owner(h[0], 0, 0), 4);
        table.restore(&snapshot);

        let group = table.group(1).unwrap();
        assert_eq!(group.num_voices, 4);
        assert!(group.entries.iter().all(|e| e.proposed.is_none()));
    }
}
