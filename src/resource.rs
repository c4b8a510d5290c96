//! Sound resource format
//!
//! A sound resource is a little-endian header, a group table choosing which
//! tracks to load for the installed hardware, and one chunk per track.
//!
//! Header:
//! - `+4` maximum engine version (u16)
//! - `+6` minimum engine version (u16)
//! - `+8` group table offset (u16)
//! - `+12` default priority (u16)
//! - `+14` default loop count (u16)
//!
//! Group table: `(mask:u32, count:u16, [chunk:u16, voice_group:u16]*count)*`
//! terminated by a zero mask.
//!
//! Track chunk: `mode:u8`, `channel:i8`, four reserved bytes, `voices:u8`,
//! `sub_priority:u8`, `flags:u16`, `program:u8`, `volume:u8`, `pan:u8`,
//! `percussion_note:u8`, then the event stream.

use std::collections::HashMap;

use nom::bytes::complete::take;
use nom::multi::count;
use nom::number::complete::{le_i8, le_u16, le_u32, u8 as byte};
use nom::sequence::tuple;
use nom::IResult;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::{Result, SoundError, SOUND_ARR_SIZE};

/// Sound resource version understood by the engine
pub const SOUND_RES_VERSION: u16 = 0x102;

/// Driver resource version understood by the engine
pub const DRIVER_RES_VERSION: u16 = 0x10A;

/// Group mask whose tracks are loaded regardless of hardware
pub const GROUP_ALWAYS: u32 = 0x8000_0000;

/// Size of the fixed sound resource header
pub const HEADER_SIZE: usize = 16;

/// Byte offset of the first event in a track chunk
pub const TRACK_EVENTS_OFFSET: usize = 14;

/// Kind of resource requested from a [`ResourceSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Sound header and track chunks
    Sound,
    /// Driver instrument bank
    Bank,
}

/// Collaborator supplying resource bytes; ownership passes to the caller
pub trait ResourceSource: Send {
    /// Load a resource, or `None` if it does not exist
    fn get_resource(&self, kind: ResourceKind, id: u32, sub_id: u32) -> Option<Vec<u8>>;
}

/// In-memory resource store
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
    entries: HashMap<(ResourceKind, u32, u32), Vec<u8>>,
}

impl MemoryResources {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a resource
    pub fn insert(&mut self, kind: ResourceKind, id: u32, sub_id: u32, data: Vec<u8>) {
        self.entries.insert((kind, id, sub_id), data);
    }

    /// Remove a resource
    pub fn remove(&mut self, kind: ResourceKind, id: u32, sub_id: u32) -> Option<Vec<u8>> {
        self.entries.remove(&(kind, id, sub_id))
    }
}

impl ResourceSource for MemoryResources {
    fn get_resource(&self, kind: ResourceKind, id: u32, sub_id: u32) -> Option<Vec<u8>> {
        self.entries.get(&(kind, id, sub_id)).cloned()
    }
}

/// Decoded fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundHeader {
    /// Newest engine version able to play the resource
    pub max_version: u16,
    /// Oldest engine version able to play the resource
    pub min_version: u16,
    /// Offset of the group table
    pub group_offset: u16,
    /// Default priority
    pub priority: u16,
    /// Default loop count
    pub loop_count: u16,
}

/// Reference from a group table entry to a track chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackRef {
    /// Sub-resource id of the track chunk
    pub chunk: u16,
    /// Voice group the track's channel draws voices from
    pub voice_group: u16,
}

/// One group table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTableEntry {
    /// Capability mask required by this arrangement
    pub mask: u32,
    /// Tracks of the arrangement
    pub tracks: Vec<TrackRef>,
}

/// Tracks selected for the active group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    /// Selected track references in load order
    pub tracks: Vec<TrackRef>,
}

/// Track decoding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum TrackMode {
    /// Event stream driving a channel
    Channel = 0,
    /// Single percussion trigger
    Percussion = 1,
}

/// Decoded track chunk header plus its raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackChunk {
    /// Decoding mode
    pub mode: TrackMode,
    /// Channel number, `None` for the control track
    pub channel: Option<u8>,
    /// Voices requested by the channel
    pub voices: u8,
    /// Sub-priority used when allocating voices
    pub sub_priority: u8,
    /// Channel flags
    pub flags: u16,
    /// Initial program
    pub program: u8,
    /// Initial channel volume
    pub volume: u8,
    /// Initial pan
    pub pan: u8,
    /// Note matched by percussion triggers
    pub percussion_note: u8,
    /// Complete chunk, events start at [`TRACK_EVENTS_OFFSET`]
    pub data: Vec<u8>,
}

fn format_error(what: &str, e: nom::Err<nom::error::Error<&[u8]>>) -> SoundError {
    SoundError::ResourceFormat(format!("{}: {:?}", what, e.map_input(|i| i.len())))
}

fn header(input: &[u8]) -> IResult<&[u8], SoundHeader> {
    let (input, (_, max_version, min_version, group_offset, _, priority, loop_count)) =
        tuple((take(4usize), le_u16, le_u16, le_u16, take(2usize), le_u16, le_u16))(input)?;
    Ok((
        input,
        SoundHeader {
            max_version,
            min_version,
            group_offset,
            priority,
            loop_count,
        },
    ))
}

fn track_ref(input: &[u8]) -> IResult<&[u8], TrackRef> {
    let (input, (chunk, voice_group)) = tuple((le_u16, le_u16))(input)?;
    Ok((input, TrackRef { chunk, voice_group }))
}

fn group_entry(input: &[u8]) -> IResult<&[u8], Option<GroupTableEntry>> {
    let (input, mask) = le_u32(input)?;
    if mask == 0 {
        return Ok((input, None));
    }
    let (input, n) = le_u16(input)?;
    let (input, tracks) = count(track_ref, n as usize)(input)?;
    Ok((input, Some(GroupTableEntry { mask, tracks })))
}

/// Parse the fixed header
pub fn parse_header(data: &[u8]) -> Result<SoundHeader> {
    header(data)
        .map(|(_, h)| h)
        .map_err(|e| format_error("sound header", e))
}

/// Parse the group table of a sound resource
pub fn parse_group_table(data: &[u8]) -> Result<Vec<GroupTableEntry>> {
    let offset = parse_header(data)?.group_offset as usize;
    let mut input = data.get(offset..).ok_or_else(|| {
        SoundError::ResourceFormat(format!("group table offset {} out of range", offset))
    })?;

    let mut entries = Vec::new();
    loop {
        let (rest, entry) = group_entry(input).map_err(|e| format_error("group table", e))?;
        input = rest;
        match entry {
            Some(entry) => entries.push(entry),
            None => break,
        }
    }
    Ok(entries)
}

/// Fail unless `version` lies within the resource's supported window
pub fn check_version(header: &SoundHeader, version: u16) -> Result<()> {
    if version < header.min_version {
        return Err(SoundError::ResourceVersion(format!(
            "resource requires version {:#x}, engine is {:#x} (too new)",
            header.min_version, version
        )));
    }
    if version > header.max_version {
        return Err(SoundError::ResourceVersion(format!(
            "resource supports up to version {:#x}, engine is {:#x} (too old)",
            header.max_version, version
        )));
    }
    Ok(())
}

/// First group mask fully covered by the available capability mask, or 0
pub fn determine_group(entries: &[GroupTableEntry], available: u32) -> u32 {
    entries
        .iter()
        .map(|e| e.mask)
        .find(|&mask| mask & available == mask)
        .unwrap_or(0)
}

/// Collect the tracks for a group, including the always-loaded group
pub fn extract_track_info(entries: &[GroupTableEntry], group: u32) -> Result<TrackInfo> {
    let tracks: Vec<TrackRef> = entries
        .iter()
        .filter(|e| e.mask == GROUP_ALWAYS || (group != 0 && e.mask == group))
        .flat_map(|e| e.tracks.iter().copied())
        .collect();

    if tracks.len() > SOUND_ARR_SIZE {
        return Err(SoundError::ResourceFormat(format!(
            "{} tracks exceed the {} track limit",
            tracks.len(),
            SOUND_ARR_SIZE
        )));
    }
    Ok(TrackInfo { tracks })
}

/// Decode a track chunk header
pub fn parse_track_chunk(data: Vec<u8>) -> Result<TrackChunk> {
    if data.len() < TRACK_EVENTS_OFFSET {
        return Err(SoundError::ResourceFormat(format!(
            "track chunk is {} bytes, header needs {}",
            data.len(),
            TRACK_EVENTS_OFFSET
        )));
    }

    let parsed: IResult<&[u8], _> = tuple((
        byte,
        le_i8,
        take(4usize),
        byte,
        byte,
        le_u16,
        byte,
        byte,
        byte,
        byte,
    ))(&data[..]);
    let (_, (mode, channel, _, voices, sub_priority, flags, program, volume, pan, note)) =
        parsed.map_err(|e| format_error("track chunk", e))?;

    let mode = TrackMode::from_u8(mode)
        .ok_or_else(|| SoundError::ResourceFormat(format!("unknown track mode {}", mode)))?;
    let channel = match channel {
        -1 => None,
        c if (0..SOUND_ARR_SIZE as i8).contains(&c) => Some(c as u8),
        c => {
            return Err(SoundError::ResourceFormat(format!(
                "track channel {} out of range",
                c
            )))
        }
    };

    Ok(TrackChunk {
        mode,
        channel,
        voices,
        sub_priority,
        flags,
        program,
        volume,
        pan,
        percussion_note: note,
        data,
    })
}

/// Description of one track for [`SoundResourceBuilder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSpec {
    /// Raw mode byte
    pub mode: u8,
    /// Channel, -1 for the control track
    pub channel: i8,
    /// Voice group id written to the group table
    pub voice_group: u16,
    /// Requested voices
    pub voices: u8,
    /// Sub-priority
    pub sub_priority: u8,
    /// Channel flags
    pub flags: u16,
    /// Initial program
    pub program: u8,
    /// Initial volume
    pub volume: u8,
    /// Initial pan
    pub pan: u8,
    /// Percussion note
    pub percussion_note: u8,
    /// Encoded event stream
    pub events: Vec<u8>,
}

impl TrackSpec {
    /// Channel track with one voice at full volume
    pub fn channel(channel: u8, voice_group: u16, events: Vec<u8>) -> Self {
        TrackSpec {
            mode: TrackMode::Channel as u8,
            channel: channel as i8,
            voice_group,
            voices: 1,
            sub_priority: 0,
            flags: 0,
            program: 0,
            volume: 127,
            pan: 64,
            percussion_note: 0,
            events,
        }
    }

    /// Control track (channel -1)
    pub fn control(events: Vec<u8>) -> Self {
        TrackSpec {
            channel: -1,
            voices: 0,
            ..Self::channel(0, 0, events)
        }
    }

    /// Percussion track firing `note` once on `channel`
    pub fn percussion(channel: u8, voice_group: u16, note: u8) -> Self {
        TrackSpec {
            mode: TrackMode::Percussion as u8,
            percussion_note: note,
            ..Self::channel(channel, voice_group, Vec::new())
        }
    }

    /// Set the requested voice count
    pub fn with_voices(mut self, voices: u8) -> Self {
        self.voices = voices;
        self
    }

    /// Set the sub-priority
    pub fn with_sub_priority(mut self, sub_priority: u8) -> Self {
        self.sub_priority = sub_priority;
        self
    }

    /// Set the channel flags
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Set the initial program
    pub fn with_program(mut self, program: u8) -> Self {
        self.program = program;
        self
    }

    /// Set the initial volume
    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume;
        self
    }

    /// Encode the chunk
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TRACK_EVENTS_OFFSET + self.events.len());
        out.push(self.mode);
        out.push(self.channel as u8);
        out.extend_from_slice(&[0; 4]);
        out.push(self.voices);
        out.push(self.sub_priority);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.push(self.program);
        out.push(self.volume);
        out.push(self.pan);
        out.push(self.percussion_note);
        out.extend_from_slice(&self.events);
        out
    }
}

/// Assembles sound resources for tests and demos
#[derive(Debug, Clone)]
pub struct SoundResourceBuilder {
    id: u32,
    min_version: u16,
    max_version: u16,
    priority: u16,
    loop_count: u16,
    groups: Vec<(u32, Vec<TrackSpec>)>,
}

impl SoundResourceBuilder {
    /// Start a resource with the given id
    pub fn new(id: u32) -> Self {
        SoundResourceBuilder {
            id,
            min_version: SOUND_RES_VERSION,
            max_version: DRIVER_RES_VERSION,
            priority: 64,
            loop_count: 1,
            groups: Vec::new(),
        }
    }

    /// Set the supported version window
    pub fn versions(mut self, min_version: u16, max_version: u16) -> Self {
        self.min_version = min_version;
        self.max_version = max_version;
        self
    }

    /// Set the default priority
    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    /// Set the default loop count
    pub fn loop_count(mut self, loop_count: u16) -> Self {
        self.loop_count = loop_count;
        self
    }

    /// Add a group arrangement
    pub fn group(mut self, mask: u32, tracks: Vec<TrackSpec>) -> Self {
        self.groups.push((mask, tracks));
        self
    }

    /// Encode the header resource and the `(chunk id, bytes)` track chunks
    pub fn build(&self) -> (Vec<u8>, Vec<(u16, Vec<u8>)>) {
        let mut out = vec![0u8; HEADER_SIZE];
        out[4..6].copy_from_slice(&self.max_version.to_le_bytes());
        out[6..8].copy_from_slice(&self.min_version.to_le_bytes());
        out[8..10].copy_from_slice(&(HEADER_SIZE as u16).to_le_bytes());
        out[12..14].copy_from_slice(&self.priority.to_le_bytes());
        out[14..16].copy_from_slice(&self.loop_count.to_le_bytes());

        let mut chunks = Vec::new();
        let mut next_chunk = 1u16;
        for (mask, tracks) in &self.groups {
            out.extend_from_slice(&mask.to_le_bytes());
            out.extend_from_slice(&(tracks.len() as u16).to_le_bytes());
            for track in tracks {
                out.extend_from_slice(&next_chunk.to_le_bytes());
                out.extend_from_slice(&track.voice_group.to_le_bytes());
                chunks.push((next_chunk, track.encode()));
                next_chunk += 1;
            }
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        (out, chunks)
    }

    /// Encode and store into a resource store
    pub fn install(&self, resources: &mut MemoryResources) {
        let (header, chunks) = self.build();
        resources.insert(ResourceKind::Sound, self.id, 0, header);
        for (chunk, data) in chunks {
            resources.insert(ResourceKind::Sound, self.id, chunk as u32, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_group_resource() -> Vec<u8> {
        SoundResourceBuilder::new(10)
            .priority(20)
            .loop_count(3)
            .group(GROUP_ALWAYS, vec![TrackSpec::control(vec![0xFF, 0x80])])
            .group(1, vec![TrackSpec::channel(0, 1, vec![0xFF, 0x80])])
            .group(8, vec![TrackSpec::channel(1, 1, vec![0xFF, 0x80])])
            .build()
            .0
    }

    #[test]
    fn test_parse_header() {
        let data = two_group_resource();
        let header = parse_header(&data).unwrap();
        assert_eq!(header.priority, 20);
        assert_eq!(header.loop_count, 3);
        assert_eq!(header.min_version, SOUND_RES_VERSION);
        assert_eq!(header.group_offset as usize, HEADER_SIZE);
    }

    #[test]
    fn test_group_selection() {
        let entries = parse_group_table(&two_group_resource()).unwrap();
        assert_eq!(entries.len(), 3);
        // First mask fully contained in the available set
        assert_eq!(determine_group(&entries, 9), 1);
        assert_eq!(determine_group(&entries, 8), 8);
        assert_eq!(determine_group(&entries, 2), 0);

        let info = extract_track_info(&entries, 8).unwrap();
        assert_eq!(info.tracks.len(), 2);
        assert_eq!(info.tracks[1].chunk, 3);
    }

    #[test]
    fn test_version_window() {
        let header = parse_header(&two_group_resource()).unwrap();
        assert!(check_version(&header, SOUND_RES_VERSION).is_ok());
        assert!(matches!(
            check_version(&header, 0x101),
            Err(SoundError::ResourceVersion(_))
        ));
        assert!(matches!(
            check_version(&header, 0x200),
            Err(SoundError::ResourceVersion(_))
        ));
    }

    #[test]
    fn test_truncated_group_table() {
        let mut data = two_group_resource();
        data.truncate(HEADER_SIZE + 5);
        assert!(matches!(
            parse_group_table(&data),
            Err(SoundError::ResourceFormat(_))
        ));
    }

    #[test]
    fn test_too_many_tracks() {
        let tracks = (0..17)
            .map(|c| TrackSpec::channel((c % 16) as u8, 1, vec![0xFF, 0x80]))
            .collect();
        let (data, _) = SoundResourceBuilder::new(1).group(1, tracks).build();
        let entries = parse_group_table(&data).unwrap();
        assert!(extract_track_info(&entries, 1).is_err());
    }

    #[test]
    fn test_track_chunk_fields() {
        let spec = TrackSpec::channel(3, 1, vec![0x3C])
            .with_voices(2)
            .with_sub_priority(5)
            .with_flags(0x10)
            .with_program(7)
            .with_volume(90);
        let chunk = parse_track_chunk(spec.encode()).unwrap();
        assert_eq!(chunk.mode, TrackMode::Channel);
        assert_eq!(chunk.channel, Some(3));
        assert_eq!(chunk.voices, 2);
        assert_eq!(chunk.sub_priority, 5);
        assert_eq!(chunk.flags, 0x10);
        assert_eq!(chunk.program, 7);
        assert_eq!(chunk.volume, 90);
        assert_eq!(chunk.data[TRACK_EVENTS_OFFSET], 0x3C);

        let control = parse_track_chunk(TrackSpec::control(vec![]).encode()).unwrap();
        assert_eq!(control.channel, None);
    }

    #[test]
    fn test_unknown_track_mode() {
        let mut spec = TrackSpec::channel(0, 1, vec![]);
        spec.mode = 2;
        assert!(matches!(
            parse_track_chunk(spec.encode()),
            Err(SoundError::ResourceFormat(_))
        ));
    }

    #[test]
    fn test_memory_resources() {
        let mut res = MemoryResources::new();
        SoundResourceBuilder::new(5)
            .group(1, vec![TrackSpec::channel(0, 1, vec![])])
            .install(&mut res);
        assert!(res.get_resource(ResourceKind::Sound, 5, 0).is_some());
        assert!(res.get_resource(ResourceKind::Sound, 5, 1).is_some());
        assert!(res.get_resource(ResourceKind::Bank, 5, 0).is_none());
    }
}
