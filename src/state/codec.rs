//! Snapshot encoding and migration of older formats
//!
//! Layout (big-endian):
//!
//! ```text
//! [format_tag:i32][entry_count:i32]
//!     { [topic_len:i32][topic:utf8][partition:i32][offset:i64] } x entry_count
//! ```
//!
//! `format_tag` is `FORMAT_TAG_MARKER | version`, which is negative as an
//! i32. Releases before 0.3 wrote the same entries without the tag, so an
//! unversioned snapshot starts with a non-negative entry count. The two
//! shapes never overlap.

use super::types::OffsetState;
use crate::error::{Error, Result};
use crate::partition::{Offset, TopicPartition};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Newest snapshot format version this build reads and writes
pub const CURRENT_FORMAT_VERSION: u32 = 1;

const FORMAT_TAG_MARKER: u32 = 0xA55E_0000;
const FORMAT_TAG_MASK: u32 = 0xFFFF_0000;

// ============================================================================
// Releases
// ============================================================================

/// Release that wrote a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SnapshotVersion {
    /// 0.1, unversioned format
    V0_1,
    /// 0.2, unversioned format
    V0_2,
    /// 0.3, tagged format version 1
    V0_3,
    /// 1.0, tagged format version 1
    V1_0,
}

impl SnapshotVersion {
    /// Oldest release whose snapshots can be restored
    pub const OLDEST: Self = Self::V0_1;
    /// This release
    pub const CURRENT: Self = Self::V1_0;

    const ALL: [Self; 4] = [Self::V0_1, Self::V0_2, Self::V0_3, Self::V1_0];

    /// Every release from `from` through `to`, inclusive
    pub fn range(from: Self, to: Self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|v| (from..=to).contains(v))
            .collect()
    }

    /// Every supported release
    pub fn supported() -> Vec<Self> {
        Self::range(Self::OLDEST, Self::CURRENT)
    }

    /// Release name, e.g. `0.2`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V0_1 => "0.1",
            Self::V0_2 => "0.2",
            Self::V0_3 => "0.3",
            Self::V1_0 => "1.0",
        }
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_str())
    }
}

impl FromStr for SnapshotVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.strip_prefix('v').unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == name)
            .ok_or_else(|| Error::invalid_value("version", format!("unknown release '{s}'")))
    }
}

// ============================================================================
// Migration table
// ============================================================================

type Decoder = fn(&[u8]) -> Result<OffsetState>;

/// Releases `from..=to` wrote snapshots readable by `decode`
struct Migration {
    from: SnapshotVersion,
    to: SnapshotVersion,
    decode: Decoder,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        from: SnapshotVersion::V0_1,
        to: SnapshotVersion::V0_2,
        decode: decode_unversioned,
    },
    Migration {
        from: SnapshotVersion::V0_3,
        to: SnapshotVersion::CURRENT,
        decode: decode_tagged,
    },
];

// ============================================================================
// Encoding
// ============================================================================

/// Encode `state` in the current format
pub fn serialize(state: &OffsetState) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + state.len() * 32);
    buf.put_u32(FORMAT_TAG_MARKER | CURRENT_FORMAT_VERSION);
    put_entries(&mut buf, state);
    buf.freeze()
}

/// Encode `state` in the unversioned format written before release 0.3
pub fn serialize_unversioned(state: &OffsetState) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + state.len() * 32);
    put_entries(&mut buf, state);
    buf.freeze()
}

fn put_entries(buf: &mut BytesMut, state: &OffsetState) {
    buf.put_i32(state.len() as i32);
    for (partition, offset) in state {
        buf.put_i32(partition.topic.len() as i32);
        buf.put_slice(partition.topic.as_bytes());
        buf.put_i32(partition.partition);
        buf.put_i64(offset.to_raw());
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Format version of a snapshot, `None` for the unversioned format
pub fn format_version(bytes: &[u8]) -> Result<Option<u32>> {
    let mut buf = bytes;
    let head = read_i32(&mut buf, "snapshot header")?;
    if head >= 0 {
        return Ok(None);
    }
    let tag = head as u32;
    if tag & FORMAT_TAG_MASK != FORMAT_TAG_MARKER {
        return Err(Error::corrupt_state(format!(
            "unrecognized snapshot header {tag:#010x}"
        )));
    }
    Ok(Some(tag & !FORMAT_TAG_MASK))
}

/// Decode a snapshot, detecting its format from the header
pub fn deserialize(bytes: &[u8]) -> Result<OffsetState> {
    match format_version(bytes)? {
        None => decode_unversioned(bytes),
        Some(_) => decode_tagged(bytes),
    }
}

/// Decode a snapshot written by release `version`
pub fn deserialize_legacy(bytes: &[u8], version: SnapshotVersion) -> Result<OffsetState> {
    let migration = MIGRATIONS
        .iter()
        .find(|m| (m.from..=m.to).contains(&version))
        .ok_or_else(|| {
            Error::invalid_value("version", format!("no decoder for release {version}"))
        })?;
    (migration.decode)(bytes)
}

fn decode_unversioned(bytes: &[u8]) -> Result<OffsetState> {
    let mut buf = bytes;
    let state = read_entries(&mut buf)?;
    expect_end(buf)?;
    Ok(state)
}

fn decode_tagged(bytes: &[u8]) -> Result<OffsetState> {
    let version = format_version(bytes)?
        .ok_or_else(|| Error::corrupt_state("snapshot has no format tag"))?;
    if version > CURRENT_FORMAT_VERSION {
        return Err(Error::UnsupportedVersion {
            version,
            supported: CURRENT_FORMAT_VERSION,
        });
    }
    if version == 0 {
        return Err(Error::corrupt_state("format version 0 is not valid"));
    }

    let mut buf = &bytes[4..];
    let state = read_entries(&mut buf)?;
    expect_end(buf)?;
    Ok(state)
}

fn read_entries(buf: &mut &[u8]) -> Result<OffsetState> {
    let count = read_i32(buf, "entry count")?;
    if count < 0 {
        return Err(Error::corrupt_state(format!("negative entry count {count}")));
    }

    let mut state = OffsetState::new();
    for index in 0..count {
        let topic_len = read_i32(buf, "topic length")?;
        let topic_len = usize::try_from(topic_len).map_err(|_| {
            Error::corrupt_state(format!("negative topic length in entry {index}"))
        })?;
        if buf.remaining() < topic_len {
            return Err(Error::corrupt_state(format!(
                "truncated topic name in entry {index}"
            )));
        }
        let topic = std::str::from_utf8(&buf[..topic_len])
            .map_err(|e| Error::corrupt_state(format!("invalid topic name in entry {index}: {e}")))?
            .to_string();
        buf.advance(topic_len);

        let partition = read_i32(buf, "partition index")?;
        let raw = read_i64(buf, "offset")?;
        let offset = Offset::from_raw(raw).ok_or_else(|| {
            Error::corrupt_state(format!("invalid offset {raw} for {topic}-{partition}"))
        })?;

        let partition = TopicPartition::new(topic, partition);
        if state.contains(&partition) {
            return Err(Error::corrupt_state(format!(
                "duplicate entry for {partition}"
            )));
        }
        state.insert(partition, offset);
    }
    Ok(state)
}

fn read_i32(buf: &mut &[u8], what: &str) -> Result<i32> {
    if buf.remaining() < 4 {
        return Err(Error::corrupt_state(format!("truncated {what}")));
    }
    Ok(buf.get_i32())
}

fn read_i64(buf: &mut &[u8], what: &str) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(Error::corrupt_state(format!("truncated {what}")));
    }
    Ok(buf.get_i64())
}

fn expect_end(buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(Error::corrupt_state(format!(
            "{} trailing bytes after last entry",
            buf.len()
        )))
    }
}
