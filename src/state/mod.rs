//! State management module
//!
//! Tracks per-partition offsets and turns them into snapshot bytes and back.
//!
//! # Overview
//!
//! The state module provides:
//! - `OffsetState` - partition to offset mapping
//! - `CheckpointLock` - the single lock guarding the live `OffsetState`
//! - `codec` - versioned snapshot format and migration of older releases
//! - `SnapshotStore` - file-based snapshot persistence

pub mod codec;
mod lock;
mod store;
mod types;

pub use codec::{
    deserialize, deserialize_legacy, serialize, SnapshotVersion, CURRENT_FORMAT_VERSION,
};
pub use lock::CheckpointLock;
pub use store::{write_atomic, SnapshotStore};
pub use types::OffsetState;

impl OffsetState {
    /// Encode in the current snapshot format
    pub fn serialize(&self) -> bytes::Bytes {
        codec::serialize(self)
    }

    /// Decode a snapshot of any supported format
    pub fn deserialize(bytes: &[u8]) -> crate::Result<Self> {
        codec::deserialize(bytes)
    }
}
