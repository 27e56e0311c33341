//! Connector module
//!
//! Lifecycle of a checkpointed log source.
//!
//! # Overview
//!
//! The connector module provides:
//! - `SourceConnector` - open, run, snapshot, restore, commit and close
//! - `ComponentFactory` - injects the discoverer and fetcher
//! - `OffsetCommitMode` - when offsets are committed back to the broker

mod commit;
mod factory;
mod lifecycle;

pub use commit::{OffsetCommitMode, PendingCheckpoints, MAX_PENDING_CHECKPOINTS};
pub use factory::{BrokerComponentFactory, ComponentFactory};
pub use lifecycle::{LifecyclePhase, SourceConnector};
