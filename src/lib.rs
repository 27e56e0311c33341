// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Solidafy Log Source
//!
//! Partition-offset state core for a checkpointed log source: tracks the
//! last delivered offset per partition, discovers new partitions, snapshots
//! consistent state at checkpoints and restores it, including snapshots
//! written by older releases.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use solidafy_logsource::{MemoryBroker, SourceConfig, SourceConnector, SubtaskInfo, TopicsDescriptor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> solidafy_logsource::Result<()> {
//!     let config = SourceConfig::new(TopicsDescriptor::topics(["orders"]));
//!     let client = Arc::new(MemoryBroker::new());
//!
//!     let mut connector = SourceConnector::with_client(config, SubtaskInfo::single(), client)?;
//!     connector.open().await?;
//!
//!     let mut emit = |record| println!("{record:?}");
//!     connector.run(&mut emit).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SourceConnector                          │
//! │  restore_state → open → run ⇄ snapshot_state → close            │
//! │  notify_checkpoint_complete → commit offsets                    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌───────────────┬──────────────┴──┬────────────────┬──────────────┐
//! │   Registry    │   Discoverer    │    Fetcher     │    State     │
//! ├───────────────┼─────────────────┼────────────────┼──────────────┤
//! │ Ownership     │ Topic list      │ Poll loop      │ OffsetState  │
//! │ Round robin   │ Topic pattern   │ Sentinels      │ Lock         │
//! │               │ New partitions  │ Backoff        │ Codec / store│
//! └───────────────┴─────────────────┴────────────────┴──────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types
pub mod types;

/// Source configuration
pub mod config;

/// Partition identity, ownership and discovery
pub mod partition;

/// Broker client interface
pub mod broker;

/// Offset state, snapshots and migration
pub mod state;

/// Fetch loop
pub mod fetcher;

/// Source connector lifecycle
pub mod connector;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use broker::{BrokerClient, MemoryBroker, Record};
pub use config::{SourceConfig, TopicsDescriptor};
pub use connector::{LifecyclePhase, OffsetCommitMode, SourceConnector};
pub use partition::{Offset, SubtaskInfo, TopicPartition};
pub use state::OffsetState;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
