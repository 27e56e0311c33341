//! Partition module
//!
//! Identity, ownership and discovery of partitions.
//!
//! # Overview
//!
//! - `TopicPartition` / `Offset` - partition identity and tracked offsets
//! - `PartitionRegistry` - deterministic ownership across parallel subtasks
//! - `PartitionDiscoverer` - lists partitions of the subscribed topics

mod discoverer;
mod registry;
mod types;

pub use discoverer::{BrokerPartitionDiscoverer, DiscovererState, PartitionDiscoverer};
pub use registry::{owner_of, PartitionRegistry, SubtaskInfo};
pub use types::{Offset, TopicPartition};
