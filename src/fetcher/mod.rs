//! Fetch module
//!
//! The consume loop that delivers records and advances offsets.
//!
//! # Overview
//!
//! The fetch module provides:
//! - `FetchCoordinator` - trait the connector drives
//! - `BrokerFetcher` - implementation polling a `BrokerClient`
//! - `FetcherConfig` - poll timeout and retry backoff

mod coordinator;

pub use coordinator::{BrokerFetcher, FetchCoordinator, FetcherConfig};

#[cfg(test)]
mod tests;
