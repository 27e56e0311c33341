//! Common types used throughout the log source
//!
//! This module contains shared type definitions used across
//! multiple modules.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// Backoff Config
// ============================================================================

/// Retry backoff settings shared by polling and discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Type of backoff strategy
    #[serde(rename = "type", default)]
    pub backoff_type: BackoffType,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            backoff_type: BackoffType::Exponential,
            initial_ms: default_initial_backoff_ms(),
            max_ms: default_max_backoff_ms(),
        }
    }
}

impl BackoffConfig {
    /// Create a backoff config
    pub fn new(backoff_type: BackoffType, initial: Duration, max: Duration) -> Self {
        Self {
            backoff_type,
            initial_ms: initial.as_millis() as u64,
            max_ms: max.as_millis() as u64,
        }
    }

    /// Calculate backoff delay for a given attempt (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let initial = Duration::from_millis(self.initial_ms);
        let delay = match self.backoff_type {
            BackoffType::Constant => initial,
            BackoffType::Linear => initial.saturating_mul(attempt.saturating_add(1)),
            BackoffType::Exponential => {
                let factor = 2u32.saturating_pow(attempt);
                initial.saturating_mul(factor)
            }
        };

        std::cmp::min(delay, Duration::from_millis(self.max_ms))
    }
}

// ============================================================================
// Startup Mode
// ============================================================================

/// Where a partition starts when there is no restored offset for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// Start from the earliest retained record
    Earliest,
    /// Start after the latest record at resolution time
    Latest,
    /// Start from the offset committed for the consumer group
    #[default]
    GroupOffsets,
    /// Start from explicitly configured offsets
    SpecificOffsets,
}
