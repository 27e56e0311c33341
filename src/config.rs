//! Configuration for the log source
//!
//! `SourceConfig` is loaded from YAML or JSON and consumed at construction.

use crate::error::{Error, Result};
use crate::partition::{Offset, TopicPartition};
use crate::types::{BackoffConfig, StartupMode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Discovery interval value meaning "discover once at open"
pub const DISCOVERY_DISABLED: i64 = i64::MIN;

// ============================================================================
// Topics
// ============================================================================

/// Topics to subscribe to: a fixed list or a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicsDescriptor {
    /// Fixed list of topics
    Topics {
        /// Topic names
        topics: Vec<String>,
    },
    /// Every topic whose whole name matches the pattern
    Pattern {
        /// Regular expression
        #[serde(rename = "topic_pattern")]
        pattern: String,
    },
}

impl TopicsDescriptor {
    /// Subscribe to a fixed topic list
    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Topics {
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    /// Subscribe by pattern
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
        }
    }

    /// Compile the pattern, anchored so it must match the full topic name
    pub fn compile_pattern(&self) -> Result<Regex> {
        match self {
            Self::Pattern { pattern } => Ok(Regex::new(&format!("^(?:{pattern})$"))?),
            Self::Topics { .. } => Err(Error::config("topic list has no pattern")),
        }
    }

    /// Matcher for repeated membership checks; a pattern is compiled once
    pub fn matcher(&self) -> Result<TopicMatcher<'_>> {
        match self {
            Self::Topics { topics } => Ok(TopicMatcher::Topics(topics)),
            Self::Pattern { .. } => Ok(TopicMatcher::Pattern(self.compile_pattern()?)),
        }
    }

    /// Whether `topic` is covered by this subscription
    pub fn is_match(&self, topic: &str) -> bool {
        self.matcher().is_ok_and(|matcher| matcher.is_match(topic))
    }
}

/// Compiled form of a [`TopicsDescriptor`]
#[derive(Debug, Clone)]
pub enum TopicMatcher<'a> {
    /// Explicit topic names
    Topics(&'a [String]),
    /// Anchored pattern
    Pattern(Regex),
}

impl TopicMatcher<'_> {
    /// Whether `topic` is covered
    pub fn is_match(&self, topic: &str) -> bool {
        match self {
            Self::Topics(topics) => topics.iter().any(|t| t == topic),
            Self::Pattern(pattern) => pattern.is_match(topic),
        }
    }
}

// ============================================================================
// Source Config
// ============================================================================

/// An explicitly configured start position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecificOffset {
    /// Topic name
    pub topic: String,
    /// Partition index
    pub partition: i32,
    /// Offset of the first record to read
    pub offset: i64,
}

/// Complete source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Subscribed topics
    #[serde(flatten)]
    pub topics: TopicsDescriptor,

    /// Milliseconds between discovery polls; zero or negative disables
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_ms: i64,

    /// Start position for partitions without restored state
    #[serde(default)]
    pub startup_mode: StartupMode,

    /// Start positions used by `StartupMode::SpecificOffsets`
    #[serde(default)]
    pub specific_offsets: Vec<SpecificOffset>,

    /// Whether the engine takes checkpoints
    #[serde(default)]
    pub checkpointing_enabled: bool,

    /// Whether the broker client commits on its own timer
    #[serde(default)]
    pub auto_commit_enabled: bool,

    /// Upper bound for a single poll
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Consecutive discovery failures tolerated before failing the task
    #[serde(default = "default_max_discovery_attempts")]
    pub max_discovery_attempts: u32,

    /// Backoff for transient poll and discovery failures
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Drop restored partitions whose topic is no longer subscribed
    #[serde(default = "default_true")]
    pub filter_restored_partitions_with_subscribed_topics: bool,
}

fn default_discovery_interval() -> i64 {
    DISCOVERY_DISABLED
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_max_discovery_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    /// Create a config with defaults for the given subscription
    pub fn new(topics: TopicsDescriptor) -> Self {
        Self {
            topics,
            discovery_interval_ms: DISCOVERY_DISABLED,
            startup_mode: StartupMode::default(),
            specific_offsets: Vec::new(),
            checkpointing_enabled: false,
            auto_commit_enabled: false,
            poll_timeout_ms: default_poll_timeout_ms(),
            max_discovery_attempts: default_max_discovery_attempts(),
            backoff: BackoffConfig::default(),
            filter_restored_partitions_with_subscribed_topics: true,
        }
    }

    /// Load from a YAML or JSON file (chosen by extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// Parse from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field values
    pub fn validate(&self) -> Result<()> {
        match &self.topics {
            TopicsDescriptor::Topics { topics } => {
                if topics.is_empty() {
                    return Err(Error::invalid_value("topics", "at least one topic required"));
                }
                if topics.iter().any(String::is_empty) {
                    return Err(Error::invalid_value("topics", "topic names must not be empty"));
                }
            }
            TopicsDescriptor::Pattern { .. } => {
                self.topics.compile_pattern()?;
            }
        }
        if self.poll_timeout_ms == 0 {
            return Err(Error::invalid_value("poll_timeout_ms", "must be positive"));
        }
        if self.max_discovery_attempts == 0 {
            return Err(Error::invalid_value(
                "max_discovery_attempts",
                "must be at least 1",
            ));
        }
        if self.startup_mode == StartupMode::SpecificOffsets && self.specific_offsets.is_empty() {
            return Err(Error::invalid_value(
                "specific_offsets",
                "required when startup_mode is specific_offsets",
            ));
        }
        if let Some(bad) = self.specific_offsets.iter().find(|o| o.offset < 0) {
            return Err(Error::invalid_value(
                "specific_offsets",
                format!("negative offset for {}-{}", bad.topic, bad.partition),
            ));
        }
        Ok(())
    }

    /// Whether periodic discovery is enabled
    pub fn discovery_enabled(&self) -> bool {
        self.discovery_interval_ms > 0
    }

    /// Interval between discovery polls, if enabled
    pub fn discovery_interval(&self) -> Option<Duration> {
        self.discovery_enabled()
            .then(|| Duration::from_millis(self.discovery_interval_ms as u64))
    }

    /// Poll timeout as a duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Start offset for a partition that has no restored state
    ///
    /// Specific offsets name the first record to read, so the stored
    /// "last delivered" offset is one less. Partitions missing from the
    /// specific offsets fall back to the group offset.
    pub fn startup_offset(&self, partition: &TopicPartition) -> Offset {
        match self.startup_mode {
            StartupMode::Earliest => Offset::Earliest,
            StartupMode::Latest => Offset::Latest,
            StartupMode::GroupOffsets => Offset::GroupOffset,
            StartupMode::SpecificOffsets => self
                .specific_offset_map()
                .get(partition)
                .map_or(Offset::GroupOffset, |offset| Offset::Offset(offset - 1)),
        }
    }

    fn specific_offset_map(&self) -> BTreeMap<TopicPartition, i64> {
        self.specific_offsets
            .iter()
            .map(|o| (TopicPartition::new(&o.topic, o.partition), o.offset))
            .collect()
    }
}
