//! Offset state tracked per partition
//!
//! One entry per partition ever owned by this subtask.

use crate::partition::{Offset, TopicPartition};
use std::collections::BTreeMap;

/// Mapping from partition to the offset of its last delivered record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetState {
    offsets: BTreeMap<TopicPartition, Offset>,
}

impl OffsetState {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether no partition is tracked
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Offset of a partition
    pub fn get(&self, partition: &TopicPartition) -> Option<Offset> {
        self.offsets.get(partition).copied()
    }

    /// Whether a partition is tracked
    pub fn contains(&self, partition: &TopicPartition) -> bool {
        self.offsets.contains_key(partition)
    }

    /// Set the offset of a partition, replacing any previous entry
    pub fn insert(&mut self, partition: TopicPartition, offset: Offset) {
        self.offsets.insert(partition, offset);
    }

    /// Add a partition unless it is already tracked
    ///
    /// Returns true if the partition was added.
    pub fn add_if_absent(&mut self, partition: TopicPartition, offset: Offset) -> bool {
        if self.offsets.contains_key(&partition) {
            return false;
        }
        self.offsets.insert(partition, offset);
        true
    }

    /// Move a partition to a concrete offset
    ///
    /// A sentinel is always replaced. A concrete offset only moves forward;
    /// returns false if the update was refused.
    pub fn advance(&mut self, partition: &TopicPartition, offset: i64) -> bool {
        let Some(current) = self.offsets.get_mut(partition) else {
            return false;
        };
        match *current {
            Offset::Offset(last) if last > offset => false,
            _ => {
                *current = Offset::Offset(offset);
                true
            }
        }
    }

    /// Iterate over entries in partition order
    pub fn iter(&self) -> impl Iterator<Item = (&TopicPartition, &Offset)> {
        self.offsets.iter()
    }

    /// Tracked partitions in order
    pub fn partitions(&self) -> Vec<TopicPartition> {
        self.offsets.keys().cloned().collect()
    }

    /// Resolved offsets only; sentinel entries are skipped
    pub fn concrete_offsets(&self) -> BTreeMap<TopicPartition, i64> {
        self.offsets
            .iter()
            .filter_map(|(p, o)| o.concrete().map(|offset| (p.clone(), offset)))
            .collect()
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &BTreeMap<TopicPartition, Offset> {
        &self.offsets
    }
}

impl FromIterator<(TopicPartition, Offset)> for OffsetState {
    fn from_iter<I: IntoIterator<Item = (TopicPartition, Offset)>>(iter: I) -> Self {
        Self {
            offsets: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<TopicPartition, Offset>> for OffsetState {
    fn from(offsets: BTreeMap<TopicPartition, Offset>) -> Self {
        Self { offsets }
    }
}

impl<'a> IntoIterator for &'a OffsetState {
    type Item = (&'a TopicPartition, &'a Offset);
    type IntoIter = std::collections::btree_map::Iter<'a, TopicPartition, Offset>;

    fn into_iter(self) -> Self::IntoIter {
        self.offsets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp(topic: &str, partition: i32) -> TopicPartition {
        TopicPartition::new(topic, partition)
    }

    #[test]
    fn test_state_default() {
        let state = OffsetState::new();
        assert!(state.is_empty());
        assert_eq!(state.get(&tp("abc", 0)), None);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut state = OffsetState::new();
        state.insert(tp("abc", 0), Offset::Earliest);

        assert!(state.advance(&tp("abc", 0), 5));
        assert!(state.advance(&tp("abc", 0), 7));
        assert!(!state.advance(&tp("abc", 0), 6));
        assert_eq!(state.get(&tp("abc", 0)), Some(Offset::Offset(7)));

        // untracked partitions are never created implicitly
        assert!(!state.advance(&tp("abc", 1), 1));
        assert!(!state.contains(&tp("abc", 1)));
    }

    #[test]
    fn test_add_if_absent_keeps_existing() {
        let mut state = OffsetState::new();
        state.insert(tp("abc", 0), Offset::Offset(42));

        assert!(!state.add_if_absent(tp("abc", 0), Offset::Earliest));
        assert!(state.add_if_absent(tp("abc", 1), Offset::Earliest));
        assert_eq!(state.get(&tp("abc", 0)), Some(Offset::Offset(42)));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_concrete_offsets_skip_sentinels() {
        let state: OffsetState = [
            (tp("abc", 0), Offset::Offset(3)),
            (tp("abc", 1), Offset::Latest),
        ]
        .into_iter()
        .collect();

        let concrete = state.concrete_offsets();
        assert_eq!(concrete.len(), 1);
        assert_eq!(concrete.get(&tp("abc", 0)), Some(&3));
    }
}
