/// Per-voter record of pairs already shown, plus the voter's vote count.
use std::collections::HashSet;

use crate::types::{ItemId, PairKey};

/// Set of canonical pairs a single voter has already been shown.
///
/// Only grows. Insertion order is irrelevant: (A, B) and (B, A) are one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeenPairSet {
    pairs: HashSet<PairKey>,
}

impl SeenPairSet {
    pub fn new() -> Self {
        SeenPairSet::default()
    }

    /// Returns `true` if the pair was not seen before.
    pub fn insert(&mut self, a: ItemId, b: ItemId) -> bool {
        self.pairs.insert(PairKey::new(a, b))
    }

    pub fn contains(&self, a: ItemId, b: ItemId) -> bool {
        self.pairs.contains(&PairKey::new(a, b))
    }

    pub fn contains_key(&self, key: &PairKey) -> bool {
        self.pairs.contains(key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PairKey> {
        self.pairs.iter()
    }
}

impl FromIterator<PairKey> for SeenPairSet {
    fn from_iter<I: IntoIterator<Item = PairKey>>(iter: I) -> Self {
        SeenPairSet {
            pairs: iter.into_iter().collect(),
        }
    }
}

/// Votes cast by one voter, used to gate access to the leaderboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoterProgress {
    pub votes_cast: u32,
}

impl VoterProgress {
    pub fn leaderboard_unlocked(&self, unlock_threshold: u32) -> bool {
        self.votes_cast >= unlock_threshold
    }

    pub fn remaining_votes(&self, unlock_threshold: u32) -> u32 {
        unlock_threshold.saturating_sub(self.votes_cast)
    }
}

/// Number of distinct unordered pairs among `n` items.
pub fn total_pairs(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_order_independent() {
        let mut seen = SeenPairSet::new();
        assert!(seen.insert(1, 2));
        assert!(!seen.insert(2, 1));
        assert!(seen.contains(2, 1));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_total_pairs() {
        assert_eq!(total_pairs(0), 0);
        assert_eq!(total_pairs(1), 0);
        assert_eq!(total_pairs(2), 1);
        assert_eq!(total_pairs(5), 10);
    }

    #[test]
    fn test_leaderboard_gate() {
        let progress = VoterProgress { votes_cast: 3 };
        assert!(progress.leaderboard_unlocked(0));
        assert!(!progress.leaderboard_unlocked(10));
        assert_eq!(progress.remaining_votes(10), 7);
        assert_eq!(progress.remaining_votes(2), 0);
    }
}
