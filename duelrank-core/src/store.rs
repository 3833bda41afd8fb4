/// Collaborator interfaces for persistence, and an in-memory implementation.
///
/// The core never retries a failed store call. Implementations take `&self`
/// so one store can be shared between concurrent voters; rating writes use
/// optimistic concurrency on the per-record `version`.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{RankError, RankResult, StoreError};
use crate::seen_pairs::{SeenPairSet, VoterProgress};
use crate::types::{ItemId, RatingRecord, RatingUpdate, Segment, VoteEvent, VoterId};

/// Item and rating persistence.
pub trait ItemStore {
    /// Items currently eligible for pairing.
    fn fetch_active_items(&self) -> Result<Vec<RatingRecord>, StoreError>;

    /// Every item, including deactivated ones.
    fn fetch_all_items(&self) -> Result<Vec<RatingRecord>, StoreError>;

    fn fetch_item(&self, id: ItemId) -> Result<Option<RatingRecord>, StoreError>;

    /// Apply every update or none of them.
    ///
    /// Each update's `expected_version` must match the stored record, otherwise
    /// nothing is written and `RankError::ConcurrentUpdateConflict` is returned.
    /// A successful write bumps each touched record's version by one.
    fn persist_rating_updates(&self, updates: &[RatingUpdate]) -> RankResult<()>;

    fn set_active(&self, id: ItemId, active: bool) -> RankResult<()>;
}

/// Append-only vote history.
pub trait VoteLog {
    fn append_vote_event(&self, event: VoteEvent) -> Result<(), StoreError>;

    /// Commit an accepted vote in one transaction: the rating updates (same
    /// version check as `ItemStore::persist_rating_updates`), the voter's seen
    /// pair, the event itself and the voter's vote count. On any error nothing
    /// is written. Returns the voter's new vote count.
    fn commit_vote(&self, updates: &[RatingUpdate], event: VoteEvent) -> RankResult<u32>;

    /// Consistent snapshot of the log, optionally restricted to one segment.
    fn fetch_vote_log(&self, segment: Option<Segment>) -> Result<Vec<VoteEvent>, StoreError>;
}

/// Per-voter seen pairs and vote counts.
pub trait SeenPairStore {
    fn get_seen_pairs(&self, voter: &VoterId) -> Result<SeenPairSet, StoreError>;

    fn record_seen_pair(&self, voter: &VoterId, a: ItemId, b: ItemId) -> Result<(), StoreError>;

    /// Increment the voter's vote count and return the new count.
    fn record_vote_cast(&self, voter: &VoterId) -> Result<u32, StoreError>;

    fn voter_progress(&self, voter: &VoterId) -> Result<VoterProgress, StoreError>;
}

impl<T: ItemStore + ?Sized> ItemStore for Arc<T> {
    fn fetch_active_items(&self) -> Result<Vec<RatingRecord>, StoreError> {
        (**self).fetch_active_items()
    }

    fn fetch_all_items(&self) -> Result<Vec<RatingRecord>, StoreError> {
        (**self).fetch_all_items()
    }

    fn fetch_item(&self, id: ItemId) -> Result<Option<RatingRecord>, StoreError> {
        (**self).fetch_item(id)
    }

    fn persist_rating_updates(&self, updates: &[RatingUpdate]) -> RankResult<()> {
        (**self).persist_rating_updates(updates)
    }

    fn set_active(&self, id: ItemId, active: bool) -> RankResult<()> {
        (**self).set_active(id, active)
    }
}

impl<T: VoteLog + ?Sized> VoteLog for Arc<T> {
    fn append_vote_event(&self, event: VoteEvent) -> Result<(), StoreError> {
        (**self).append_vote_event(event)
    }

    fn commit_vote(&self, updates: &[RatingUpdate], event: VoteEvent) -> RankResult<u32> {
        (**self).commit_vote(updates, event)
    }

    fn fetch_vote_log(&self, segment: Option<Segment>) -> Result<Vec<VoteEvent>, StoreError> {
        (**self).fetch_vote_log(segment)
    }
}

impl<T: SeenPairStore + ?Sized> SeenPairStore for Arc<T> {
    fn get_seen_pairs(&self, voter: &VoterId) -> Result<SeenPairSet, StoreError> {
        (**self).get_seen_pairs(voter)
    }

    fn record_seen_pair(&self, voter: &VoterId, a: ItemId, b: ItemId) -> Result<(), StoreError> {
        (**self).record_seen_pair(voter, a, b)
    }

    fn record_vote_cast(&self, voter: &VoterId) -> Result<u32, StoreError> {
        (**self).record_vote_cast(voter)
    }

    fn voter_progress(&self, voter: &VoterId) -> Result<VoterProgress, StoreError> {
        (**self).voter_progress(voter)
    }
}

#[derive(Debug, Default)]
struct VoterState {
    seen: SeenPairSet,
    progress: VoterProgress,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<ItemId, RatingRecord>,
    votes: Vec<VoteEvent>,
    voters: HashMap<VoterId, VoterState>,
}

impl MemoryState {
    fn check_versions(&self, updates: &[RatingUpdate]) -> RankResult<()> {
        for update in updates {
            let record = self
                .items
                .get(&update.id)
                .ok_or(RankError::UnknownItem(update.id))?;
            if record.version != update.expected_version {
                return Err(RankError::ConcurrentUpdateConflict {
                    item: update.id,
                    expected: update.expected_version,
                    actual: record.version,
                });
            }
        }
        Ok(())
    }

    fn write_ratings(&mut self, updates: &[RatingUpdate]) {
        for update in updates {
            if let Some(record) = self.items.get_mut(&update.id) {
                for &(category, stats) in &update.buckets {
                    *record.stats_mut(category) = stats;
                }
                record.version += 1;
            }
        }
    }
}

/// Thread-safe in-memory store implementing every collaborator trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Store seeded with fresh records for `urls`, with IDs 1..=n.
    pub fn with_urls<I, U>(urls: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        let items = urls
            .into_iter()
            .zip(1..)
            .map(|(url, id)| (id, RatingRecord::new(id, url)))
            .collect();
        MemoryStore {
            state: Mutex::new(MemoryState {
                items,
                ..MemoryState::default()
            }),
        }
    }

    /// Ingest an item. An existing record with the same ID is replaced.
    pub fn insert_item(&self, record: RatingRecord) -> Result<(), StoreError> {
        self.lock()?.items.insert(record.id, record);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl ItemStore for MemoryStore {
    fn fetch_active_items(&self) -> Result<Vec<RatingRecord>, StoreError> {
        Ok(self.lock()?.items.values().filter(|r| r.active).cloned().collect())
    }

    fn fetch_all_items(&self) -> Result<Vec<RatingRecord>, StoreError> {
        Ok(self.lock()?.items.values().cloned().collect())
    }

    fn fetch_item(&self, id: ItemId) -> Result<Option<RatingRecord>, StoreError> {
        Ok(self.lock()?.items.get(&id).cloned())
    }

    fn persist_rating_updates(&self, updates: &[RatingUpdate]) -> RankResult<()> {
        let mut state = self.lock()?;
        // Validate everything before touching anything.
        state.check_versions(updates)?;
        state.write_ratings(updates);
        Ok(())
    }

    fn set_active(&self, id: ItemId, active: bool) -> RankResult<()> {
        let mut state = self.lock()?;
        let record = state.items.get_mut(&id).ok_or(RankError::UnknownItem(id))?;
        record.active = active;
        record.version += 1;
        Ok(())
    }
}

impl VoteLog for MemoryStore {
    fn append_vote_event(&self, event: VoteEvent) -> Result<(), StoreError> {
        self.lock()?.votes.push(event);
        Ok(())
    }

    fn commit_vote(&self, updates: &[RatingUpdate], event: VoteEvent) -> RankResult<u32> {
        let mut state = self.lock()?;
        state.check_versions(updates)?;
        state.write_ratings(updates);

        let voter = state.voters.entry(event.voter.clone()).or_default();
        voter.seen.insert(event.item_a, event.item_b);
        voter.progress.votes_cast += 1;
        let votes_cast = voter.progress.votes_cast;
        state.votes.push(event);
        Ok(votes_cast)
    }

    fn fetch_vote_log(&self, segment: Option<Segment>) -> Result<Vec<VoteEvent>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .votes
            .iter()
            .filter(|v| segment.is_none_or(|s| s == v.segment))
            .cloned()
            .collect())
    }
}

impl SeenPairStore for MemoryStore {
    fn get_seen_pairs(&self, voter: &VoterId) -> Result<SeenPairSet, StoreError> {
        Ok(self
            .lock()?
            .voters
            .get(voter)
            .map(|v| v.seen.clone())
            .unwrap_or_default())
    }

    fn record_seen_pair(&self, voter: &VoterId, a: ItemId, b: ItemId) -> Result<(), StoreError> {
        self.lock()?.voters.entry(voter.clone()).or_default().seen.insert(a, b);
        Ok(())
    }

    fn record_vote_cast(&self, voter: &VoterId) -> Result<u32, StoreError> {
        let mut state = self.lock()?;
        let entry = state.voters.entry(voter.clone()).or_default();
        entry.progress.votes_cast += 1;
        Ok(entry.progress.votes_cast)
    }

    fn voter_progress(&self, voter: &VoterId) -> Result<VoterProgress, StoreError> {
        Ok(self
            .lock()?
            .voters
            .get(voter)
            .map(|v| v.progress)
            .unwrap_or_default())
    }
}
