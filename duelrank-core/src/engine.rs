/// Voting engine: ties the scheduler, the rating updater and the ranking views
/// to a store.
///
/// Every call reads fresh state from the store and keeps nothing between
/// calls except its RNG, so several engines may share one store. Concurrent
/// writers are caught by the store's version check and surface as
/// `RankError::ConcurrentUpdateConflict`; retrying is the caller's business.
use chrono::Utc;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::bradley_terry::estimate_rankings;
use crate::error::{RankError, RankResult};
use crate::monte_carlo::{simulate_rank_uncertainty, TrialBudget};
use crate::pairing::{select_next_pair, PairSelection, PhaseParams};
use crate::rating::apply_vote;
use crate::seen_pairs::VoterProgress;
use crate::store::{ItemStore, SeenPairStore, VoteLog};
use crate::types::{
    Category, EstimateOptions, ItemId, RankingEstimate, RatingRecord, RatingUpdate, Segment,
    ViewOrder, VoteEvent, VoterId,
};

/// Configuration for the voting engine.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    pub phase: PhaseParams,
    /// Votes a voter must cast before the leaderboard unlocks. 0 = always open.
    pub unlock_threshold: u32,
    pub trial_budget: TrialBudget,
}

/// The person casting votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voter {
    pub id: VoterId,
    pub segment: Segment,
}

impl Voter {
    pub fn new(id: impl Into<String>, segment: Segment) -> Self {
        Voter {
            id: VoterId::new(id),
            segment,
        }
    }
}

/// Records as persisted by an accepted vote.
#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub winner: RatingRecord,
    pub loser: RatingRecord,
    pub progress: VoterProgress,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeaderboardEntry {
    /// 1-based rank by Glicko rating, best first, regardless of view order.
    pub rank: usize,
    pub item: ItemId,
    pub url: String,
    pub active: bool,
    pub glicko: f64,
    pub rd: f64,
    pub elo: f64,
    pub comparisons: u32,
    pub wins: u32,
    pub losses: u32,
    pub top_k_probability: f64,
    /// Probability of holding exactly `rank`.
    pub exact_rank_probability: Option<f64>,
    pub median_rank: usize,
}

pub struct VotingEngine<S> {
    store: S,
    config: EngineConfig,
    rng: SmallRng,
}

impl<S> VotingEngine<S>
where
    S: ItemStore + VoteLog + SeenPairStore,
{
    pub fn new(store: S, config: EngineConfig) -> Self {
        VotingEngine {
            store,
            config,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Engine with a fixed RNG seed, for reproducible scheduling and simulation.
    pub fn with_seed(store: S, config: EngineConfig, seed: u64) -> Self {
        VotingEngine {
            store,
            config,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Next pair to show `voter`, or `Exhausted` once they have seen them all.
    pub fn next_pair(&mut self, voter: &Voter) -> RankResult<PairSelection> {
        let items = self.store.fetch_active_items()?;
        let seen = self.store.get_seen_pairs(&voter.id)?;
        let selection = select_next_pair(
            &items,
            &self.config.phase,
            voter.segment,
            &seen,
            &mut self.rng,
        )?;
        debug!(voter = %voter.id, segment = %voter.segment, ?selection, "Pair selected");
        Ok(selection)
    }

    /// Apply one vote: update both records, mark the pair seen, log the event.
    ///
    /// Everything is committed in a single store call. If it fails nothing is
    /// recorded, so the whole vote can be retried.
    pub fn submit_vote(
        &mut self,
        voter: &Voter,
        winner: ItemId,
        loser: ItemId,
    ) -> RankResult<VoteReceipt> {
        if winner == loser {
            return Err(RankError::SameItem(winner));
        }
        let winner_before = self.fetch(winner)?;
        let loser_before = self.fetch(loser)?;

        let (mut winner_after, mut loser_after) =
            apply_vote(&winner_before, &loser_before, voter.segment);
        let event = VoteEvent::new(winner, loser, voter.id.clone(), voter.segment, Utc::now());
        let votes_cast = self.store.commit_vote(
            &[
                RatingUpdate::diff(&winner_before, &winner_after),
                RatingUpdate::diff(&loser_before, &loser_after),
            ],
            event,
        )?;
        winner_after.version += 1;
        loser_after.version += 1;

        info!(
            voter = %voter.id,
            segment = %voter.segment,
            winner,
            loser,
            winner_elo = winner_after.overall.elo,
            loser_elo = loser_after.overall.elo,
            "Vote applied"
        );

        Ok(VoteReceipt {
            winner: winner_after,
            loser: loser_after,
            progress: VoterProgress { votes_cast },
        })
    }

    pub fn leaderboard_unlocked(&self, voter: &VoterId) -> RankResult<bool> {
        let progress = self.store.voter_progress(voter)?;
        Ok(progress.leaderboard_unlocked(self.config.unlock_threshold))
    }

    /// Bradley-Terry ranking of every item over a snapshot of the vote log.
    pub fn rankings(&self, options: &EstimateOptions) -> RankResult<RankingEstimate> {
        let item_ids: Vec<ItemId> = self
            .store
            .fetch_all_items()?
            .iter()
            .map(|r| r.id)
            .collect();
        let votes = self.store.fetch_vote_log(options.segment)?;
        Ok(estimate_rankings(&item_ids, &votes, options))
    }

    /// Glicko leaderboard for one category with Monte Carlo rank probabilities.
    ///
    /// `limit` caps the rows shown; the simulation always covers every item.
    pub fn leaderboard(
        &mut self,
        category: Category,
        view: ViewOrder,
        limit: Option<usize>,
    ) -> RankResult<Vec<LeaderboardEntry>> {
        let mut items = self.store.fetch_all_items()?;
        items.sort_by(|a, b| {
            b.stats(category)
                .glicko
                .partial_cmp(&a.stats(category).glicko)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        let n = items.len();
        let shown = limit.unwrap_or(n).min(n);

        // Best-first rank of each display position.
        let ranks: Vec<usize> = match view {
            ViewOrder::BestFirst => (0..shown).collect(),
            ViewOrder::WorstFirst => (0..shown).map(|i| n - 1 - i).collect(),
        };
        let displayed: Vec<ItemId> = ranks.iter().map(|&r| items[r].id).collect();

        let probabilities = simulate_rank_uncertainty(
            &items,
            &displayed,
            category,
            self.config.trial_budget,
            view,
            &mut self.rng,
        );

        Ok(ranks
            .into_iter()
            .map(|r| {
                let record = &items[r];
                let stats = record.stats(category);
                let odds = &probabilities[r];
                LeaderboardEntry {
                    rank: r + 1,
                    item: record.id,
                    url: record.url.clone(),
                    active: record.active,
                    glicko: stats.glicko,
                    rd: stats.rd,
                    elo: stats.elo,
                    comparisons: stats.comparisons,
                    wins: stats.wins,
                    losses: stats.losses,
                    top_k_probability: odds.top_k_probability,
                    exact_rank_probability: odds.exact_rank_probability,
                    median_rank: odds.median_rank,
                }
            })
            .collect())
    }

    fn fetch(&self, id: ItemId) -> RankResult<RatingRecord> {
        self.store
            .fetch_item(id)?
            .ok_or(RankError::UnknownItem(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::seen_pairs::{total_pairs, SeenPairSet};
    use crate::store::MemoryStore;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn explore_only() -> EngineConfig {
        EngineConfig {
            phase: PhaseParams {
                random_phase_limit: u32::MAX,
                ..PhaseParams::default()
            },
            trial_budget: TrialBudget::Exact(2000),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_first_vote_updates_everything() {
        let store = Arc::new(MemoryStore::with_urls(["a", "b", "c"]));
        let mut engine = VotingEngine::with_seed(store.clone(), explore_only(), 7);
        let voter = Voter::new("alice", Segment::Female);

        let receipt = engine.submit_vote(&voter, 1, 2).unwrap();

        assert_eq!(receipt.winner.overall.elo, 1516.0);
        assert_eq!(receipt.loser.overall.elo, 1484.0);
        assert!(receipt.winner.overall.rd < 350.0);
        assert!(receipt.loser.overall.rd < 350.0);
        assert_eq!(receipt.winner.female.wins, 1);
        assert_eq!(receipt.winner.male.comparisons, 0);
        assert_eq!(receipt.progress.votes_cast, 1);

        // Receipt mirrors what was stored.
        assert_eq!(store.fetch_item(1).unwrap().unwrap(), receipt.winner);
        assert_eq!(store.fetch_item(3).unwrap().unwrap().version, 0);

        let log = store.fetch_vote_log(None).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].winner, 1);
        assert_eq!(log[0].segment, Segment::Female);
        assert!(store.get_seen_pairs(&voter.id).unwrap().contains(2, 1));
    }

    #[test]
    fn test_voter_exhausts_all_pairs() {
        let store = MemoryStore::with_urls(["a", "b", "c", "d", "e"]);
        let config = EngineConfig {
            phase: PhaseParams {
                random_phase_limit: 0,
                partial_random_chance: 0.0,
                ..PhaseParams::default()
            },
            ..EngineConfig::default()
        };
        let mut engine = VotingEngine::with_seed(store, config, 11);
        let voter = Voter::new("bob", Segment::Unspecified);

        let mut shown = HashSet::new();
        loop {
            match engine.next_pair(&voter).unwrap() {
                PairSelection::Pair { pair: (a, b), .. } => {
                    assert!(shown.insert((a.min(b), a.max(b))), "pair shown twice");
                    engine.submit_vote(&voter, a, b).unwrap();
                }
                PairSelection::Exhausted => break,
            }
        }
        assert_eq!(shown.len(), total_pairs(5));

        // A different voter starts fresh.
        let other = Voter::new("carol", Segment::Male);
        assert!(engine.next_pair(&other).unwrap().pair().is_some());
    }

    #[test]
    fn test_invalid_votes_are_rejected() {
        let store = Arc::new(MemoryStore::with_urls(["a", "b"]));
        let mut engine = VotingEngine::with_seed(store.clone(), explore_only(), 1);
        let voter = Voter::new("dave", Segment::Unspecified);

        assert!(matches!(engine.submit_vote(&voter, 1, 1), Err(RankError::SameItem(1))));
        assert!(matches!(engine.submit_vote(&voter, 1, 9), Err(RankError::UnknownItem(9))));
        assert!(store.fetch_vote_log(None).unwrap().is_empty());
        assert_eq!(store.voter_progress(&voter.id).unwrap().votes_cast, 0);
    }

    #[test]
    fn test_next_pair_needs_two_active_items() {
        let store = Arc::new(MemoryStore::with_urls(["a", "b"]));
        store.set_active(2, false).unwrap();
        let mut engine = VotingEngine::with_seed(store, explore_only(), 1);
        let voter = Voter::new("erin", Segment::Unspecified);

        assert!(matches!(
            engine.next_pair(&voter),
            Err(RankError::InsufficientItems { available: 1 })
        ));
    }

    /// Serves each record as it looked on first read, like a replica that
    /// never catches up.
    struct StaleReads {
        inner: MemoryStore,
        snapshots: Mutex<HashMap<ItemId, RatingRecord>>,
    }

    impl ItemStore for StaleReads {
        fn fetch_active_items(&self) -> Result<Vec<RatingRecord>, StoreError> {
            self.inner.fetch_active_items()
        }

        fn fetch_all_items(&self) -> Result<Vec<RatingRecord>, StoreError> {
            self.inner.fetch_all_items()
        }

        fn fetch_item(&self, id: ItemId) -> Result<Option<RatingRecord>, StoreError> {
            let mut snapshots = self.snapshots.lock().unwrap();
            if let Some(record) = snapshots.get(&id) {
                return Ok(Some(record.clone()));
            }
            let record = self.inner.fetch_item(id)?;
            if let Some(r) = &record {
                snapshots.insert(id, r.clone());
            }
            Ok(record)
        }

        fn persist_rating_updates(&self, updates: &[RatingUpdate]) -> RankResult<()> {
            self.inner.persist_rating_updates(updates)
        }

        fn set_active(&self, id: ItemId, active: bool) -> RankResult<()> {
            self.inner.set_active(id, active)
        }
    }

    impl VoteLog for StaleReads {
        fn append_vote_event(&self, event: VoteEvent) -> Result<(), StoreError> {
            self.inner.append_vote_event(event)
        }

        fn commit_vote(&self, updates: &[RatingUpdate], event: VoteEvent) -> RankResult<u32> {
            self.inner.commit_vote(updates, event)
        }

        fn fetch_vote_log(&self, segment: Option<Segment>) -> Result<Vec<VoteEvent>, StoreError> {
            self.inner.fetch_vote_log(segment)
        }
    }

    impl SeenPairStore for StaleReads {
        fn get_seen_pairs(&self, voter: &VoterId) -> Result<SeenPairSet, StoreError> {
            self.inner.get_seen_pairs(voter)
        }

        fn record_seen_pair(
            &self,
            voter: &VoterId,
            a: ItemId,
            b: ItemId,
        ) -> Result<(), StoreError> {
            self.inner.record_seen_pair(voter, a, b)
        }

        fn record_vote_cast(&self, voter: &VoterId) -> Result<u32, StoreError> {
            self.inner.record_vote_cast(voter)
        }

        fn voter_progress(&self, voter: &VoterId) -> Result<VoterProgress, StoreError> {
            self.inner.voter_progress(voter)
        }
    }

    #[test]
    fn test_stale_read_conflict_records_nothing() {
        let store = Arc::new(StaleReads {
            inner: MemoryStore::with_urls(["a", "b", "c"]),
            snapshots: Mutex::new(HashMap::new()),
        });
        let mut engine = VotingEngine::with_seed(store.clone(), explore_only(), 3);
        let voter = Voter::new("frank", Segment::Unspecified);

        engine.submit_vote(&voter, 1, 2).unwrap();
        let err = engine.submit_vote(&voter, 1, 3).unwrap_err();
        assert!(matches!(
            err,
            RankError::ConcurrentUpdateConflict { item: 1, expected: 0, actual: 1 }
        ));

        assert_eq!(store.inner.fetch_vote_log(None).unwrap().len(), 1);
        assert_eq!(store.inner.voter_progress(&voter.id).unwrap().votes_cast, 1);
        assert!(!store.inner.get_seen_pairs(&voter.id).unwrap().contains(1, 3));
        assert_eq!(store.inner.fetch_item(3).unwrap().unwrap().overall.comparisons, 0);
    }

    /// Store whose vote log drops its connection for the next `outages` writes.
    /// Rating and seen-pair writes keep working on their own.
    struct FlakyLog {
        inner: MemoryStore,
        outages: AtomicUsize,
    }

    impl FlakyLog {
        fn log_down(&self) -> Result<(), StoreError> {
            let down = self
                .outages
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if down {
                return Err(StoreError::Unavailable("vote log connection reset".to_string()));
            }
            Ok(())
        }
    }

    impl ItemStore for FlakyLog {
        fn fetch_active_items(&self) -> Result<Vec<RatingRecord>, StoreError> {
            self.inner.fetch_active_items()
        }

        fn fetch_all_items(&self) -> Result<Vec<RatingRecord>, StoreError> {
            self.inner.fetch_all_items()
        }

        fn fetch_item(&self, id: ItemId) -> Result<Option<RatingRecord>, StoreError> {
            self.inner.fetch_item(id)
        }

        fn persist_rating_updates(&self, updates: &[RatingUpdate]) -> RankResult<()> {
            self.inner.persist_rating_updates(updates)
        }

        fn set_active(&self, id: ItemId, active: bool) -> RankResult<()> {
            self.inner.set_active(id, active)
        }
    }

    impl VoteLog for FlakyLog {
        fn append_vote_event(&self, event: VoteEvent) -> Result<(), StoreError> {
            self.log_down()?;
            self.inner.append_vote_event(event)
        }

        fn commit_vote(&self, updates: &[RatingUpdate], event: VoteEvent) -> RankResult<u32> {
            // The transaction aborts before anything lands.
            self.log_down()?;
            self.inner.commit_vote(updates, event)
        }

        fn fetch_vote_log(&self, segment: Option<Segment>) -> Result<Vec<VoteEvent>, StoreError> {
            self.inner.fetch_vote_log(segment)
        }
    }

    impl SeenPairStore for FlakyLog {
        fn get_seen_pairs(&self, voter: &VoterId) -> Result<SeenPairSet, StoreError> {
            self.inner.get_seen_pairs(voter)
        }

        fn record_seen_pair(
            &self,
            voter: &VoterId,
            a: ItemId,
            b: ItemId,
        ) -> Result<(), StoreError> {
            self.inner.record_seen_pair(voter, a, b)
        }

        fn record_vote_cast(&self, voter: &VoterId) -> Result<u32, StoreError> {
            self.inner.record_vote_cast(voter)
        }

        fn voter_progress(&self, voter: &VoterId) -> Result<VoterProgress, StoreError> {
            self.inner.voter_progress(voter)
        }
    }

    #[test]
    fn test_failed_vote_log_write_leaves_no_partial_vote() {
        let store = Arc::new(FlakyLog {
            inner: MemoryStore::with_urls(["a", "b", "c"]),
            outages: AtomicUsize::new(1),
        });
        let mut engine = VotingEngine::with_seed(store.clone(), explore_only(), 4);
        let voter = Voter::new("hank", Segment::Male);

        let err = engine.submit_vote(&voter, 1, 2).unwrap_err();
        assert!(matches!(err, RankError::Persistence(StoreError::Unavailable(_))));

        let winner = store.inner.fetch_item(1).unwrap().unwrap();
        assert_eq!(winner.overall.comparisons, 0);
        assert_eq!(winner.overall.elo, 1500.0);
        assert_eq!(winner.version, 0);
        assert!(store.inner.fetch_vote_log(None).unwrap().is_empty());
        assert!(!store.inner.get_seen_pairs(&voter.id).unwrap().contains(1, 2));
        assert_eq!(store.inner.voter_progress(&voter.id).unwrap().votes_cast, 0);

        // The caller retries the whole vote once the log is back.
        let receipt = engine.submit_vote(&voter, 1, 2).unwrap();
        assert_eq!(receipt.progress.votes_cast, 1);

        let winner = store.inner.fetch_item(1).unwrap().unwrap();
        assert_eq!(winner.overall.comparisons, 1);
        assert_eq!(winner.overall.elo, 1516.0);
        assert_eq!(winner.male.wins, 1);
        assert_eq!(store.inner.fetch_vote_log(None).unwrap().len(), 1);
        assert!(store.inner.get_seen_pairs(&voter.id).unwrap().contains(1, 2));
    }

    #[test]
    fn test_rankings_and_leaderboard_agree_on_dominant_item() {
        let store = Arc::new(MemoryStore::with_urls(["a", "b", "c", "d"]));
        let mut engine = VotingEngine::with_seed(store, explore_only(), 5);

        // 1 > 2 > 3 > 4, each pair voted by several voters, with one upset.
        for v in 0..6 {
            let voter = Voter::new(format!("v{v}"), Segment::Unspecified);
            for (w, l) in [(1, 2), (1, 3), (1, 4), (2, 3), (2, 4), (3, 4)] {
                if v == 0 && (w, l) == (2, 3) {
                    engine.submit_vote(&voter, l, w).unwrap();
                } else {
                    engine.submit_vote(&voter, w, l).unwrap();
                }
            }
        }

        let estimate = engine
            .rankings(&EstimateOptions {
                bootstrap_samples: 0,
                ..EstimateOptions::default()
            })
            .unwrap();
        assert_eq!(estimate.votes_used, 36);
        assert_eq!(estimate.rankings.len(), 4);
        assert_eq!(estimate.rankings[0].item, 1);

        let best = engine
            .leaderboard(Category::Overall, ViewOrder::BestFirst, Some(2))
            .unwrap();
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].item, 1);
        assert_eq!(best[0].rank, 1);
        assert_eq!(best[0].comparisons, 18);
        assert!(best[0].glicko > best[1].glicko);

        let worst = engine
            .leaderboard(Category::Overall, ViewOrder::WorstFirst, None)
            .unwrap();
        assert_eq!(worst.len(), 4);
        assert_eq!(worst[0].item, 4);
        assert_eq!(worst[0].rank, 4);
        assert!(worst.iter().all(|e| e.exact_rank_probability.is_some()));
    }

    #[test]
    fn test_leaderboard_gate() {
        let store = MemoryStore::with_urls(["a", "b", "c"]);
        let config = EngineConfig {
            unlock_threshold: 2,
            ..explore_only()
        };
        let mut engine = VotingEngine::with_seed(store, config, 9);
        let voter = Voter::new("gina", Segment::Male);

        assert!(!engine.leaderboard_unlocked(&voter.id).unwrap());
        engine.submit_vote(&voter, 1, 2).unwrap();
        assert!(!engine.leaderboard_unlocked(&voter.id).unwrap());
        engine.submit_vote(&voter, 3, 2).unwrap();
        assert!(engine.leaderboard_unlocked(&voter.id).unwrap());
    }
}
