/// Simulated voting sessions.
///
/// Synthetic voters with hidden tastes vote through the real engine. Each
/// voter runs on the blocking pool with its own engine, all sharing one
/// store, so rating writes race exactly as concurrent clients would.
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use duelrank_core::monte_carlo::standard_normal;
use duelrank_core::{
    Category, EngineConfig, ItemId, ItemStore, MemoryStore, PairSelection, RankError, Segment,
    SeenPairStore, VoteLog, Voter, VotingEngine,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

/// Hidden appeal of every item: a shared base plus a per-segment offset.
#[derive(Debug, Clone)]
pub struct HiddenTastes {
    base: HashMap<ItemId, f64>,
    male: HashMap<ItemId, f64>,
    female: HashMap<ItemId, f64>,
}

impl HiddenTastes {
    /// Base appeal ~ N(0, spread), segment offsets ~ N(0, segment_spread).
    pub fn sample<R: Rng + ?Sized>(
        ids: &[ItemId],
        spread: f64,
        segment_spread: f64,
        rng: &mut R,
    ) -> Self {
        let mut draw = |scale: f64| -> HashMap<ItemId, f64> {
            ids.iter().map(|&id| (id, scale * standard_normal(&mut *rng))).collect()
        };
        let base = draw(spread);
        let male = draw(segment_spread);
        let female = draw(segment_spread);
        HiddenTastes { base, male, female }
    }

    /// Tastes every segment shares.
    pub fn from_appeal(base: HashMap<ItemId, f64>) -> Self {
        HiddenTastes {
            base,
            male: HashMap::new(),
            female: HashMap::new(),
        }
    }

    pub fn appeal(&self, id: ItemId, category: Category) -> f64 {
        let base = self.base.get(&id).copied().unwrap_or(0.0);
        let offset = match category {
            Category::Overall => 0.0,
            Category::Male => self.male.get(&id).copied().unwrap_or(0.0),
            Category::Female => self.female.get(&id).copied().unwrap_or(0.0),
        };
        base + offset
    }

    /// Chance that a voter of `segment` prefers `a` over `b`.
    pub fn win_probability(&self, a: ItemId, b: ItemId, segment: Segment) -> f64 {
        let category = segment.active_category();
        let diff = self.appeal(a, category) - self.appeal(b, category);
        1.0 / (1.0 + (-diff).exp())
    }

    /// 1-based rank of every item by appeal within `category`.
    pub fn true_ranks(&self, category: Category) -> HashMap<ItemId, usize> {
        let mut ids: Vec<ItemId> = self.base.keys().copied().collect();
        ids.sort_by(|&a, &b| {
            self.appeal(b, category)
                .partial_cmp(&self.appeal(a, category))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        ids.into_iter().enumerate().map(|(i, id)| (id, i + 1)).collect()
    }
}

/// Voters with a random mix of declared segments.
pub fn make_voters<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Voter> {
    (0..count)
        .map(|i| {
            let segment = match rng.random_range(0..5) {
                0 | 1 => Segment::Male,
                2 | 3 => Segment::Female,
                _ => Segment::Unspecified,
            };
            Voter::new(format!("voter-{:03}", i + 1), segment)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Applied { retries: usize },
    /// Every attempt lost the version race.
    Dropped { retries: usize },
}

/// Submit a vote, re-reading and retrying on version conflicts.
pub fn submit_with_retry<S>(
    engine: &mut VotingEngine<S>,
    voter: &Voter,
    winner: ItemId,
    loser: ItemId,
    max_retries: usize,
) -> Result<VoteOutcome>
where
    S: ItemStore + VoteLog + SeenPairStore,
{
    let mut retries = 0;
    loop {
        match engine.submit_vote(voter, winner, loser) {
            Ok(_) => return Ok(VoteOutcome::Applied { retries }),
            Err(RankError::ConcurrentUpdateConflict { item, .. }) if retries < max_retries => {
                retries += 1;
                debug!(voter = %voter.id, item, retries, "Version conflict, retrying vote");
            }
            Err(RankError::ConcurrentUpdateConflict { item, .. }) => {
                warn!(voter = %voter.id, item, retries, "Dropping vote after repeated conflicts");
                return Ok(VoteOutcome::Dropped { retries });
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub votes: usize,
    pub conflicts_retried: usize,
    pub votes_dropped: usize,
    /// Voters who ran out of unseen pairs.
    pub exhausted_voters: usize,
}

impl std::ops::AddAssign for SessionStats {
    fn add_assign(&mut self, other: Self) {
        self.votes += other.votes;
        self.conflicts_retried += other.conflicts_retried;
        self.votes_dropped += other.votes_dropped;
        self.exhausted_voters += other.exhausted_voters;
    }
}

/// One voter casting up to `votes` votes.
fn cast_votes(
    store: Arc<MemoryStore>,
    config: EngineConfig,
    tastes: &HiddenTastes,
    voter: &Voter,
    votes: usize,
    max_retries: usize,
    seed: u64,
) -> Result<SessionStats> {
    let mut engine = VotingEngine::with_seed(store, config, seed);
    let mut rng = SmallRng::seed_from_u64(seed.rotate_left(32));
    let mut stats = SessionStats::default();

    for _ in 0..votes {
        let (left, right) = match engine.next_pair(voter)? {
            PairSelection::Pair { pair, .. } => pair,
            PairSelection::Exhausted => {
                stats.exhausted_voters += 1;
                break;
            }
        };
        let p_left = tastes.win_probability(left, right, voter.segment);
        let (winner, loser) = if rng.random::<f64>() < p_left {
            (left, right)
        } else {
            (right, left)
        };
        match submit_with_retry(&mut engine, voter, winner, loser, max_retries)? {
            VoteOutcome::Applied { retries } => {
                stats.votes += 1;
                stats.conflicts_retried += retries;
            }
            VoteOutcome::Dropped { retries } => {
                stats.votes_dropped += 1;
                stats.conflicts_retried += retries;
            }
        }
    }
    Ok(stats)
}

/// Every voter casts `votes_each` votes concurrently.
pub async fn run_round(
    store: &Arc<MemoryStore>,
    config: &EngineConfig,
    tastes: &Arc<HiddenTastes>,
    voters: &[Voter],
    votes_each: usize,
    max_retries: usize,
    seed: u64,
) -> Result<SessionStats> {
    let mut handles = Vec::with_capacity(voters.len());
    for (i, voter) in voters.iter().enumerate() {
        let store = store.clone();
        let config = config.clone();
        let tastes = tastes.clone();
        let voter = voter.clone();
        let voter_seed = seed.wrapping_add((i as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        handles.push(tokio::task::spawn_blocking(move || {
            cast_votes(store, config, &tastes, &voter, votes_each, max_retries, voter_seed)
        }));
    }

    let mut stats = SessionStats::default();
    for handle in handles {
        stats += handle.await.context("Voter task panicked")??;
    }
    Ok(stats)
}
