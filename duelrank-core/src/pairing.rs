/// Pair scheduling for interactive voting.
///
/// Each call decides between two phases:
///   EXPLORE: uniform pick among the voter's unseen pairs. Used until enough
///            votes exist, and afterwards with a small probability.
///   ADAPT:   prefer pairs with an under-compared item, then pairs of close
///            rating that do not involve a settled bottom item, then anything.
///
/// A voter is never shown the same unordered pair twice. When every pair of
/// active items has been shown the scheduler reports exhaustion.
use std::collections::HashSet;

use rand::Rng;
use tracing::debug;

use crate::constants::{
    DEFAULT_BOTTOM_EXCLUSION_COUNT, DEFAULT_EXCLUSION_MIN_COMPARISONS,
    DEFAULT_PARTIAL_RANDOM_CHANCE, DEFAULT_RANDOM_PHASE_LIMIT, DEFAULT_RATING_DIFF_THRESHOLD,
    DEFAULT_UNDER_COMPARISON_THRESHOLD, MAX_RANDOM_ATTEMPTS,
};
use crate::error::{RankError, RankResult};
use crate::seen_pairs::SeenPairSet;
use crate::types::{Category, Pair, RatingMetric, RatingRecord, Segment};

/// Scheduler policy knobs.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseParams {
    /// Votes (in the active bucket) before adaptive selection kicks in.
    pub random_phase_limit: u32,
    /// Maximum rating gap for a "close" pair.
    pub rating_diff_threshold: f64,
    /// Probability of a uniform pick even in the adaptive phase.
    pub partial_random_chance: f64,
    pub under_comparison_threshold: u32,
    /// Size of the bottom group considered for exclusion.
    pub bottom_exclusion_count: usize,
    /// Bottom items with at least this many comparisons are treated as settled.
    pub exclusion_min_comparisons: u32,
    pub metric: RatingMetric,
}

impl Default for PhaseParams {
    fn default() -> Self {
        PhaseParams {
            random_phase_limit: DEFAULT_RANDOM_PHASE_LIMIT,
            rating_diff_threshold: DEFAULT_RATING_DIFF_THRESHOLD,
            partial_random_chance: DEFAULT_PARTIAL_RANDOM_CHANCE,
            under_comparison_threshold: DEFAULT_UNDER_COMPARISON_THRESHOLD,
            bottom_exclusion_count: DEFAULT_BOTTOM_EXCLUSION_COUNT,
            exclusion_min_comparisons: DEFAULT_EXCLUSION_MIN_COMPARISONS,
            metric: RatingMetric::Glicko,
        }
    }
}

/// Which rule produced a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    Explore,
    UnderCompared,
    CloseRating,
    Fallback,
}

/// Scheduler output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSelection {
    Pair { pair: Pair, phase: Phase },
    /// The voter has seen every pair of active items.
    Exhausted,
}

impl PairSelection {
    pub fn pair(&self) -> Option<Pair> {
        match self {
            PairSelection::Pair { pair, .. } => Some(*pair),
            PairSelection::Exhausted => None,
        }
    }
}

/// Pick the next pair to show a voter.
///
/// Inactive records in `items` are ignored. Ratings and comparison counts are
/// read from the voter segment's bucket (overall for an unspecified segment).
pub fn select_next_pair<R: Rng + ?Sized>(
    items: &[RatingRecord],
    params: &PhaseParams,
    segment: Segment,
    seen: &SeenPairSet,
    rng: &mut R,
) -> RankResult<PairSelection> {
    let active: Vec<&RatingRecord> = items.iter().filter(|r| r.active).collect();
    if active.len() < 2 {
        return Err(RankError::InsufficientItems {
            available: active.len(),
        });
    }

    let category = segment.active_category();
    let total_votes = active
        .iter()
        .map(|r| u64::from(r.stats(category).comparisons))
        .sum::<u64>()
        / 2;

    let explore = total_votes < u64::from(params.random_phase_limit)
        || rng.random::<f64>() < params.partial_random_chance;

    let selection = if explore {
        select_explore(&active, seen, rng)
    } else {
        select_adaptive(&active, params, category, seen, rng)
    };

    match selection {
        Some((a, b, phase)) => {
            let (left, right) = if rng.random::<f64>() < 0.5 {
                (active[a].id, active[b].id)
            } else {
                (active[b].id, active[a].id)
            };
            debug!(?phase, total_votes, left, right, %segment, "Selected pair");
            Ok(PairSelection::Pair {
                pair: (left, right),
                phase,
            })
        }
        None => {
            debug!(%segment, seen = seen.len(), "All pairs exhausted for voter");
            Ok(PairSelection::Exhausted)
        }
    }
}

type IndexedChoice = (usize, usize, Phase);

/// Uniform pick among unseen pairs.
///
/// Rejection sampling is uniform over unseen pairs and cheap while most pairs
/// are unseen; after `MAX_RANDOM_ATTEMPTS` misses we scan every pair instead.
fn select_explore<R: Rng + ?Sized>(
    active: &[&RatingRecord],
    seen: &SeenPairSet,
    rng: &mut R,
) -> Option<IndexedChoice> {
    let n = active.len();
    for _ in 0..MAX_RANDOM_ATTEMPTS {
        let a = rng.random_range(0..n);
        let mut b = rng.random_range(0..n - 1);
        if b >= a {
            b += 1;
        }
        if !seen.contains(active[a].id, active[b].id) {
            return Some((a, b, Phase::Explore));
        }
    }

    let candidates = unseen_pairs(active, seen);
    pick(&candidates, rng).map(|(a, b)| (a, b, Phase::Explore))
}

fn select_adaptive<R: Rng + ?Sized>(
    active: &[&RatingRecord],
    params: &PhaseParams,
    category: Category,
    seen: &SeenPairSet,
    rng: &mut R,
) -> Option<IndexedChoice> {
    let candidates = unseen_pairs(active, seen);
    if candidates.is_empty() {
        return None;
    }

    let comparisons = |i: usize| active[i].stats(category).comparisons;
    let rating = |i: usize| active[i].stats(category).rating(params.metric);
    let is_close = |&(a, b): &(usize, usize)| {
        (rating(a) - rating(b)).abs() <= params.rating_diff_threshold
    };

    // Under-compared items first, so new or rarely shown photos get coverage.
    let priority: Vec<(usize, usize)> = candidates
        .iter()
        .copied()
        .filter(|&(a, b)| {
            comparisons(a) < params.under_comparison_threshold
                || comparisons(b) < params.under_comparison_threshold
        })
        .collect();

    if !priority.is_empty() {
        let close: Vec<(usize, usize)> = priority.iter().copied().filter(is_close).collect();
        let (a, b) = pick(&close, rng).or_else(|| pick(&priority, &mut *rng))?;
        return Some((a, b, Phase::UnderCompared));
    }

    let excluded = converged_bottom(active, params, category);
    let close: Vec<(usize, usize)> = candidates
        .iter()
        .copied()
        .filter(|&(a, b)| !excluded.contains(&a) && !excluded.contains(&b))
        .filter(is_close)
        .collect();

    if let Some((a, b)) = pick(&close, rng) {
        return Some((a, b, Phase::CloseRating));
    }

    pick(&candidates, rng).map(|(a, b)| (a, b, Phase::Fallback))
}

/// Indices of the lowest-rated items that already have enough comparisons.
fn converged_bottom(
    active: &[&RatingRecord],
    params: &PhaseParams,
    category: Category,
) -> HashSet<usize> {
    let mut by_rating: Vec<usize> = (0..active.len()).collect();
    by_rating.sort_by(|&a, &b| {
        let ra = active[a].stats(category).rating(params.metric);
        let rb = active[b].stats(category).rating(params.metric);
        ra.partial_cmp(&rb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(active[a].id.cmp(&active[b].id))
    });

    by_rating
        .into_iter()
        .take(params.bottom_exclusion_count)
        .filter(|&i| active[i].stats(category).comparisons >= params.exclusion_min_comparisons)
        .collect()
}

fn unseen_pairs(active: &[&RatingRecord], seen: &SeenPairSet) -> Vec<(usize, usize)> {
    let n = active.len();
    let mut pairs = Vec::new();
    for a in 0..n {
        for b in (a + 1)..n {
            if !seen.contains(active[a].id, active[b].id) {
                pairs.push((a, b));
            }
        }
    }
    pairs
}

fn pick<R: Rng + ?Sized>(pairs: &[(usize, usize)], rng: &mut R) -> Option<(usize, usize)> {
    if pairs.is_empty() {
        None
    } else {
        Some(pairs[rng.random_range(0..pairs.len())])
    }
}
