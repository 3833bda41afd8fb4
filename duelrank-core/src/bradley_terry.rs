/// Bradley-Terry strengths from the vote log, fit with the MM algorithm.
///
/// P(i beats j) = s_i / (s_i + s_j). Rank uncertainty comes from a bootstrap:
/// the log is resampled with replacement, refit, and the rank each item lands
/// on is counted.
use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::INITIAL_BRADLEY_TERRY_STRENGTH;
use crate::types::{EstimateOptions, IdMap, ItemId, RankedItem, RankingEstimate, VoteEvent};

/// Internal indexed outcome: (winner index, loser index).
type IndexedOutcome = (usize, usize);

pub(crate) struct BradleyTerry {
    num_items: usize,
    /// Sparse game counts: games_table[i] maps opponent index -> games between i and opponent.
    games_table: Vec<HashMap<usize, f64>>,
    /// Total wins per item (precomputed for efficiency).
    total_wins: Vec<f64>,
    pub strengths: Vec<f64>,
}

/// How an MM run ended.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MmOutcome {
    pub iterations: usize,
    pub converged: bool,
}

impl BradleyTerry {
    pub fn new(num_items: usize, outcomes: &[IndexedOutcome]) -> Self {
        let mut games_table: Vec<HashMap<usize, f64>> =
            (0..num_items).map(|_| HashMap::new()).collect();
        let mut total_wins = vec![0.0; num_items];

        for &(winner, loser) in outcomes {
            assert!(winner < num_items && loser < num_items, "outcome index out of range");
            total_wins[winner] += 1.0;
            *games_table[winner].entry(loser).or_insert(0.0) += 1.0;
            *games_table[loser].entry(winner).or_insert(0.0) += 1.0;
        }

        BradleyTerry {
            num_items,
            games_table,
            total_wins,
            strengths: vec![INITIAL_BRADLEY_TERRY_STRENGTH; num_items],
        }
    }

    fn has_games(&self, i: usize) -> bool {
        !self.games_table[i].is_empty()
    }

    fn run_iteration(&mut self) {
        let mut new_strengths = self.strengths.clone();

        for i in 0..self.num_items {
            if !self.has_games(i) {
                continue;
            }

            let strength_i = self.strengths[i];
            let mut denominator = 0.0;

            // Only opponents actually faced contribute.
            for (&j, &games) in &self.games_table[i] {
                let pair_sum = strength_i + self.strengths[j];
                if pair_sum > 0.0 {
                    denominator += games / pair_sum;
                }
            }

            if denominator > 0.0 {
                new_strengths[i] = self.total_wins[i] / denominator;
            }
        }

        self.strengths = new_strengths;
    }

    /// Scale strengths so they sum to the item count.
    ///
    /// Items without games stay at their initial strength; the compared items
    /// share the remaining mass.
    fn normalize(&mut self) {
        let idle = (0..self.num_items).filter(|&i| !self.has_games(i)).count();
        let active_sum: f64 = (0..self.num_items)
            .filter(|&i| self.has_games(i))
            .map(|i| self.strengths[i])
            .sum();

        if active_sum <= 0.0 {
            return;
        }

        let target = (self.num_items - idle) as f64;
        let scale = target / active_sum;
        for i in 0..self.num_items {
            if self.has_games(i) {
                self.strengths[i] *= scale;
            }
        }
    }

    /// Iterate MM until the largest change drops below `tolerance` or the cap is hit.
    pub fn calculate_strengths(&mut self, max_iterations: usize, tolerance: f64) -> MmOutcome {
        self.normalize();
        for iteration in 1..=max_iterations {
            let old = self.strengths.clone();
            self.run_iteration();
            self.normalize();

            let max_change = self
                .strengths
                .iter()
                .zip(old.iter())
                .map(|(new, old)| (new - old).abs())
                .fold(0.0_f64, f64::max);

            if max_change < tolerance {
                return MmOutcome {
                    iterations: iteration,
                    converged: true,
                };
            }
        }
        MmOutcome {
            iterations: max_iterations,
            converged: false,
        }
    }

    pub fn wins(&self, i: usize) -> u32 {
        self.total_wins[i] as u32
    }

    pub fn games(&self, i: usize) -> u32 {
        self.games_table[i].values().sum::<f64>() as u32
    }
}

/// Rank position of every index: strongest first, ties broken by item ID.
fn rank_positions(strengths: &[f64], id_map: &IdMap) -> Vec<usize> {
    let mut order: Vec<usize> = (0..strengths.len()).collect();
    order.sort_by(|&a, &b| {
        strengths[b]
            .partial_cmp(&strengths[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(id_map.to_id(a).cmp(&id_map.to_id(b)))
    });

    let mut positions = vec![0; strengths.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        positions[idx] = rank;
    }
    positions
}

/// Fit Bradley-Terry strengths and bootstrap rank probabilities.
///
/// `item_ids` lists items that should appear even if the log never mentions
/// them; IDs found only in the log are added automatically.
pub fn estimate_rankings(
    item_ids: &[ItemId],
    votes: &[VoteEvent],
    options: &EstimateOptions,
) -> RankingEstimate {
    estimate_rankings_cancellable(item_ids, votes, options, &CancellationToken::new())
        .expect("a fresh token is never cancelled")
}

/// Same as `estimate_rankings`, but returns `None` once `cancel` is cancelled.
pub fn estimate_rankings_cancellable(
    item_ids: &[ItemId],
    votes: &[VoteEvent],
    options: &EstimateOptions,
    cancel: &CancellationToken,
) -> Option<RankingEstimate> {
    let mut id_map = IdMap::new();
    for &id in item_ids {
        id_map.insert(id);
    }

    let mut outcomes: Vec<IndexedOutcome> = Vec::with_capacity(votes.len());
    let mut malformed = 0usize;
    for vote in votes {
        if options.segment.is_some_and(|s| s != vote.segment) {
            continue;
        }
        let winner_in_pair = vote.winner == vote.item_a || vote.winner == vote.item_b;
        if vote.item_a == vote.item_b || !winner_in_pair {
            malformed += 1;
            continue;
        }
        let winner = id_map.insert(vote.winner);
        let loser = id_map.insert(vote.loser());
        outcomes.push((winner, loser));
    }
    if malformed > 0 {
        warn!(malformed, "Skipped malformed vote events");
    }

    let num_items = id_map.len();
    let distinct_voted = {
        let mut seen = vec![false; num_items];
        for &(w, l) in &outcomes {
            seen[w] = true;
            seen[l] = true;
        }
        seen.into_iter().filter(|&s| s).count()
    };

    let mut bt = BradleyTerry::new(num_items, &outcomes);

    if distinct_voted < 2 {
        let positions = rank_positions(&bt.strengths, &id_map);
        return Some(RankingEstimate {
            rankings: build_rankings(&bt, &id_map, &positions, None),
            votes_used: outcomes.len(),
            iterations: 0,
            converged: true,
            bootstrap_samples: 0,
        });
    }

    let outcome = bt.calculate_strengths(options.max_iterations, options.tolerance);
    if !outcome.converged {
        warn!(
            iterations = outcome.iterations,
            "Bradley-Terry MM hit the iteration cap; using last estimate"
        );
    }
    let positions = rank_positions(&bt.strengths, &id_map);

    let probabilities = if options.bootstrap_samples > 0 {
        let mut rng = match options.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Some(bootstrap(num_items, &outcomes, &positions, &id_map, options, cancel, &mut rng)?)
    } else {
        None
    };

    info!(
        items = num_items,
        votes = outcomes.len(),
        iterations = outcome.iterations,
        bootstrap_samples = options.bootstrap_samples,
        "Bradley-Terry estimate complete"
    );

    Some(RankingEstimate {
        rankings: build_rankings(&bt, &id_map, &positions, probabilities.as_ref()),
        votes_used: outcomes.len(),
        iterations: outcome.iterations,
        converged: outcome.converged,
        bootstrap_samples: if probabilities.is_some() { options.bootstrap_samples } else { 0 },
    })
}

/// Per-index (P(top K), P(exact original rank)).
type BootstrapProbabilities = Vec<(f64, f64)>;

fn bootstrap(
    num_items: usize,
    outcomes: &[IndexedOutcome],
    original_positions: &[usize],
    id_map: &IdMap,
    options: &EstimateOptions,
    cancel: &CancellationToken,
    rng: &mut impl Rng,
) -> Option<BootstrapProbabilities> {
    let mut top_k_counts = vec![0usize; num_items];
    let mut exact_counts = vec![0usize; num_items];
    let mut unconverged = 0usize;
    let mut resample: Vec<IndexedOutcome> = Vec::with_capacity(outcomes.len());

    for _ in 0..options.bootstrap_samples {
        if cancel.is_cancelled() {
            debug!("Bootstrap cancelled");
            return None;
        }

        resample.clear();
        resample.extend((0..outcomes.len()).map(|_| outcomes[rng.random_range(0..outcomes.len())]));

        let mut bt = BradleyTerry::new(num_items, &resample);
        if !bt.calculate_strengths(options.max_iterations, options.tolerance).converged {
            unconverged += 1;
        }

        let positions = rank_positions(&bt.strengths, id_map);
        for i in 0..num_items {
            if positions[i] < options.top_k {
                top_k_counts[i] += 1;
            }
            if positions[i] == original_positions[i] {
                exact_counts[i] += 1;
            }
        }
    }

    if unconverged > 0 {
        debug!(unconverged, "Bootstrap fits hit the iteration cap");
    }

    let samples = options.bootstrap_samples as f64;
    Some(
        (0..num_items)
            .map(|i| (top_k_counts[i] as f64 / samples, exact_counts[i] as f64 / samples))
            .collect(),
    )
}

fn build_rankings(
    bt: &BradleyTerry,
    id_map: &IdMap,
    positions: &[usize],
    probabilities: Option<&BootstrapProbabilities>,
) -> Vec<RankedItem> {
    let mut rankings: Vec<RankedItem> = (0..id_map.len())
        .map(|i| RankedItem {
            item: id_map.to_id(i),
            rank: positions[i],
            strength: bt.strengths[i],
            wins: bt.wins(i),
            comparisons: bt.games(i),
            top_k_probability: probabilities.map(|p| p[i].0),
            exact_rank_probability: probabilities.map(|p| p[i].1),
        })
        .collect();
    rankings.sort_by_key(|r| r.rank);
    rankings
}
