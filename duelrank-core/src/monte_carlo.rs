/// Monte Carlo rank uncertainty over Glicko rating distributions.
///
/// Each trial draws every item's "true strength" from N(rating, RD), sorts the
/// draws, and adds one count to a per-item per-rank histogram.
use std::collections::HashMap;

use rand::Rng;
use tracing::debug;

use crate::constants::{CONSTRAINED_MONTE_CARLO_TRIALS, DEFAULT_MONTE_CARLO_TRIALS, TOP_K};
use crate::types::{Category, ItemId, RankProbability, RatingRecord, ViewOrder};

/// How many trials to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrialBudget {
    #[default]
    Full,
    /// Low-power clients.
    Constrained,
    Exact(usize),
}

impl TrialBudget {
    pub fn trials(self) -> usize {
        match self {
            TrialBudget::Full => DEFAULT_MONTE_CARLO_TRIALS,
            TrialBudget::Constrained => CONSTRAINED_MONTE_CARLO_TRIALS,
            TrialBudget::Exact(n) => n,
        }
    }
}

/// Standard normal draw via the Box-Muller transform.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // 1 - U keeps u1 in (0, 1] so ln() stays finite.
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Per-item P(top 5), P(displayed rank) and median rank.
///
/// `items` is the full field being ranked; `displayed` is the ranked subset the
/// caller shows, in display order. For a worst-first view, display position
/// `i` corresponds to rank `n - 1 - i`. Results follow the order of `items`.
pub fn simulate_rank_uncertainty<R: Rng + ?Sized>(
    items: &[RatingRecord],
    displayed: &[ItemId],
    category: Category,
    budget: TrialBudget,
    view: ViewOrder,
    rng: &mut R,
) -> Vec<RankProbability> {
    let n = items.len();
    let trials = budget.trials();

    let mut rank_counts = vec![vec![0u32; n]; n];
    let mut samples: Vec<(f64, usize)> = Vec::with_capacity(n);

    for _ in 0..trials {
        samples.clear();
        samples.extend(items.iter().enumerate().map(|(idx, item)| {
            let stats = item.stats(category);
            (stats.glicko + stats.rd * standard_normal(&mut *rng), idx)
        }));
        samples.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        for (rank, &(_, idx)) in samples.iter().enumerate() {
            rank_counts[idx][rank] += 1;
        }
    }

    let displayed_rank: HashMap<ItemId, usize> = displayed
        .iter()
        .enumerate()
        .map(|(i, &id)| match view {
            ViewOrder::BestFirst => (id, i),
            ViewOrder::WorstFirst => (id, n.saturating_sub(1 + i)),
        })
        .collect();

    debug!(items = n, trials, %category, "Monte Carlo simulation complete");

    let denominator = trials.max(1) as f64;
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let counts = &rank_counts[idx];
            let top: u32 = counts.iter().take(TOP_K).sum();
            RankProbability {
                item: item.id,
                top_k_probability: top as f64 / denominator,
                exact_rank_probability: displayed_rank
                    .get(&item.id)
                    .filter(|&&rank| rank < n)
                    .map(|&rank| counts[rank] as f64 / denominator),
                median_rank: median_rank(counts, trials),
            }
        })
        .collect()
}

/// 1-based rank at which the cumulative count first reaches half the trials.
fn median_rank(counts: &[u32], trials: usize) -> usize {
    let half = trials as f64 / 2.0;
    let mut cumulative = 0u64;
    for (rank, &count) in counts.iter().enumerate() {
        if cumulative as f64 >= half {
            return rank;
        }
        cumulative += u64::from(count);
    }
    counts.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    fn item(id: ItemId, glicko: f64, rd: f64) -> RatingRecord {
        let mut r = RatingRecord::new(id, format!("{id}.jpg"));
        r.overall.glicko = glicko;
        r.overall.rd = rd;
        r
    }

    #[test]
    fn test_standard_normal_moments() {
        let mut rng = SmallRng::seed_from_u64(99);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| standard_normal(&mut rng)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "var {var}");
    }

    #[test]
    fn test_well_separated_items_are_certain() {
        let mut rng = SmallRng::seed_from_u64(1);
        let items: Vec<RatingRecord> =
            (0..8).map(|i| item(i, 3000.0 - 300.0 * i as f64, 30.0)).collect();
        let displayed: Vec<ItemId> = (0..8).collect();

        let result = simulate_rank_uncertainty(
            &items,
            &displayed,
            Category::Overall,
            TrialBudget::Exact(2000),
            ViewOrder::BestFirst,
            &mut rng,
        );

        for r in &result {
            let expected_top = if r.item < 5 { 1.0 } else { 0.0 };
            assert!((r.top_k_probability - expected_top).abs() < 1e-9);
            assert!((r.exact_rank_probability.unwrap() - 1.0).abs() < 1e-9);
            assert_eq!(r.median_rank, r.item as usize + 1);
        }
    }

    #[test]
    fn test_worst_first_view_maps_ranks() {
        let mut rng = SmallRng::seed_from_u64(2);
        let items: Vec<RatingRecord> =
            (0..4).map(|i| item(i, 2000.0 - 300.0 * i as f64, 30.0)).collect();
        // Worst first: item 3 is displayed at position 0.
        let displayed = vec![3, 2, 1, 0];

        let result = simulate_rank_uncertainty(
            &items,
            &displayed,
            Category::Overall,
            TrialBudget::Exact(500),
            ViewOrder::WorstFirst,
            &mut rng,
        );

        for r in &result {
            assert!((r.exact_rank_probability.unwrap() - 1.0).abs() < 1e-9, "item {}", r.item);
        }
    }

    #[test]
    fn test_identical_items_share_probability() {
        let mut rng = SmallRng::seed_from_u64(3);
        let items: Vec<RatingRecord> = (0..10).map(|i| item(i, 1500.0, 350.0)).collect();

        let result = simulate_rank_uncertainty(
            &items,
            &[0],
            Category::Overall,
            TrialBudget::Exact(20_000),
            ViewOrder::BestFirst,
            &mut rng,
        );

        let total_top: f64 = result.iter().map(|r| r.top_k_probability).sum();
        assert!((total_top - 5.0).abs() < 1e-9);
        for r in &result {
            let p = r.top_k_probability;
            assert!((p - 0.5).abs() < 0.03, "item {} {p}", r.item);
        }
        assert!((result[0].exact_rank_probability.unwrap() - 0.1).abs() < 0.02);
        assert!(result[1].exact_rank_probability.is_none());
    }

    #[test]
    fn test_trial_budgets() {
        assert_eq!(TrialBudget::Full.trials(), 50_000);
        assert_eq!(TrialBudget::Constrained.trials(), 5_000);
        assert_eq!(TrialBudget::Exact(7).trials(), 7);
    }

    #[test]
    fn test_zero_trials_yields_zero_probabilities() {
        let mut rng = SmallRng::seed_from_u64(4);
        let items = vec![item(1, 1500.0, 100.0), item(2, 1400.0, 100.0)];
        let result = simulate_rank_uncertainty(
            &items,
            &[1, 2],
            Category::Overall,
            TrialBudget::Exact(0),
            ViewOrder::BestFirst,
            &mut rng,
        );
        assert!(result.iter().all(|r| r.top_k_probability == 0.0));
    }
}
