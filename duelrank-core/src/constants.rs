/// Elo rating assigned to every bucket of a newly ingested item.
pub const INITIAL_ELO_RATING: f64 = 1500.0;

/// K-factor for the Elo update. Bounds the magnitude of a single-vote change.
pub const ELO_K_FACTOR: f64 = 32.0;

/// Glicko rating assigned to every bucket of a newly ingested item.
pub const INITIAL_GLICKO_RATING: f64 = 1500.0;

/// Starting rating deviation. Also the ceiling for `inflate_rd`.
pub const INITIAL_RD: f64 = 350.0;

/// Floor for the rating deviation.
///
/// The per-comparison Glicko update shrinks RD on every vote and never grows
/// it back, so without a floor a heavily-compared item becomes effectively
/// immovable.
pub const MIN_RD: f64 = 30.0;

/// Initial Bradley-Terry strength for every item.
pub const INITIAL_BRADLEY_TERRY_STRENGTH: f64 = 1.0;

/// MM stops once no strength moves more than this between iterations.
pub const BT_CONVERGENCE_TOLERANCE: f64 = 1e-6;

/// MM iteration cap. Hitting it is logged, never fatal.
pub const BT_MAX_ITERATIONS: usize = 1000;

/// Default number of bootstrap resamples of the vote log.
pub const DEFAULT_BOOTSTRAP_SAMPLES: usize = 1000;

/// Size of the "top" group reported by both uncertainty estimators.
pub const TOP_K: usize = 5;

/// Monte Carlo trials on a normal client.
pub const DEFAULT_MONTE_CARLO_TRIALS: usize = 50_000;

/// Monte Carlo trials on a constrained / low-power client.
pub const CONSTRAINED_MONTE_CARLO_TRIALS: usize = 5_000;

/// Votes collected (in the active bucket) before the scheduler leaves pure exploration.
pub const DEFAULT_RANDOM_PHASE_LIMIT: u32 = 50;

/// Chance of a uniform-random pair even in the adaptive phase.
pub const DEFAULT_PARTIAL_RANDOM_CHANCE: f64 = 0.2;

/// Maximum rating gap for an "informative" pair in the adaptive phase.
pub const DEFAULT_RATING_DIFF_THRESHOLD: f64 = 150.0;

/// Items with fewer comparisons than this get priority in the adaptive phase.
pub const DEFAULT_UNDER_COMPARISON_THRESHOLD: u32 = 5;

/// How many of the lowest-rated items are candidates for exclusion as converged extremes.
pub const DEFAULT_BOTTOM_EXCLUSION_COUNT: usize = 3;

/// A bottom item is only excluded once it has at least this many comparisons.
pub const DEFAULT_EXCLUSION_MIN_COMPARISONS: u32 = 30;

/// Rejection-sampling draws tried before the explore phase falls back to a full scan.
pub const MAX_RANDOM_ATTEMPTS: usize = 32;
