/// duelrank-core: pairwise voting and ranking engine.
///
/// Voters pick the better of two items → Elo and Glicko ratings move after
/// every vote → Bradley-Terry strengths and Monte Carlo rank odds on demand.
/// Storage is behind traits; an in-memory store ships with the crate.
///
/// Items are identified by caller-provided `i64` IDs. Ratings are kept in
/// three buckets per item: overall, plus one per declared voter segment.
///
/// # Quick start
///
/// ```rust
/// use duelrank_core::{
///     EngineConfig, EstimateOptions, MemoryStore, PairSelection, Segment, Voter, VotingEngine,
/// };
///
/// let store = MemoryStore::with_urls(["a.jpg", "b.jpg", "c.jpg"]);
/// let mut engine = VotingEngine::with_seed(store, EngineConfig::default(), 42);
/// let voter = Voter::new("alice", Segment::parse("female"));
///
/// while let PairSelection::Pair { pair: (left, right), .. } = engine.next_pair(&voter)? {
///     // Show both items, let the voter choose. Here the lower ID always wins.
///     engine.submit_vote(&voter, left.min(right), left.max(right))?;
/// }
///
/// let options = EstimateOptions { bootstrap_samples: 100, seed: Some(1), ..Default::default() };
/// let estimate = engine.rankings(&options)?;
/// for r in &estimate.rankings {
///     println!("#{} item {}: {:.3} ({} wins)", r.rank + 1, r.item, r.strength, r.wins);
/// }
/// # Ok::<(), duelrank_core::RankError>(())
/// ```

pub mod bradley_terry;
pub mod constants;
pub mod engine;
pub mod error;
pub mod monte_carlo;
pub mod pairing;
pub mod rating;
pub mod seen_pairs;
pub mod store;
pub mod types;

// Re-export primary public API at crate root.
pub use bradley_terry::{estimate_rankings, estimate_rankings_cancellable};
pub use engine::{EngineConfig, LeaderboardEntry, VoteReceipt, Voter, VotingEngine};
pub use error::{RankError, RankResult, StoreError};
pub use monte_carlo::{simulate_rank_uncertainty, TrialBudget};
pub use pairing::{select_next_pair, PairSelection, Phase, PhaseParams};
pub use rating::apply_vote;
pub use seen_pairs::{SeenPairSet, VoterProgress};
pub use store::{ItemStore, MemoryStore, SeenPairStore, VoteLog};
pub use types::{
    Category, CategoryStats, EstimateOptions, ItemId, Pair, PairKey, RankProbability, RankedItem,
    RankingEstimate, RatingMetric, RatingRecord, RatingUpdate, Segment, ViewOrder, VoteEvent,
    VoterId,
};
