use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::constants::{
    BT_CONVERGENCE_TOLERANCE, BT_MAX_ITERATIONS, DEFAULT_BOOTSTRAP_SAMPLES, INITIAL_ELO_RATING,
    INITIAL_GLICKO_RATING, INITIAL_RD, TOP_K,
};

/// Caller-provided item identifier.
pub type ItemId = i64;

/// A pair of item IDs, in presentation order (left, right).
pub type Pair = (ItemId, ItemId);

/// Opaque voter identity (device id, account id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct VoterId(pub String);

impl VoterId {
    pub fn new(id: impl Into<String>) -> Self {
        VoterId(id.into())
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The voter's declared segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Segment {
    Male,
    Female,
    #[default]
    Unspecified,
}

impl Segment {
    /// Parse a free-form declaration. Unrecognized input is `Unspecified`.
    pub fn parse(declared: &str) -> Segment {
        match declared.trim().to_ascii_lowercase().as_str() {
            "male" | "man" | "men" | "m" => Segment::Male,
            "female" | "woman" | "women" | "f" | "w" => Segment::Female,
            _ => Segment::Unspecified,
        }
    }

    /// The segment-specific bucket, if this segment has one.
    pub fn category(self) -> Option<Category> {
        match self {
            Segment::Male => Some(Category::Male),
            Segment::Female => Some(Category::Female),
            Segment::Unspecified => None,
        }
    }

    /// Bucket used when scheduling for this segment.
    pub fn active_category(self) -> Category {
        self.category().unwrap_or(Category::Overall)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Segment::Male => "male",
            Segment::Female => "female",
            Segment::Unspecified => "unspecified",
        })
    }
}

/// Rating bucket of a `RatingRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Category {
    Overall,
    Male,
    Female,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Overall, Category::Male, Category::Female];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Overall => "overall",
            Category::Male => "male",
            Category::Female => "female",
        })
    }
}

/// Rating state of one item within one category.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CategoryStats {
    pub elo: f64,
    pub glicko: f64,
    /// Glicko rating deviation. Lower means more confident.
    pub rd: f64,
    pub comparisons: u32,
    pub wins: u32,
    pub losses: u32,
}

impl Default for CategoryStats {
    fn default() -> Self {
        CategoryStats {
            elo: INITIAL_ELO_RATING,
            glicko: INITIAL_GLICKO_RATING,
            rd: INITIAL_RD,
            comparisons: 0,
            wins: 0,
            losses: 0,
        }
    }
}

/// Which scalar rating the scheduler and leaderboards compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RatingMetric {
    Elo,
    #[default]
    Glicko,
}

impl CategoryStats {
    pub fn rating(&self, metric: RatingMetric) -> f64 {
        match metric {
            RatingMetric::Elo => self.elo,
            RatingMetric::Glicko => self.glicko,
        }
    }
}

/// Per-item mutable rating state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RatingRecord {
    pub id: ItemId,
    /// Display reference, e.g. the photo URL.
    pub url: String,
    /// Inactive items are never scheduled but still ranked.
    pub active: bool,
    /// Optimistic-concurrency counter, bumped by the store on every successful write.
    pub version: u64,
    pub overall: CategoryStats,
    pub male: CategoryStats,
    pub female: CategoryStats,
}

impl RatingRecord {
    /// A freshly ingested item: default ratings in every bucket, active.
    pub fn new(id: ItemId, url: impl Into<String>) -> Self {
        RatingRecord {
            id,
            url: url.into(),
            active: true,
            version: 0,
            overall: CategoryStats::default(),
            male: CategoryStats::default(),
            female: CategoryStats::default(),
        }
    }

    pub fn stats(&self, category: Category) -> &CategoryStats {
        match category {
            Category::Overall => &self.overall,
            Category::Male => &self.male,
            Category::Female => &self.female,
        }
    }

    pub fn stats_mut(&mut self, category: Category) -> &mut CategoryStats {
        match category {
            Category::Overall => &mut self.overall,
            Category::Male => &mut self.male,
            Category::Female => &mut self.female,
        }
    }
}

/// Partial-field write for one record: only the buckets that changed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RatingUpdate {
    pub id: ItemId,
    /// Version the record had when it was read. The write fails if it moved.
    pub expected_version: u64,
    pub buckets: Vec<(Category, CategoryStats)>,
}

impl RatingUpdate {
    /// Buckets of `after` that differ from `before`.
    pub fn diff(before: &RatingRecord, after: &RatingRecord) -> Self {
        let buckets = Category::ALL
            .iter()
            .filter(|&&c| before.stats(c) != after.stats(c))
            .map(|&c| (c, *after.stats(c)))
            .collect();
        RatingUpdate {
            id: before.id,
            expected_version: before.version,
            buckets,
        }
    }
}

/// Canonical unordered pair: (A, B) and (B, A) produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairKey(ItemId, ItemId);

impl PairKey {
    pub fn new(a: ItemId, b: ItemId) -> Self {
        if a <= b {
            PairKey(a, b)
        } else {
            PairKey(b, a)
        }
    }

    pub fn low(&self) -> ItemId {
        self.0
    }

    pub fn high(&self) -> ItemId {
        self.1
    }
}

/// One recorded vote. Immutable once appended to the log.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoteEvent {
    /// Smaller of the two IDs.
    pub item_a: ItemId,
    /// Larger of the two IDs.
    pub item_b: ItemId,
    pub winner: ItemId,
    pub voter: VoterId,
    pub segment: Segment,
    pub timestamp: DateTime<Utc>,
}

impl VoteEvent {
    /// Build an event with canonically ordered item IDs.
    pub fn new(
        winner: ItemId,
        loser: ItemId,
        voter: VoterId,
        segment: Segment,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let key = PairKey::new(winner, loser);
        VoteEvent {
            item_a: key.low(),
            item_b: key.high(),
            winner,
            voter,
            segment,
            timestamp,
        }
    }

    pub fn loser(&self) -> ItemId {
        if self.winner == self.item_a {
            self.item_b
        } else {
            self.item_a
        }
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey::new(self.item_a, self.item_b)
    }
}

/// Options for `estimate_rankings()`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EstimateOptions {
    /// Only use votes cast by this segment. `None` = every vote.
    pub segment: Option<Segment>,
    /// Bootstrap resamples of the vote log. 0 = skip rank probabilities.
    pub bootstrap_samples: usize,
    pub top_k: usize,
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Fixed RNG seed for reproducible bootstrap runs. `None` = OS entropy.
    pub seed: Option<u64>,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        EstimateOptions {
            segment: None,
            bootstrap_samples: DEFAULT_BOOTSTRAP_SAMPLES,
            top_k: TOP_K,
            tolerance: BT_CONVERGENCE_TOLERANCE,
            max_iterations: BT_MAX_ITERATIONS,
            seed: None,
        }
    }
}

/// One row of the Bradley-Terry ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RankedItem {
    pub item: ItemId,
    /// 0-based position in the ranking.
    pub rank: usize,
    /// Normalized strength; all strengths sum to the item count.
    pub strength: f64,
    pub wins: u32,
    pub comparisons: u32,
    /// Fraction of bootstrap runs placing the item in the top K. `None` without bootstrap.
    pub top_k_probability: Option<f64>,
    /// Fraction of bootstrap runs placing the item exactly at `rank`.
    pub exact_rank_probability: Option<f64>,
}

/// Result of `estimate_rankings()`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RankingEstimate {
    /// Sorted by strength descending.
    pub rankings: Vec<RankedItem>,
    /// Number of votes that went into the fit (after segment filtering).
    pub votes_used: usize,
    pub iterations: usize,
    pub converged: bool,
    pub bootstrap_samples: usize,
}

/// How the displayed ranking is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ViewOrder {
    #[default]
    BestFirst,
    WorstFirst,
}

/// Monte Carlo output for one item.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RankProbability {
    pub item: ItemId,
    pub top_k_probability: f64,
    /// `None` when the item is not part of the displayed subset.
    pub exact_rank_probability: Option<f64>,
    /// 1-based median rank across trials.
    pub median_rank: usize,
}

/// Maps between caller-provided IDs and internal 0..N indices.
#[derive(Debug, Default)]
pub(crate) struct IdMap {
    ids: Vec<ItemId>,
    id_to_idx: HashMap<ItemId, usize>,
}

impl IdMap {
    pub fn new() -> Self {
        IdMap::default()
    }

    /// Index of `id`, registering it if unseen.
    pub fn insert(&mut self, id: ItemId) -> usize {
        if let Some(&idx) = self.id_to_idx.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id);
        self.id_to_idx.insert(id, idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn to_idx(&self, id: ItemId) -> Option<usize> {
        self.id_to_idx.get(&id).copied()
    }

    pub fn to_id(&self, idx: usize) -> ItemId {
        self.ids[idx]
    }
}
