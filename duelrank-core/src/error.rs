use crate::types::ItemId;

/// Failure reported by an external store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Error type for core operations.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("Need at least two active items to form a pair, got {available}")]
    InsufficientItems { available: usize },

    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("An item cannot be compared with itself: {0}")]
    SameItem(ItemId),

    #[error("Concurrent update on item {item}: expected version {expected}, found {actual}")]
    ConcurrentUpdateConflict {
        item: ItemId,
        expected: u64,
        actual: u64,
    },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

/// Result type for core operations.
pub type RankResult<T> = Result<T, RankError>;
