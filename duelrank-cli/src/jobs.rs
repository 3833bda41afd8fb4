/// Background Bradley-Terry jobs.
///
/// Fits run on the blocking pool against a snapshot of the vote log. Starting
/// a job cancels the previous job's token; a superseded job's result is
/// discarded even if it managed to finish.
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use duelrank_core::{
    estimate_rankings_cancellable, EstimateOptions, ItemId, RankingEstimate, VoteEvent,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct JobSlot {
    generation: u64,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Default)]
pub struct RankingJobs {
    slot: Arc<Mutex<JobSlot>>,
}

pub struct JobHandle {
    generation: u64,
    task: JoinHandle<Option<RankingEstimate>>,
    slot: Arc<Mutex<JobSlot>>,
}

impl RankingJobs {
    pub fn new() -> Self {
        RankingJobs::default()
    }

    /// Supersede any running job and start a new fit. Must be called inside a
    /// tokio runtime.
    pub fn start(
        &self,
        item_ids: Vec<ItemId>,
        votes: Vec<VoteEvent>,
        options: EstimateOptions,
    ) -> JobHandle {
        let cancel = CancellationToken::new();
        let generation = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = slot.cancel.replace(cancel.clone()) {
                previous.cancel();
            }
            slot.generation += 1;
            slot.generation
        };

        let task = tokio::task::spawn_blocking(move || {
            estimate_rankings_cancellable(&item_ids, &votes, &options, &cancel)
        });

        JobHandle {
            generation,
            task,
            slot: self.slot.clone(),
        }
    }
}

impl JobHandle {
    /// Wait for the fit. `None` when a newer job superseded this one.
    pub async fn outcome(self) -> Result<Option<RankingEstimate>> {
        let result = self.task.await.context("Ranking job panicked")?;

        let latest = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation;
        match result {
            Some(estimate) if latest == self.generation => {
                info!(
                    job = self.generation,
                    votes = estimate.votes_used,
                    iterations = estimate.iterations,
                    converged = estimate.converged,
                    "Ranking job finished"
                );
                Ok(Some(estimate))
            }
            _ => {
                warn!(job = self.generation, latest, "Ranking job superseded, result discarded");
                Ok(None)
            }
        }
    }
}
