//! Background enrichment worker
//!
//! Gap creation and content edits enqueue jobs here; the worker runs them
//! outside the request that produced them. Per job: compare the gap
//! against every other non-Closed gap with a bounded concurrent fan-out,
//! persist symmetric similarity edges at or above the threshold, rank the
//! active SOP catalogue, then mark the gap AI-processed and advance
//! `PendingAI` to `NeedsReview`.
//!
//! Supersession is two-layered. A generation counter per gap lets the
//! newest enqueue win before work starts: a queued job whose generation
//! is behind is skipped outright. At write-back the gap's `updated_at` is
//! compared against the snapshot taken when the job began; a newer
//! content edit means the results are discarded (the edit re-enqueued).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::SimilarityProvider;
use crate::config::AiSettings;
use crate::database::{GapRepository, SimilarityRepository, SopRepository};
use crate::error::AppResult;
use crate::events::{DomainEvent, EventBus};
use crate::models::{Gap, GapStatus, SopSuggestion};

#[derive(Debug, Clone, Copy)]
struct EnrichJob {
    gap_id: i64,
    generation: u64,
}

/// Handle for enqueueing work; cheap to clone into the app state.
#[derive(Clone)]
pub struct EnricherQueue {
    tx: mpsc::UnboundedSender<EnrichJob>,
    generations: Arc<Mutex<HashMap<i64, u64>>>,
}

impl EnricherQueue {
    /// Enqueue (or re-enqueue) enrichment for a gap. Bumping the
    /// generation marks every older queued or in-flight job stale.
    pub fn enqueue(&self, gap_id: i64) {
        let generation = {
            let mut generations = self.generations.lock().expect("generation map poisoned");
            let entry = generations.entry(gap_id).or_insert(0);
            *entry += 1;
            *entry
        };

        let job = EnrichJob { gap_id, generation };
        if self.tx.send(job).is_err() {
            warn!(gap = gap_id, "enricher queue is closed; job dropped");
        } else {
            debug!(gap = gap_id, generation, "enrichment job enqueued");
        }
    }

    fn is_stale(&self, job: &EnrichJob) -> bool {
        let generations = self.generations.lock().expect("generation map poisoned");
        generations
            .get(&job.gap_id)
            .map(|current| *current > job.generation)
            .unwrap_or(false)
    }
}

/// Spawn the worker task. Returns the queue handle and the task handle;
/// dropping every queue clone ends the worker loop.
pub fn spawn(
    pool: PgPool,
    provider: Option<Arc<dyn SimilarityProvider>>,
    settings: AiSettings,
    bus: EventBus,
) -> (EnricherQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = EnricherQueue {
        tx,
        generations: Arc::new(Mutex::new(HashMap::new())),
    };

    if provider.is_none() {
        info!("AI provider not configured; enrichment degrades to routing-only");
    }

    let worker_queue = queue.clone();
    let handle = tokio::spawn(async move {
        let enricher = Enricher {
            pool,
            provider,
            settings,
            bus,
        };

        while let Some(job) = rx.recv().await {
            if worker_queue.is_stale(&job) {
                debug!(gap = job.gap_id, "skipping superseded enrichment job");
                continue;
            }
            if let Err(err) = enricher.process(&job, &worker_queue).await {
                // Enrichment failures never propagate to a request; the
                // gap was already marked routable where possible.
                warn!(gap = job.gap_id, error = %err, "enrichment job failed");
            }
        }
        info!("enrichment worker stopped");
    });

    (queue, handle)
}

struct Enricher {
    pool: PgPool,
    provider: Option<Arc<dyn SimilarityProvider>>,
    settings: AiSettings,
    bus: EventBus,
}

impl Enricher {
    async fn process(&self, job: &EnrichJob, queue: &EnricherQueue) -> AppResult<()> {
        let gaps = GapRepository::new(self.pool.clone());

        let Some(gap) = gaps.find(job.gap_id).await? else {
            return Ok(());
        };

        // A closed gap is never revived, enriched, or advanced.
        if gap.status == GapStatus::Closed {
            return Ok(());
        }

        let snapshot = gap.updated_at;

        let Some(provider) = self.provider.clone() else {
            // No provider: still mark processed so the gap is routable.
            self.finalize(&gaps, job.gap_id, None, snapshot).await?;
            return Ok(());
        };

        let candidates = gaps.list_live_except(gap.id).await?;
        let edges = self.score_candidates(&gap, candidates, provider.clone()).await;

        if queue.is_stale(job) {
            debug!(gap = gap.id, "job superseded after scoring; discarding");
            return Ok(());
        }

        SimilarityRepository::new(self.pool.clone())
            .write_pairs(gap.id, &edges)
            .await?;

        let suggestions = self.rank_sops(&gap, provider).await;
        let suggestions_value = serde_json::to_value(&suggestions)
            .map_err(|e| anyhow::anyhow!("failed to encode SOP suggestions: {e}"))?;

        self.finalize(&gaps, gap.id, Some(suggestions_value), snapshot)
            .await?;

        info!(
            gap = gap.id,
            edges = edges.len(),
            suggestions = suggestions.len(),
            "enrichment complete"
        );
        Ok(())
    }

    /// Pairwise comparisons with a bounded concurrent fan-out. A failed
    /// comparison scores 0 so a provider hiccup never drops the job.
    async fn score_candidates(
        &self,
        gap: &Gap,
        candidates: Vec<Gap>,
        provider: Arc<dyn SimilarityProvider>,
    ) -> Vec<(i64, i32)> {
        let threshold = self.settings.similarity_threshold;
        let concurrency = self.settings.concurrency.max(1);

        let scored: Vec<(i64, i32)> = stream::iter(candidates)
            .map(|candidate| {
                let provider = provider.clone();
                let gap = gap.clone();
                async move {
                    let score = match provider.score(&gap, &candidate).await {
                        Ok(score) => score,
                        Err(err) => {
                            warn!(
                                gap = gap.id,
                                other = candidate.id,
                                error = %err,
                                "similarity comparison failed; scoring 0"
                            );
                            0
                        }
                    };
                    (candidate.id, score)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        scored
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .collect()
    }

    /// Rank the active SOP catalogue, keeping the top-K by score.
    /// A wholesale ranking failure yields no suggestions, not a dead job.
    async fn rank_sops(
        &self,
        gap: &Gap,
        provider: Arc<dyn SimilarityProvider>,
    ) -> Vec<SopSuggestion> {
        let sops = match SopRepository::new(self.pool.clone()).list_active().await {
            Ok(sops) => sops,
            Err(err) => {
                warn!(error = %err, "failed to load SOP catalogue");
                return Vec::new();
            }
        };

        let mut suggestions = match provider.rank_sops(gap, &sops).await {
            Ok(suggestions) => suggestions,
            Err(err) => {
                warn!(gap = gap.id, error = %err, "SOP ranking failed");
                return Vec::new();
            }
        };

        suggestions.sort_by(|a, b| b.score.cmp(&a.score));
        suggestions.truncate(self.settings.sop_top_k);
        suggestions
    }

    /// Conditional write-back: advance the gap unless a newer edit
    /// superseded the snapshot.
    async fn finalize(
        &self,
        gaps: &GapRepository,
        gap_id: i64,
        suggestions: Option<serde_json::Value>,
        snapshot: chrono::DateTime<chrono::Utc>,
    ) -> AppResult<()> {
        let applied = gaps
            .write_enrichment(gap_id, suggestions.as_ref(), snapshot)
            .await?;

        if applied {
            self.bus.publish(DomainEvent::GapUpdated {
                gap_id,
                actor_id: None,
            });
        } else {
            debug!(gap = gap_id, "enrichment results discarded; gap changed during job");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_only() -> (EnricherQueue, mpsc::UnboundedReceiver<EnrichJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            EnricherQueue {
                tx,
                generations: Arc::new(Mutex::new(HashMap::new())),
            },
            rx,
        )
    }

    #[test]
    fn test_generation_bumps_per_enqueue() {
        let (queue, mut rx) = queue_only();
        queue.enqueue(1);
        queue.enqueue(1);
        queue.enqueue(2);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        let third = rx.try_recv().unwrap();

        assert_eq!((first.gap_id, first.generation), (1, 1));
        assert_eq!((second.gap_id, second.generation), (1, 2));
        assert_eq!((third.gap_id, third.generation), (2, 1));
    }

    #[test]
    fn test_newest_enqueue_supersedes_older_jobs() {
        let (queue, mut rx) = queue_only();
        queue.enqueue(1);
        let first = rx.try_recv().unwrap();

        // Not stale while it is the newest.
        assert!(!queue.is_stale(&first));

        queue.enqueue(1);
        assert!(queue.is_stale(&first));

        let second = rx.try_recv().unwrap();
        assert!(!queue.is_stale(&second));
    }

    #[test]
    fn test_staleness_is_per_gap() {
        let (queue, mut rx) = queue_only();
        queue.enqueue(1);
        queue.enqueue(2);
        let job1 = rx.try_recv().unwrap();

        queue.enqueue(2);
        assert!(!queue.is_stale(&job1));
    }
}
