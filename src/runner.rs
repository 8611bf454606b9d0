//! The batch loop: run one stage over a set of items, isolating per-item
//! failures and checkpointing after every batch.

use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::{Span, info, info_span, warn};

use crate::classifier::{ErrorClassifier, Severity};
use crate::error::{Collaborator, EnrichError, Fault, Result};
use crate::record::PoolItem;
use crate::recovery::RecoveryManager;
use crate::snapshot::SharedStore;
use crate::state_machine::{ProcessingStage, StageTracker};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_FAILED_ID_CAP: usize = 20;

/// Work done on one item by an external collaborator.
///
/// Implementations own any retry/backoff and must map their failures onto
/// a [`Fault`] before returning.
pub trait ItemProcessor<I> {
    type Output;

    async fn process(&self, item: &I) -> std::result::Result<Self::Output, Fault>;
}

/// Parameters for one [`BatchRunner::run`] call.
#[derive(Debug, Clone)]
pub struct StageRun {
    pub stage: ProcessingStage,
    pub collaborator: Collaborator,
    pub dataset: Option<String>,
    pub batch_size: usize,
}

impl StageRun {
    pub fn new(stage: ProcessingStage, collaborator: Collaborator) -> Self {
        Self {
            stage,
            collaborator,
            dataset: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// End-of-stage accounting shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub stage: ProcessingStage,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub batches: usize,
    /// First failing ids, capped; the rest are only counted.
    pub failed_ids: Vec<String>,
    pub omitted_failed: usize,
}

impl RunSummary {
    fn new(stage: ProcessingStage, skipped: usize) -> Self {
        Self {
            stage,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped,
            batches: 0,
            failed_ids: Vec::new(),
            omitted_failed: 0,
        }
    }

    fn record_failure(&mut self, item_id: &str, cap: usize) {
        self.failed += 1;
        if self.failed_ids.len() < cap {
            self.failed_ids.push(item_id.to_string());
        } else {
            self.omitted_failed += 1;
        }
    }
}

/// Successful results of a stage plus its summary.
#[derive(Debug, Clone)]
pub struct StageOutcome<O> {
    pub results: Vec<O>,
    pub summary: RunSummary,
}

/// Drives stages item by item, strictly in sequence.
///
/// A fault from the processor never aborts the loop: the item is marked
/// failed and the next one runs. Only a failure to persist a snapshot is
/// fatal. With `stop_on_critical`, a critical fault ends the run once its
/// batch has been persisted.
pub struct BatchRunner {
    store: SharedStore,
    tracker: StageTracker,
    recovery: RecoveryManager,
    classifier: ErrorClassifier,
    stop_on_critical: bool,
    failed_id_cap: usize,
    span: Span,
}

impl BatchRunner {
    /// Build a runner over `store`, restoring in-memory state from the
    /// latest snapshot when one exists.
    pub fn new(store: SharedStore, span: Span) -> Self {
        let recovery = RecoveryManager::new(store.clone(), info_span!(parent: &span, "recovery"));
        let tracker_span = info_span!(parent: &span, "tracker");
        let tracker = match recovery.snapshot() {
            Some(snapshot) => {
                info!(parent: &span, stage = %snapshot.stage, "Restoring state from checkpoint");
                StageTracker::restore(snapshot.clone(), tracker_span)
            }
            None => StageTracker::new(tracker_span),
        };

        Self {
            store,
            tracker,
            recovery,
            classifier: ErrorClassifier::new(info_span!(parent: &span, "errors")),
            stop_on_critical: false,
            failed_id_cap: DEFAULT_FAILED_ID_CAP,
            span,
        }
    }

    pub fn with_stop_on_critical(mut self, stop: bool) -> Self {
        self.stop_on_critical = stop;
        self
    }

    pub fn with_failed_id_cap(mut self, cap: usize) -> Self {
        self.failed_id_cap = cap;
        self
    }

    pub fn tracker(&self) -> &StageTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut StageTracker {
        &mut self.tracker
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    pub fn recovery_mut(&mut self) -> &mut RecoveryManager {
        &mut self.recovery
    }

    /// Drop recovered state and continue as a cold start. Records already
    /// on disk are kept.
    pub fn start_fresh(&mut self) {
        self.recovery.clear();
        self.tracker = StageTracker::new(info_span!(parent: &self.span, "tracker"));
    }

    /// Persist the current state on request.
    pub fn checkpoint(&mut self, extra: Option<serde_json::Value>) -> Result<String> {
        let snapshot = self.tracker.checkpoint();
        self.store.save(&snapshot, extra)
    }

    /// Run `processor` over `items` for one stage.
    ///
    /// Items already settled or failed in the recovered run are skipped.
    /// The rest go through in batches of `run.batch_size`; a snapshot is
    /// written after every batch. Returns successful results in item order.
    pub async fn run<I, P>(
        &mut self,
        items: Vec<I>,
        processor: &P,
        run: StageRun,
    ) -> Result<StageOutcome<P::Output>>
    where
        I: PoolItem,
        P: ItemProcessor<I>,
    {
        let stage = run.stage;
        self.tracker.advance_stage(stage, run.dataset.as_deref());
        self.tracker.stats_mut().mark_started();

        let offered = items.len();
        let pending = self.recovery.filter_for_processing(items);
        let mut summary = RunSummary::new(stage, offered - pending.len());

        if pending.is_empty() {
            info!(parent: &self.span, %stage, "All items already processed for stage");
            return Ok(StageOutcome {
                results: Vec::new(),
                summary,
            });
        }

        let batch_size = run.batch_size.max(1);
        let total_batches = pending.len().div_ceil(batch_size);

        let mut results = Vec::with_capacity(pending.len());
        let mut critical: Option<(String, Fault)> = None;
        let mut clock = Instant::now();

        for (index, batch) in pending.chunks(batch_size).enumerate() {
            let batch_number = index + 1;
            let mut succeeded_in_batch = 0usize;

            for item in batch {
                let item_id = item.item_id();
                summary.attempted += 1;
                let stats = self.tracker.stats_mut();
                stats.total_items += 1;
                stats.external_calls += 1;

                match processor.process(item).await {
                    Ok(output) => {
                        results.push(output);
                        self.tracker.mark_settled(item_id);
                        self.tracker.stats_mut().record_success(&run.collaborator);
                        summary.succeeded += 1;
                        succeeded_in_batch += 1;
                    }
                    Err(fault) => {
                        let severity = self.classifier.record(
                            self.tracker.snapshot_mut(),
                            &run.collaborator,
                            &fault,
                            item_id,
                            0,
                        );
                        self.tracker.mark_failed(item_id);
                        summary.record_failure(item_id, self.failed_id_cap);
                        if severity == Severity::Critical && critical.is_none() {
                            critical = Some((item_id.to_string(), fault));
                        }
                    }
                }
            }

            summary.batches += 1;
            self.tracker.stats_mut().total_duration_ms += clock.elapsed().as_millis() as u64;
            clock = Instant::now();

            let snapshot = self.tracker.checkpoint();
            self.store.save(
                &snapshot,
                Some(json!({
                    "stage": stage.as_str(),
                    "dataset": run.dataset,
                    "batch_number": batch_number,
                    "total_batches": total_batches,
                    "batch_len": batch.len(),
                    "processed_in_batch": succeeded_in_batch,
                })),
            )?;

            info!(
                parent: &self.span,
                %stage,
                "Processed batch {batch_number}/{total_batches}: {succeeded_in_batch}/{} items successful",
                batch.len()
            );

            if self.stop_on_critical {
                if let Some((item_id, fault)) = critical.take() {
                    warn!(parent: &self.span, %stage, item_id = %item_id, "Stopping run on critical fault");
                    return Err(EnrichError::CriticalFault {
                        stage: stage.as_str().to_string(),
                        item_id,
                        fault,
                    });
                }
            }
        }

        info!(
            parent: &self.span,
            %stage,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Stage '{stage}' completed: {}/{} items processed",
            summary.succeeded,
            pending.len()
        );

        Ok(StageOutcome { results, summary })
    }
}
