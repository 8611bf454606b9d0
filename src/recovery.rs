//! Deciding what a restarted run can skip.

use std::cell::OnceCell;
use std::collections::HashSet;

use tracing::{Span, info, warn};

use crate::record::PoolItem;
use crate::snapshot::{SharedStore, Snapshot};
use crate::state_machine::ProcessingStage;

/// Replays the latest persisted snapshot so a restarted run skips items
/// that were already settled or exhausted.
///
/// The store is read at most once, on first use; the result is cached.
pub struct RecoveryManager {
    store: SharedStore,
    recovered: OnceCell<Option<Snapshot>>,
    span: Span,
}

impl RecoveryManager {
    pub fn new(store: SharedStore, span: Span) -> Self {
        Self {
            store,
            recovered: OnceCell::new(),
            span,
        }
    }

    /// The recovered snapshot, loading it on first call.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.recovered
            .get_or_init(|| match self.store.load_latest() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(parent: &self.span, "Could not read checkpoints, starting cold: {e}");
                    None
                }
            })
            .as_ref()
    }

    pub fn can_recover(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Ids settled in the recovered run; empty without recovery data.
    pub fn processed_ids(&self) -> HashSet<&str> {
        self.snapshot()
            .map(|s| s.settled.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Ids that failed in the recovered run; empty without recovery data.
    pub fn failed_ids(&self) -> HashSet<&str> {
        self.snapshot()
            .map(|s| s.failed.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn should_skip(&self, item_id: &str) -> bool {
        self.snapshot()
            .is_some_and(|s| s.settled.contains(item_id) || s.failed.contains(item_id))
    }

    /// Drop every item the recovered run already settled or gave up on.
    /// Without recovery data the input comes back untouched.
    pub fn filter_for_processing<T: PoolItem>(&self, items: Vec<T>) -> Vec<T> {
        let Some(snapshot) = self.snapshot() else {
            return items;
        };

        let total = items.len();
        let mut skipped_settled = 0usize;
        let mut skipped_failed = 0usize;
        let remaining: Vec<T> = items
            .into_iter()
            .filter(|item| {
                let id = item.item_id();
                if snapshot.settled.contains(id) {
                    skipped_settled += 1;
                    false
                } else if snapshot.failed.contains(id) {
                    skipped_failed += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        if remaining.len() < total {
            info!(
                parent: &self.span,
                skipped = total - remaining.len(),
                settled = skipped_settled,
                failed = skipped_failed,
                remaining = remaining.len(),
                "Recovery: skipping already handled items"
            );
        }
        remaining
    }

    /// The recovered stage name, or `not_started` without recovery data.
    pub fn recovered_stage_name(&self) -> &str {
        self.snapshot()
            .map(|s| s.stage.as_str())
            .unwrap_or(ProcessingStage::NotStarted.as_str())
    }

    pub fn recovered_stage(&self) -> Option<ProcessingStage> {
        self.recovered_stage_name().parse().ok()
    }

    pub fn recovered_dataset(&self) -> Option<&str> {
        self.snapshot().and_then(|s| s.dataset.as_deref())
    }

    /// Whether work for `target` still needs to run: true iff `target` is at
    /// or after the recovered stage. An unrecognised recovered stage resumes
    /// everything; no recovery data resumes nothing.
    pub fn should_resume_from_stage(&self, target: ProcessingStage) -> bool {
        if !self.can_recover() {
            return false;
        }
        match self.recovered_stage() {
            Some(recovered) => target.is_at_or_after(recovered),
            None => {
                warn!(
                    parent: &self.span,
                    stage = self.recovered_stage_name(),
                    "Unknown recovered stage, resuming conservatively"
                );
                true
            }
        }
    }

    /// Operator-facing description of the recovered state.
    pub fn summarize(&self) -> String {
        let Some(snapshot) = self.snapshot() else {
            return "No recovery data available.".to_string();
        };
        let stats = &snapshot.stats;
        [
            "=== Recovery Information ===".to_string(),
            format!("Processing Stage: {}", snapshot.stage),
            format!(
                "Current Dataset: {}",
                snapshot.dataset.as_deref().unwrap_or("None")
            ),
            format!("Processed Items: {}", snapshot.settled.len()),
            format!("Failed Items: {}", snapshot.failed.len()),
            format!("Total Errors: {}", snapshot.errors.len()),
            format!("Checkpoint Time: {}", snapshot.checkpoint_at.to_rfc3339()),
            String::new(),
            "=== Last Statistics ===".to_string(),
            format!("Total Items: {}", stats.total_items),
            format!("Successful Translations: {}", stats.successful_translations),
            format!("Successful Generations: {}", stats.successful_generations),
            format!("Failed Translations: {}", stats.failed_translations),
            format!("Failed Generations: {}", stats.failed_generations),
            format!("External Calls: {}", stats.external_calls),
        ]
        .join("\n")
    }

    /// Forget the cached recovery data. The store is not re-read and the
    /// durable records stay on disk for audit.
    pub fn clear(&mut self) {
        self.recovered = OnceCell::from(None);
        info!(parent: &self.span, "Recovery data cleared");
    }
}
