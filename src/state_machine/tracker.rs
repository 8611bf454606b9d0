use chrono::Utc;
use tracing::{Span, debug, info};

use super::stage::ProcessingStage;
use crate::snapshot::{RunStats, Snapshot};

/// Holds the in-memory run state: current stage plus the settled and
/// failed item sets.
///
/// Nothing here touches storage; persisting is a separate call on a
/// [`SnapshotStore`](crate::snapshot::SnapshotStore).
pub struct StageTracker {
    snapshot: Snapshot,
    span: Span,
}

impl StageTracker {
    /// Fresh state for a cold start.
    pub fn new(span: Span) -> Self {
        Self::restore(Snapshot::new(), span)
    }

    /// Continue from a previously persisted snapshot.
    pub fn restore(snapshot: Snapshot, span: Span) -> Self {
        Self { snapshot, span }
    }

    /// Move to `stage`. Re-entering an earlier stage is allowed; a retry
    /// may legitimately go back. The dataset label is only replaced when
    /// one is given.
    pub fn advance_stage(&mut self, stage: ProcessingStage, dataset: Option<&str>) {
        self.snapshot.stage = stage.as_str().to_string();
        if let Some(label) = dataset {
            self.snapshot.dataset = Some(label.to_string());
        }
        match &self.snapshot.dataset {
            Some(label) => info!(parent: &self.span, %stage, dataset = %label, "Processing stage updated"),
            None => info!(parent: &self.span, %stage, "Processing stage updated"),
        }
    }

    /// Record a success. Promotes the item out of the failed set.
    pub fn mark_settled(&mut self, item_id: &str) {
        self.snapshot.failed.remove(item_id);
        self.snapshot.settled.insert(item_id.to_string());
        debug!(parent: &self.span, item_id, "Item settled");
    }

    /// Record an exhausted item. The most recent mark wins, so this also
    /// drops the item from the settled set.
    pub fn mark_failed(&mut self, item_id: &str) {
        self.snapshot.settled.remove(item_id);
        self.snapshot.failed.insert(item_id.to_string());
        debug!(parent: &self.span, item_id, "Item failed");
    }

    pub fn is_settled(&self, item_id: &str) -> bool {
        self.snapshot.settled.contains(item_id)
    }

    pub fn is_failed(&self, item_id: &str) -> bool {
        self.snapshot.failed.contains(item_id)
    }

    pub fn settled_count(&self) -> usize {
        self.snapshot.settled.len()
    }

    pub fn failed_count(&self) -> usize {
        self.snapshot.failed.len()
    }

    /// Current stage, `None` if a restored snapshot named a stage this
    /// build does not know.
    pub fn stage(&self) -> Option<ProcessingStage> {
        self.snapshot.stage()
    }

    pub fn dataset(&self) -> Option<&str> {
        self.snapshot.dataset.as_deref()
    }

    pub fn stats(&self) -> &RunStats {
        &self.snapshot.stats
    }

    pub fn stats_mut(&mut self) -> &mut RunStats {
        &mut self.snapshot.stats
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub(crate) fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }

    /// Stamp the checkpoint time and hand back a copy ready to persist.
    pub fn checkpoint(&mut self) -> Snapshot {
        self.snapshot.checkpoint_at = Utc::now();
        self.snapshot.clone()
    }
}
