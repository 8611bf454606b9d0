use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::ErrorRecord;
use crate::error::Collaborator;
use crate::state_machine::ProcessingStage;

/// Version written into every snapshot. Bumped whenever a field changes
/// meaning; readers refuse versions newer than this.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Counters for one run. Only [`reset`](RunStats::reset) ever lowers them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_items: u64,
    pub successful_translations: u64,
    pub failed_translations: u64,
    pub successful_generations: u64,
    pub failed_generations: u64,
    pub external_calls: u64,
    pub total_duration_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunStats {
    pub fn record_success(&mut self, collaborator: &Collaborator) {
        match collaborator {
            Collaborator::Translation => self.successful_translations += 1,
            Collaborator::Generation => self.successful_generations += 1,
            Collaborator::Other(_) => {}
        }
    }

    pub fn record_failure(&mut self, collaborator: &Collaborator) {
        match collaborator {
            Collaborator::Translation => self.failed_translations += 1,
            Collaborator::Generation => self.failed_generations += 1,
            Collaborator::Other(_) => {}
        }
    }

    /// Stamp the start time once; later calls keep the original.
    pub fn mark_started(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_ended(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Point-in-time picture of a run, as written to durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub id: String,
    pub settled: HashSet<String>,
    pub failed: HashSet<String>,
    /// Canonical stage name. Kept as text so snapshots written by a build
    /// with more stages still load.
    pub stage: String,
    pub dataset: Option<String>,
    pub stats: RunStats,
    pub errors: Vec<ErrorRecord>,
    pub checkpoint_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

impl Snapshot {
    /// An empty snapshot for a cold start.
    pub fn new() -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            id: Uuid::new_v4().to_string(),
            settled: HashSet::new(),
            failed: HashSet::new(),
            stage: ProcessingStage::NotStarted.as_str().to_string(),
            dataset: None,
            stats: RunStats::default(),
            errors: Vec::new(),
            checkpoint_at: Utc::now(),
            extra: None,
        }
    }

    /// Parsed stage, `None` if the name is not one this build knows.
    pub fn stage(&self) -> Option<ProcessingStage> {
        self.stage.parse().ok()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}
