//! Severity classification and the append-only error sequence.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Span, error, warn};

use crate::error::{Collaborator, Fault, FaultKind};
use crate::snapshot::Snapshot;

/// Retry count at which any non-fatal fault is considered high severity.
pub const HIGH_SEVERITY_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One failed collaborator call, as kept in the run's error sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub collaborator: Collaborator,
    pub kind: FaultKind,
    pub message: String,
    pub item_id: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub severity: Severity,
}

/// Maps faults to severities and appends them to the run state.
pub struct ErrorClassifier {
    span: Span,
}

impl ErrorClassifier {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// Rules, first match wins:
    /// 1. fatal kinds (authentication, permission, configuration) → critical
    /// 2. `retry_count >= 3` → high
    /// 3. transient API kinds → medium
    /// 4. anything else → low
    pub fn classify(fault: &Fault, retry_count: u32) -> Severity {
        if fault.kind.is_fatal() {
            Severity::Critical
        } else if retry_count >= HIGH_SEVERITY_RETRIES {
            Severity::High
        } else if fault.kind.is_transient_api() {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Append an [`ErrorRecord`] to the snapshot's error sequence and bump
    /// the failure counter for `collaborator`. Returns the assigned severity.
    pub fn record(
        &self,
        snapshot: &mut Snapshot,
        collaborator: &Collaborator,
        fault: &Fault,
        item_id: &str,
        retry_count: u32,
    ) -> Severity {
        let severity = Self::classify(fault, retry_count);

        snapshot.errors.push(ErrorRecord {
            collaborator: collaborator.clone(),
            kind: fault.kind,
            message: fault.message.clone(),
            item_id: item_id.to_string(),
            timestamp: Utc::now(),
            retry_count,
            severity,
        });
        snapshot.stats.record_failure(collaborator);

        if severity >= Severity::High {
            error!(
                parent: &self.span,
                %collaborator,
                kind = %fault.kind,
                item_id,
                retry_count,
                %severity,
                "Collaborator error: {}",
                fault.message
            );
        } else {
            warn!(
                parent: &self.span,
                %collaborator,
                kind = %fault.kind,
                item_id,
                retry_count,
                %severity,
                "Collaborator error: {}",
                fault.message
            );
        }

        severity
    }
}
