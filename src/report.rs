//! Machine-readable run artifacts: stats summary and error report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Span, info};

use crate::classifier::{ErrorRecord, Severity};
use crate::error::{Collaborator, EnrichError, Result};
use crate::snapshot::{RunStats, Snapshot, write_new_record};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollaboratorErrors {
    pub collaborator: Collaborator,
    pub count: usize,
    /// Share of all errors, in percent.
    pub share_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    /// In order of first appearance.
    pub by_collaborator: Vec<CollaboratorErrors>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub most_problematic: Option<Collaborator>,
}

impl ErrorSummary {
    pub fn from_errors(errors: &[ErrorRecord]) -> Self {
        let mut by_collaborator: Vec<CollaboratorErrors> = Vec::new();
        let mut by_severity = BTreeMap::new();

        for record in errors {
            match by_collaborator
                .iter_mut()
                .find(|c| c.collaborator == record.collaborator)
            {
                Some(entry) => entry.count += 1,
                None => by_collaborator.push(CollaboratorErrors {
                    collaborator: record.collaborator.clone(),
                    count: 1,
                    share_pct: 0.0,
                }),
            }
            *by_severity.entry(record.severity).or_insert(0) += 1;
        }

        let total = errors.len();
        for entry in &mut by_collaborator {
            entry.share_pct = entry.count as f64 * 100.0 / total as f64;
        }

        // Strictly greater keeps the first-seen collaborator on ties.
        let mut most_problematic: Option<&CollaboratorErrors> = None;
        for entry in &by_collaborator {
            if most_problematic.is_none_or(|best| entry.count > best.count) {
                most_problematic = Some(entry);
            }
        }

        Self {
            total_errors: total,
            most_problematic: most_problematic.map(|e| e.collaborator.clone()),
            by_collaborator,
            by_severity,
        }
    }
}

/// Everything known about a run's failures at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub generated_at: DateTime<Utc>,
    pub errors: Vec<ErrorRecord>,
    pub stats: RunStats,
    pub summary: ErrorSummary,
}

impl ErrorReport {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            generated_at: Utc::now(),
            errors: snapshot.errors.clone(),
            stats: snapshot.stats.clone(),
            summary: ErrorSummary::from_errors(&snapshot.errors),
        }
    }
}

/// Writes timestamped report files under a directory, one new file per call.
pub struct ReportWriter {
    dir: PathBuf,
    span: Span,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            dir: dir.into(),
            span,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_stats(&self, stats: &RunStats) -> Result<PathBuf> {
        let path = self.write("stats", &serde_json::to_vec_pretty(stats)?)?;
        info!(parent: &self.span, path = %path.display(), "Stats written");
        Ok(path)
    }

    pub fn write_error_report(&self, report: &ErrorReport) -> Result<PathBuf> {
        let path = self.write("error_report", &serde_json::to_vec_pretty(report)?)?;
        info!(
            parent: &self.span,
            path = %path.display(),
            total_errors = report.summary.total_errors,
            "Error report generated"
        );
        Ok(path)
    }

    fn write(&self, prefix: &str, bytes: &[u8]) -> Result<PathBuf> {
        write_new_record(&self.dir, prefix, bytes).map_err(|source| EnrichError::SnapshotWrite {
            path: self.dir.clone(),
            source,
        })
    }
}
