use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use tracing::{Span, debug, error, info};

use super::schema::{SNAPSHOT_SCHEMA_VERSION, Snapshot};
use crate::error::{EnrichError, Result};

const RECORD_PREFIX: &str = "snapshot";

/// Durable home for run snapshots.
///
/// Every save produces a new record; nothing is ever rewritten in place.
/// A single writer is assumed.
pub trait SnapshotStore {
    /// Persist `snapshot`, with `extra` replacing its caller data when given.
    /// Returns the name of the record written.
    fn save(&self, snapshot: &Snapshot, extra: Option<serde_json::Value>) -> Result<String>;

    /// The most recently written snapshot, or `None` when there is none or
    /// it cannot be read back.
    fn load_latest(&self) -> Result<Option<Snapshot>>;
}

pub type SharedStore = Arc<dyn SnapshotStore>;

/// Stores each snapshot as its own JSON file in a directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
    span: Span,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            dir: dir.into(),
            span,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All snapshot records, oldest first.
    pub fn list_records(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<(SystemTime, String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_record_name(&name) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            records.push((modified, name, entry.path()));
        }

        // Equal mtimes fall back to the name, which embeds the creation time.
        records.sort();
        Ok(records.into_iter().map(|(_, _, path)| path).collect())
    }

    fn read_record(&self, path: &Path) -> Result<Snapshot> {
        let contents = fs::read_to_string(path)?;
        let snapshot: Snapshot =
            serde_json::from_str(&contents).map_err(|e| EnrichError::SnapshotCorrupted {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(EnrichError::SnapshotCorrupted {
                path: path.to_path_buf(),
                reason: format!(
                    "schema version {} is newer than supported {}",
                    snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION
                ),
            });
        }
        Ok(snapshot)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &Snapshot, extra: Option<serde_json::Value>) -> Result<String> {
        let bytes = match extra {
            Some(extra) => {
                let mut with_extra = snapshot.clone();
                with_extra.extra = Some(extra);
                serde_json::to_vec(&with_extra)?
            }
            None => serde_json::to_vec(snapshot)?,
        };

        let path = write_new_record(&self.dir, RECORD_PREFIX, &bytes).map_err(|source| {
            EnrichError::SnapshotWrite {
                path: self.dir.clone(),
                source,
            }
        })?;

        info!(
            parent: &self.span,
            path = %path.display(),
            settled = snapshot.settled.len(),
            failed = snapshot.failed.len(),
            "Checkpoint saved"
        );
        Ok(path.to_string_lossy().into_owned())
    }

    fn load_latest(&self) -> Result<Option<Snapshot>> {
        let records = self.list_records()?;
        let Some(latest) = records.last() else {
            info!(parent: &self.span, dir = %self.dir.display(), "No checkpoints found");
            return Ok(None);
        };

        match self.read_record(latest) {
            Ok(snapshot) => {
                info!(parent: &self.span, path = %latest.display(), "Checkpoint loaded");
                Ok(Some(snapshot))
            }
            Err(e) => {
                error!(parent: &self.span, path = %latest.display(), "Failed to load checkpoint: {e}");
                Ok(None)
            }
        }
    }
}

fn is_record_name(name: &str) -> bool {
    name.starts_with(RECORD_PREFIX) && name.ends_with(".json")
}

/// Write `bytes` to a brand-new, time-named file under `dir`.
///
/// The content goes to a hidden temp file first and is renamed into place
/// once synced, so a crash never leaves a half-written record under a
/// record name. Existing files are never touched.
pub(crate) fn write_new_record(dir: &Path, prefix: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%6f");

    for attempt in 0u32.. {
        let name = if attempt == 0 {
            format!("{prefix}_{stamp}.json")
        } else {
            format!("{prefix}_{stamp}_{attempt:03}.json")
        };
        let target = dir.join(&name);
        if target.exists() {
            continue;
        }

        let tmp = dir.join(format!(".{name}.tmp"));
        let file = match OpenOptions::new().write(true).create_new(true).open(&tmp) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        };
        commit_record(file, &tmp, &target, bytes)?;
        debug!(path = %target.display(), bytes = bytes.len(), "Record written");
        return Ok(target);
    }

    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        "no free record name",
    ))
}

/// Fill `file` (open on `tmp`), sync it and rename it to `target`. On any
/// failure the temp file is removed.
fn commit_record(file: File, tmp: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fn write_then_rename(
        mut file: File,
        tmp: &Path,
        target: &Path,
        bytes: &[u8],
    ) -> std::io::Result<()> {
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(tmp, target)
    }

    if let Err(e) = write_then_rename(file, tmp, target, bytes) {
        let _ = fs::remove_file(tmp);
        return Err(e);
    }
    sync_dir(target.parent().unwrap_or(Path::new(".")))
}

/// Flush the directory entry so the rename survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ErrorRecord, Severity};
    use crate::error::{Collaborator, FaultKind};

    fn store(dir: &Path) -> FileSnapshotStore {
        FileSnapshotStore::new(dir, Span::none())
    }

    fn populated() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.settled.insert("s1".into());
        snapshot.settled.insert("s2".into());
        snapshot.failed.insert("s3".into());
        snapshot.stage = "generating".into();
        snapshot.dataset = Some("medqa".into());
        snapshot.stats.total_items = 3;
        snapshot.stats.successful_generations = 2;
        snapshot.stats.failed_generations = 1;
        snapshot.stats.external_calls = 3;
        snapshot.stats.total_duration_ms = 1250;
        snapshot.stats.mark_started();
        snapshot.errors.push(ErrorRecord {
            collaborator: Collaborator::Generation,
            kind: FaultKind::RateLimited,
            message: "429 too many requests".into(),
            item_id: "s3".into(),
            timestamp: Utc::now(),
            retry_count: 2,
            severity: Severity::Medium,
        });
        snapshot.extra = Some(serde_json::json!({"batch_number": 1}));
        snapshot
    }

    #[test]
    fn empty_dir_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).load_latest().unwrap().is_none());
    }

    #[test]
    fn missing_dir_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir.path().join("nope"));
        assert!(s.load_latest().unwrap().is_none());
        assert!(s.list_records().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_returns_equal_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let snapshot = populated();

        s.save(&snapshot, None).unwrap();
        let loaded = s.load_latest().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn extra_replaces_caller_data() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let extra = serde_json::json!({"stage": "translating", "batch_number": 4});

        s.save(&populated(), Some(extra.clone())).unwrap();
        let loaded = s.load_latest().unwrap().unwrap();
        assert_eq!(loaded.extra, Some(extra));
    }

    #[test]
    fn every_save_writes_a_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let mut snapshot = Snapshot::new();

        for i in 0..3 {
            snapshot.settled.insert(format!("s{i}"));
            s.save(&snapshot, None).unwrap();
        }

        assert_eq!(s.list_records().unwrap().len(), 3);
        let latest = s.load_latest().unwrap().unwrap();
        assert_eq!(latest.settled.len(), 3);
    }

    #[test]
    fn corrupted_latest_record_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.save(&populated(), None).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(dir.path().join("snapshot_29991231T235959000000.json"), b"{not json").unwrap();

        assert!(s.load_latest().unwrap().is_none());
    }

    #[test]
    fn newer_schema_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let mut snapshot = populated();
        snapshot.schema_version = SNAPSHOT_SCHEMA_VERSION + 1;
        s.save(&snapshot, None).unwrap();

        assert!(s.load_latest().unwrap().is_none());
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        fs::write(dir.path().join(".snapshot_x.json.tmp"), b"partial").unwrap();
        let s = store(dir.path());
        assert!(s.list_records().unwrap().is_empty());
    }

    #[test]
    fn failed_commit_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(".stats_x.json.tmp");
        let file = OpenOptions::new().write(true).create_new(true).open(&tmp).unwrap();
        let target = dir.path().join("missing").join("stats_x.json");

        assert!(commit_record(file, &tmp, &target, b"data").is_err());
        assert!(!tmp.exists());
        assert!(!target.exists());
    }

    #[test]
    fn successful_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        write_new_record(dir.path(), "snapshot", b"{}").unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].ends_with(".tmp"));
    }

    #[test]
    fn write_new_record_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_new_record(dir.path(), "stats", b"one").unwrap();
        let b = write_new_record(dir.path(), "stats", b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(fs::read(&a).unwrap(), b"one");
        assert_eq!(fs::read(&b).unwrap(), b"two");
    }
}
