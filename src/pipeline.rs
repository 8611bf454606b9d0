//! End-to-end orchestration of one enrichment run.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::{Span, info, info_span, warn};
use uuid::Uuid;

use crate::config::EnrichConfig;
use crate::error::{Collaborator, EnrichError, Result};
use crate::record::Record;
use crate::report::{ErrorReport, ErrorSummary, ReportWriter};
use crate::runner::{BatchRunner, ItemProcessor, RunSummary, StageRun};
use crate::selection::SampleSelector;
use crate::snapshot::{FileSnapshotStore, RunStats, SharedStore};
use crate::state_machine::ProcessingStage;

/// Field set on every consolidated record naming the stage that produced it.
pub const ENRICHMENT_FIELD: &str = "enrichment";

/// Results of both processing stages merged into one dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Consolidated {
    pub records: Vec<Record>,
    pub translated: usize,
    pub generated: usize,
}

impl Consolidated {
    /// Translated records first, then generated ones, each tagged with its
    /// origin.
    pub fn merge(translated: Vec<Record>, generated: Vec<Record>) -> Self {
        let counts = (translated.len(), generated.len());
        let tag = |origin: &'static str| {
            move |mut record: Record| {
                record.fields.insert(ENRICHMENT_FIELD.to_string(), json!(origin));
                record
            }
        };
        let records = translated
            .into_iter()
            .map(tag("translation"))
            .chain(generated.into_iter().map(tag("generation")))
            .collect();

        Self {
            records,
            translated: counts.0,
            generated: counts.1,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Final consumer of consolidated results.
pub trait ResultSink {
    /// Write out `consolidated` and return where it went.
    fn export(&self, consolidated: &Consolidated) -> Result<String>;
}

/// Writes one JSON record per line to a file that must not exist yet.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonlSink {
    fn export(&self, consolidated: &Consolidated) -> Result<String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in &consolidated.records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(self.path.display().to_string())
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub run_id: Uuid,
    /// `None` when the stage was already finished by a recovered run.
    pub translation: Option<RunSummary>,
    pub generation: Option<RunSummary>,
    pub consolidated: usize,
    pub export_location: String,
    pub stats: RunStats,
    pub errors: ErrorSummary,
    pub stats_path: PathBuf,
    pub error_report_path: PathBuf,
}

type StageHook = Box<dyn Fn(ProcessingStage)>;

/// Runs loading → selecting → translating → generating → consolidating →
/// exporting → completed, resuming from the latest checkpoint when there is
/// one.
///
/// Results of items settled before a restart are not held in any snapshot,
/// so a resumed run only exports what it produced itself.
pub struct Pipeline {
    run_id: Uuid,
    config: EnrichConfig,
    runner: BatchRunner,
    selector: SampleSelector,
    reports: ReportWriter,
    stage_hook: Option<StageHook>,
    span: Span,
}

impl Pipeline {
    pub fn new(config: EnrichConfig, store: SharedStore) -> Self {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        Self::assemble(run_id, span, config, store)
    }

    /// Pipeline checkpointing to `config.checkpoint_dir`.
    pub fn with_file_store(config: EnrichConfig) -> Self {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        let store = Arc::new(FileSnapshotStore::new(
            &config.checkpoint_dir,
            info_span!(parent: &span, "snapshots"),
        ));
        Self::assemble(run_id, span, config, store)
    }

    fn assemble(run_id: Uuid, span: Span, config: EnrichConfig, store: SharedStore) -> Self {
        let runner = BatchRunner::new(store, info_span!(parent: &span, "runner"))
            .with_stop_on_critical(config.stop_on_critical)
            .with_failed_id_cap(config.failed_id_cap);
        let selector = SampleSelector::new(config.random_seed, info_span!(parent: &span, "selection"));
        let reports = ReportWriter::new(&config.report_dir, info_span!(parent: &span, "reports"));

        Self {
            run_id,
            config,
            runner,
            selector,
            reports,
            stage_hook: None,
            span,
        }
    }

    /// Called with each stage as the pipeline enters it.
    pub fn with_stage_hook(mut self, hook: impl Fn(ProcessingStage) + 'static) -> Self {
        self.stage_hook = Some(Box::new(hook));
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    pub async fn run<T, G, S>(
        &mut self,
        pool: Vec<Record>,
        translator: &T,
        generator: &G,
        sink: &S,
    ) -> Result<PipelineOutcome>
    where
        T: ItemProcessor<Record, Output = Record>,
        G: ItemProcessor<Record, Output = Record>,
        S: ResultSink,
    {
        let span = self.span.clone();
        let recovery = self.runner.recovery();
        if recovery.recovered_stage() == Some(ProcessingStage::Completed) {
            info!(parent: &span, "Previous run completed, starting fresh");
            self.runner.start_fresh();
        } else if recovery.can_recover() {
            info!(
                parent: &span,
                stage = recovery.recovered_stage_name(),
                settled = recovery.processed_ids().len(),
                failed = recovery.failed_ids().len(),
                "Resuming from checkpoint"
            );
            if self.selector.seed().is_none() {
                warn!(parent: &span, "Resuming without a random seed; selected sets may differ from the interrupted run");
            }
        }
        self.runner.tracker_mut().stats_mut().mark_started();

        let datasets = dataset_label(&pool);
        self.enter(ProcessingStage::Loading, Some(&datasets))?;
        info!(parent: &span, items = pool.len(), %datasets, "Item pool loaded");

        self.enter(ProcessingStage::Selecting, None)?;
        let (translation_set, generation_set) = self.select(&pool)?;

        let translation = if self.enter(ProcessingStage::Translating, None)? {
            let run = StageRun::new(ProcessingStage::Translating, Collaborator::Translation)
                .with_batch_size(self.config.batch_size);
            Some(self.runner.run(translation_set, translator, run).await?)
        } else {
            None
        };

        let generation = if self.enter(ProcessingStage::Generating, None)? {
            let run = StageRun::new(ProcessingStage::Generating, Collaborator::Generation)
                .with_batch_size(self.config.batch_size);
            Some(self.runner.run(generation_set, generator, run).await?)
        } else {
            None
        };

        let (translation, translated) = match translation {
            Some(outcome) => (Some(outcome.summary), outcome.results),
            None => (None, Vec::new()),
        };
        let (generation, generated) = match generation {
            Some(outcome) => (Some(outcome.summary), outcome.results),
            None => (None, Vec::new()),
        };

        self.enter(ProcessingStage::Consolidating, None)?;
        let consolidated = Consolidated::merge(translated, generated);
        info!(
            parent: &span,
            total = consolidated.len(),
            translated = consolidated.translated,
            generated = consolidated.generated,
            "Results consolidated"
        );

        self.enter(ProcessingStage::Exporting, None)?;
        let export_location = sink.export(&consolidated)?;
        info!(parent: &span, location = %export_location, records = consolidated.len(), "Results exported");

        self.runner.tracker_mut().stats_mut().mark_ended();
        self.enter(ProcessingStage::Completed, None)?;

        let snapshot = self.runner.tracker().snapshot();
        let report = ErrorReport::from_snapshot(snapshot);
        let stats_path = self.reports.write_stats(&snapshot.stats)?;
        let error_report_path = self.reports.write_error_report(&report)?;
        let stats = snapshot.stats.clone();

        self.runner.recovery_mut().clear();
        info!(
            parent: &span,
            total_items = stats.total_items,
            external_calls = stats.external_calls,
            errors = report.summary.total_errors,
            "Pipeline completed"
        );

        Ok(PipelineOutcome {
            run_id: self.run_id,
            translation,
            generation,
            consolidated: consolidated.len(),
            export_location,
            stats,
            errors: report.summary,
            stats_path,
            error_report_path,
        })
    }

    /// Move into `stage` and checkpoint, unless the recovered run is already
    /// past it. Returns whether the stage is live.
    fn enter(&mut self, stage: ProcessingStage, dataset: Option<&str>) -> Result<bool> {
        let recovery = self.runner.recovery();
        if recovery.can_recover() && !recovery.should_resume_from_stage(stage) {
            info!(parent: &self.span, %stage, "Skipping stage already passed by recovered run");
            return Ok(false);
        }

        if let Some(hook) = &self.stage_hook {
            hook(stage);
        }
        self.runner.tracker_mut().advance_stage(stage, dataset);
        self.runner.checkpoint(Some(json!({
            "stage": stage.as_str(),
            "run_id": self.run_id.to_string(),
        })))?;
        Ok(true)
    }

    /// Selection always reruns, since the sets are not persisted; a seed
    /// makes it reproduce the interrupted run's sets.
    fn select(&self, pool: &[Record]) -> Result<(Vec<Record>, Vec<Record>)> {
        let sizes = [self.config.translation_count, self.config.generation_count];
        let mut subsets = self.selector.select_disjoint(pool, &sizes)?.into_iter();
        let translation = subsets.next().unwrap_or_default();
        let generation = subsets.next().unwrap_or_default();

        let check = self.selector.validate_no_overlap(&translation, &generation);
        if !check.disjoint {
            return Err(EnrichError::Overlap(check.description));
        }

        let stats = self.selector.selection_stats(pool, &translation, &generation);
        info!(
            parent: &self.span,
            total = stats.total,
            translation = stats.first_count,
            generation = stats.second_count,
            unused = stats.unused,
            distribution = ?stats.pool_distribution,
            "Selection stats"
        );
        Ok((translation, generation))
    }
}

/// Distinct source datasets in the pool, sorted and comma-joined.
fn dataset_label(pool: &[Record]) -> String {
    let mut names: Vec<&str> = pool.iter().map(|r| r.source_dataset.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    names.join(",")
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::error::Fault;
    use crate::snapshot::SnapshotStore;

    struct Translate;

    impl ItemProcessor<Record> for Translate {
        type Output = Record;

        async fn process(&self, item: &Record) -> std::result::Result<Record, Fault> {
            let mut out = item.clone();
            out.text = format!("[pt] {}", item.text);
            Ok(out)
        }
    }

    /// Generation that fails the first item it sees with `fault`, if any.
    struct Generate {
        first_fault: Option<Fault>,
        seen: Cell<usize>,
    }

    impl Generate {
        fn ok() -> Self {
            Self {
                first_fault: None,
                seen: Cell::new(0),
            }
        }
    }

    impl ItemProcessor<Record> for Generate {
        type Output = Record;

        async fn process(&self, item: &Record) -> std::result::Result<Record, Fault> {
            self.seen.set(self.seen.get() + 1);
            if self.seen.get() == 1 {
                if let Some(fault) = &self.first_fault {
                    return Err(fault.clone());
                }
            }
            let mut out = item.clone();
            out.text = format!("Q: {}", item.text);
            Ok(out)
        }
    }

    #[derive(Default)]
    struct Collect {
        exported: RefCell<Vec<Record>>,
    }

    impl ResultSink for Collect {
        fn export(&self, consolidated: &Consolidated) -> Result<String> {
            self.exported
                .borrow_mut()
                .extend(consolidated.records.iter().cloned());
            Ok("memory".into())
        }
    }

    fn pool(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let dataset = if i % 2 == 0 { "medqa" } else { "pubmedqa" };
                Record::new(format!("r{i:02}"), dataset, format!("question {i}"))
            })
            .collect()
    }

    fn config(dir: &Path) -> EnrichConfig {
        EnrichConfig {
            checkpoint_dir: dir.join("checkpoints"),
            report_dir: dir.join("reports"),
            batch_size: 2,
            translation_count: 3,
            generation_count: 4,
            random_seed: Some(7),
            stop_on_critical: true,
            failed_id_cap: 20,
        }
    }

    #[tokio::test]
    async fn full_run_exports_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Collect::default();
        let mut pipeline = Pipeline::with_file_store(config(dir.path()));

        let outcome = pipeline
            .run(pool(10), &Translate, &Generate::ok(), &sink)
            .await
            .unwrap();

        assert_eq!(outcome.consolidated, 7);
        assert_eq!(outcome.translation.unwrap().succeeded, 3);
        assert_eq!(outcome.generation.unwrap().succeeded, 4);
        assert_eq!(outcome.stats.external_calls, 7);
        assert!(outcome.stats.ended_at.is_some());
        assert!(outcome.stats_path.exists());
        assert!(outcome.error_report_path.exists());

        let exported = sink.exported.borrow();
        assert_eq!(exported.len(), 7);
        assert!(exported[..3].iter().all(|r| r.fields[ENRICHMENT_FIELD] == "translation"));
        assert!(exported[3..].iter().all(|r| r.text.starts_with("Q: ")));

        let store = FileSnapshotStore::new(dir.path().join("checkpoints"), Span::none());
        let latest = store.load_latest().unwrap().unwrap();
        assert_eq!(latest.stage, "completed");
        assert_eq!(latest.dataset.as_deref(), Some("medqa,pubmedqa"));
        assert_eq!(latest.settled.len(), 7);
    }

    #[tokio::test]
    async fn insufficient_pool_fails_before_processing() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Generate::ok();
        let mut pipeline = Pipeline::with_file_store(config(dir.path()));

        let err = pipeline
            .run(pool(5), &Translate, &generator, &Collect::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EnrichError::InsufficientItems {
                requested: 7,
                available: 5
            }
        ));
        assert_eq!(generator.seen.get(), 0);
    }

    #[tokio::test]
    async fn resumes_after_critical_fault() {
        let dir = tempfile::tempdir().unwrap();

        let failing = Generate {
            first_fault: Some(Fault::authentication("key revoked")),
            seen: Cell::new(0),
        };
        let mut first = Pipeline::with_file_store(config(dir.path()));
        let err = first
            .run(pool(10), &Translate, &failing, &Collect::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::CriticalFault { .. }));
        assert_eq!(failing.seen.get(), 2);

        let generator = Generate::ok();
        let sink = Collect::default();
        let mut second = Pipeline::with_file_store(config(dir.path()));
        let outcome = second
            .run(pool(10), &Translate, &generator, &sink)
            .await
            .unwrap();

        assert!(outcome.translation.is_none());
        let generation = outcome.generation.unwrap();
        assert_eq!(generation.skipped, 2);
        assert_eq!(generation.succeeded, 2);
        assert_eq!(generator.seen.get(), 2);
        assert_eq!(outcome.consolidated, 2);
        assert_eq!(outcome.errors.total_errors, 1);
        assert_eq!(outcome.stats.failed_generations, 1);
    }

    #[tokio::test]
    async fn completed_run_is_not_resumed() {
        let dir = tempfile::tempdir().unwrap();

        Pipeline::with_file_store(config(dir.path()))
            .run(pool(10), &Translate, &Generate::ok(), &Collect::default())
            .await
            .unwrap();

        let sink = Collect::default();
        let outcome = Pipeline::with_file_store(config(dir.path()))
            .run(pool(10), &Translate, &Generate::ok(), &sink)
            .await
            .unwrap();

        assert_eq!(outcome.translation.unwrap().skipped, 0);
        assert_eq!(sink.exported.borrow().len(), 7);
        assert_eq!(outcome.stats.total_items, 7);
    }

    #[tokio::test]
    async fn stage_hook_sees_every_live_stage() {
        let dir = tempfile::tempdir().unwrap();
        let seen = std::rc::Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let mut pipeline = Pipeline::with_file_store(config(dir.path()))
            .with_stage_hook(move |stage| log.borrow_mut().push(stage));

        pipeline
            .run(pool(10), &Translate, &Generate::ok(), &Collect::default())
            .await
            .unwrap();

        assert_eq!(*seen.borrow(), ProcessingStage::ALL[1..].to_vec());
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_record_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path().join("out/enriched.jsonl"));
        let consolidated = Consolidated::merge(pool(2), pool(1));

        sink.export(&consolidated).unwrap();
        let contents = fs::read_to_string(sink.path()).unwrap();
        assert_eq!(contents.lines().count(), 3);
        let last: Record = serde_json::from_str(contents.lines().last().unwrap()).unwrap();
        assert_eq!(last.fields[ENRICHMENT_FIELD], "generation");

        assert!(sink.export(&consolidated).is_err());
    }

    #[test]
    fn dataset_label_is_sorted_and_distinct() {
        assert_eq!(dataset_label(&pool(4)), "medqa,pubmedqa");
        assert_eq!(dataset_label(&[]), "");
    }
}
