use std::fs;
use std::io;
use std::path::Path;

use chrono::Utc;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "ENRICH_LOG";

/// Initialize structured logging to stderr, plus a per-run
/// `processing_<ts>.log` under `log_dir` when given.
///
/// `ENRICH_LOG` wins when set; otherwise `debug` with `--verbose`, `info`
/// without. Safe to call more than once. Keep the returned guard alive
/// until exit so the file writer flushes.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let fallback = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));

    let console = fmt::layer().with_target(false).with_writer(io::stderr);

    let (file, guard) = match log_dir.map(run_log_writer) {
        Some(Ok((writer, guard))) => (
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(writer),
            ),
            Some(guard),
        ),
        Some(Err(e)) => {
            eprintln!("Could not open run log file, logging to stderr only: {e}");
            (None, None)
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .try_init();
    guard
}

/// Non-blocking writer on a fresh `processing_<ts>.log` in `dir`.
fn run_log_writer(dir: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)?;
    let name = format!("processing_{}.log", Utc::now().format("%Y%m%d_%H%M%S"));
    let appender = tracing_appender::rolling::never(dir, name);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn run_log_lands_in_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("reports");

        let (mut writer, guard) = run_log_writer(&log_dir).unwrap();
        writer.write_all(b"stage translating started\n").unwrap();
        drop(guard);

        let entries: Vec<_> = fs::read_dir(&log_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("processing_") && name.ends_with(".log"));
        let contents = fs::read_to_string(&entries[0]).unwrap();
        assert!(contents.contains("stage translating started"));
    }
}
