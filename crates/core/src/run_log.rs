//! Per-run NDJSON logs.
//!
//! A single JSON `tracing` layer is installed once per process and writes into
//! the file of whichever run is open; outside a run, events are dropped.
//! Filter precedence: `SEISHIN_LOG`, then `RUST_LOG`, then `debug`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::Error;

static ACTIVE_FILE: OnceLock<ActiveFile> = OnceLock::new();
static SUBSCRIBER: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Backup,
    Restore,
    Migrate,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Backup => "backup",
            RunKind::Restore => "restore",
            RunKind::Migrate => "migrate",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one file events are currently routed to, if any.
#[derive(Debug, Default)]
struct ActiveFile {
    slot: Mutex<Option<BufWriter<File>>>,
}

impl ActiveFile {
    fn slot(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, path: &Path) -> std::io::Result<()> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "another run log is open",
            ));
        }
        let file = OpenOptions::new().create_new(true).write(true).open(path)?;
        *slot = Some(BufWriter::new(file));
        Ok(())
    }

    fn close(&self) -> std::io::Result<()> {
        let Some(mut writer) = self.slot().take() else {
            return Ok(());
        };
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

/// Borrowed for the duration of one formatted event.
pub struct EventWriter<'a> {
    slot: MutexGuard<'a, Option<BufWriter<File>>>,
}

impl Write for EventWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.slot.as_mut() {
            Some(writer) => writer.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.slot.as_mut().map_or(Ok(()), |w| w.flush())
    }
}

impl<'a> MakeWriter<'a> for &'static ActiveFile {
    type Writer = EventWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter { slot: self.slot() }
    }
}

fn env_filter(seishin_log: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    seishin_log
        .or(rust_log)
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new("debug"))
}

fn active_file() -> &'static ActiveFile {
    ACTIVE_FILE.get_or_init(ActiveFile::default)
}

/// Install the JSON layer. Later calls, or an already installed subscriber
/// (tests, an embedding app), leave things as they are.
pub fn init_run_logging() {
    SUBSCRIBER.get_or_init(|| {
        let filter = env_filter(
            std::env::var("SEISHIN_LOG").ok().as_deref(),
            std::env::var("RUST_LOG").ok().as_deref(),
        );
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_writer(active_file());
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

/// An open run file. Dropping it without [`RunLog::finish`] records the run
/// as abandoned.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    kind: RunKind,
    run_id: String,
    started: Instant,
    finished: bool,
}

impl RunLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Record the outcome and close the file.
    pub fn finish<T>(mut self, outcome: &crate::Result<T>) {
        match outcome {
            Ok(_) => self.record_finish("succeeded", None),
            Err(e) => self.record_finish("failed", Some(e)),
        }
    }

    fn record_finish(&mut self, status: &'static str, err: Option<&Error>) {
        self.finished = true;
        let duration_ms = self.started.elapsed().as_millis() as u64;
        match err {
            None => info!(
                event = "run.finish",
                kind = %self.kind,
                run_id = %self.run_id,
                status,
                duration_ms,
                "run.finish"
            ),
            Some(e) => error!(
                event = "run.finish",
                kind = %self.kind,
                run_id = %self.run_id,
                status,
                duration_ms,
                retryable = e.is_retryable(),
                error = %e,
                "run.finish"
            ),
        }
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        if !self.finished {
            self.record_finish("abandoned", None);
        }
        let _ = active_file().close();
    }
}

/// Open `<log_dir>/seishin-<kind>-<utc>-<run_id>.ndjson` and route events
/// into it until the returned [`RunLog`] is finished or dropped. `log_dir` is
/// `SEISHIN_LOG_DIR` when set, otherwise `<data_dir>/logs`.
pub fn start_run_log(kind: RunKind, run_id: &str, data_dir: &Path) -> std::io::Result<RunLog> {
    init_run_logging();

    let log_dir = match std::env::var_os("SEISHIN_LOG_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => data_dir.join("logs"),
    };
    std::fs::create_dir_all(&log_dir)?;

    let path = log_dir.join(format!(
        "seishin-{kind}-{}-{}.ndjson",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        file_safe(run_id)
    ));
    active_file().open(&path)?;

    info!(event = "run.start", kind = %kind, run_id, "run.start");
    Ok(RunLog {
        path,
        kind,
        run_id: run_id.to_string(),
        started: Instant::now(),
        finished: false,
    })
}

fn file_safe(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seishin_log_wins_over_rust_log() {
        assert_eq!(env_filter(Some("info"), Some("debug")).to_string(), "info");
        assert_eq!(env_filter(None, Some("warn")).to_string(), "warn");
        assert_eq!(env_filter(None, None).to_string(), "debug");
    }

    #[test]
    fn run_ids_are_made_file_safe() {
        assert_eq!(file_safe("tsk 1/2"), "tsk_1_2");
        assert_eq!(file_safe("tsk_a-b.c"), "tsk_a-b.c");
    }

    #[test]
    fn run_file_is_ndjson_with_start_and_finish() {
        let temp = tempfile::tempdir().expect("create tempdir");
        let log = start_run_log(RunKind::Migrate, "tsk_test", temp.path()).expect("start");
        assert_eq!(log.path().parent(), Some(temp.path().join("logs").as_path()));
        assert!(
            log.path()
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("seishin-migrate-"))
        );

        tracing::debug!(event = "migrate.apply", version = 2, "migrate.apply");
        let path = log.path().to_path_buf();
        log.finish(&Ok::<(), Error>(()));

        let text = std::fs::read_to_string(&path).expect("read run log");
        let events: Vec<String> = text
            .lines()
            .map(|line| {
                let v: serde_json::Value = serde_json::from_str(line).expect("json line");
                assert!(v.get("timestamp").is_some());
                assert!(v.get("level").is_some());
                v["fields"]["event"].as_str().unwrap_or_default().to_string()
            })
            .collect();
        // Another test's subscriber may have won the global slot.
        if !events.is_empty() {
            assert_eq!(events.first().map(String::as_str), Some("run.start"));
            assert_eq!(events.last().map(String::as_str), Some("run.finish"));
        }
    }
}
