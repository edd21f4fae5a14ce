//! Structured execution log, JSON lines per run.
//!
//! A navigation run writes one self-contained JSON object per step: which
//! strategy was tried, what it proposed, whether the loop guard skipped it,
//! whether the screen changed, and how the run ended. Capture and monitor
//! lifecycle events land in the same file. Every line carries an RFC 3339
//! timestamp, and navigation lines carry the run id.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::history::Action;
use crate::navigation::{Outcome, Strategy};

/// A structured event in the execution log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// All event types that can appear in the execution log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    NavigationStarted {
        app_id: String,
        timeout_secs: u64,
    },
    /// A strategy had nothing to offer this pass.
    StrategySkipped {
        strategy: Strategy,
        reason: String,
    },
    ActionProposed {
        strategy: Strategy,
        action: Action,
    },
    /// The loop guard refused a repeat of the previous action.
    LoopSkipped {
        strategy: Strategy,
        target: String,
    },
    ActionExecuted {
        strategy: Strategy,
        command: String,
        accepted: bool,
    },
    ScreenChanged {
        strategy: Strategy,
        changed: bool,
    },
    Backgrounded {
        app_id: String,
    },
    NavigationFinished {
        outcome: Outcome,
        elapsed_ms: u64,
        actions_executed: usize,
        loops_skipped: usize,
    },
    CaptureStarted {
        path: String,
    },
    CaptureStopped {
        path: String,
        persisted: bool,
    },
    MonitorStopped {
        source: String,
        status: String,
    },
}

/// Writer for JSON lines execution logs.
pub struct ExecutionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl ExecutionLog {
    /// Open (or create) the log at `path`, appending to existing content.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Log an event that belongs to no particular run.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        self.write(None, event)
    }

    pub fn log_run(&self, run_id: Uuid, event: LogEvent) -> Result<()> {
        self.write(Some(run_id), event)
    }

    fn write(&self, run_id: Option<Uuid>, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: Local::now(),
            run_id,
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "execution log");

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Log to an optional journal; failures only warn.
pub(crate) fn journal(log: Option<&ExecutionLog>, run_id: Uuid, event: LogEvent) {
    let Some(log) = log else { return };
    if let Err(e) = log.log_run(run_id, event) {
        warn!(error = %e, path = %log.path().display(), "execution log write failed");
    }
}
