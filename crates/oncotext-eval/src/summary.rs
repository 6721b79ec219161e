//! Step-tagged metric records, appended as JSON lines to an event log.

use crate::error::{EvalError, EvalResult};
use crate::graph::Summary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const EVENT_LOG_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub step: u64,
    pub wall_time: DateTime<Utc>,
    pub values: Summary,
}

pub trait SummaryRecorder: Send {
    fn record(&mut self, summary: &Summary, step: u64) -> EvalResult<()>;
}

/// Append-only event log in an output directory.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    last_step: Option<u64>,
}

impl EventLog {
    /// Open (creating if needed) `<output_dir>/events.jsonl`.
    pub fn open(output_dir: &Path) -> EvalResult<Self> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(EVENT_LOG_FILE);
        let last_step = if path.exists() { read_events(&path)?.last().map(|r| r.step) } else { None };
        Ok(Self { path, last_step })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SummaryRecorder for EventLog {
    fn record(&mut self, summary: &Summary, step: u64) -> EvalResult<()> {
        if self.last_step.is_some_and(|last| step < last) {
            warn!(step, last = ?self.last_step, "event log step went backwards");
        }

        let record = SummaryRecord { step, wall_time: Utc::now(), values: summary.clone() };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        f.write_all(line.as_bytes())?;
        f.flush()?;

        self.last_step = Some(step);
        debug!(step, path = %self.path.display(), "recorded summary");
        Ok(())
    }
}

/// Read every record of an event log, in file order.
pub fn read_events(path: &Path) -> EvalResult<Vec<SummaryRecord>> {
    let contents = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| {
            EvalError::Other(anyhow::anyhow!("bad event at {}:{}: {e}", path.display(), idx + 1))
        })?;
        out.push(record);
    }
    Ok(out)
}
