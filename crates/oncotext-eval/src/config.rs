use crate::error::{EvalError, EvalResult};
use crate::promote::DEFAULT_BEST_NAME;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// What to do when a checkpoint cannot be restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    /// Stop the evaluator with the restore error.
    #[default]
    Abort,
    /// Log it, skip that step and wait for a newer checkpoint. Only
    /// meaningful in continuous mode.
    Repoll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGoal {
    Minimize,
    Maximize,
}

impl MetricGoal {
    #[must_use]
    pub fn improves(self, candidate: f64, best: f64) -> bool {
        match self {
            Self::Minimize => candidate < best,
            Self::Maximize => candidate > best,
        }
    }
}

/// When a pass's metric improves on the best so far, copy its checkpoint to
/// `<output_dir>/<name>.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestCheckpointConfig {
    pub metric: String,
    pub goal: MetricGoal,
    #[serde(default = "default_best_name")]
    pub name: String,
}

fn default_best_name() -> String {
    DEFAULT_BEST_NAME.to_string()
}

/// Evaluator settings, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Trainer's log directory, where checkpoints appear.
    pub checkpoint_dir: PathBuf,
    /// Where the event log and the best checkpoint go.
    pub output_dir: PathBuf,
    /// Wall-clock limit in seconds; unlimited when absent.
    #[serde(default)]
    pub max_time_secs: Option<u64>,
    /// Stop once a checkpoint at or past this step has been evaluated.
    #[serde(default)]
    pub max_steps: Option<u64>,
    /// Keep waiting for new checkpoints after each pass.
    #[serde(default = "default_true")]
    pub infinite_loop: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub restore_policy: RestorePolicy,
    #[serde(default)]
    pub best: Option<BestCheckpointConfig>,
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    1
}

fn default_epochs() -> u32 {
    1
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl EvalConfig {
    #[must_use]
    pub fn new(checkpoint_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            output_dir: output_dir.into(),
            max_time_secs: None,
            max_steps: None,
            infinite_loop: true,
            batch_size: default_batch_size(),
            epochs: default_epochs(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            restore_policy: RestorePolicy::Abort,
            best: None,
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn max_time(&self) -> Option<Duration> {
        self.max_time_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> EvalResult<()> {
        if self.checkpoint_dir.as_os_str().is_empty() {
            return Err(EvalError::InvalidConfig("checkpoint_dir is required".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(EvalError::InvalidConfig("output_dir is required".to_string()));
        }
        if self.batch_size == 0 {
            return Err(EvalError::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        if self.epochs == 0 {
            return Err(EvalError::InvalidConfig("epochs must be >= 1".to_string()));
        }
        if self.infinite_loop && self.poll_interval_secs == 0 {
            return Err(EvalError::InvalidConfig("poll_interval_secs must be >= 1".to_string()));
        }
        if let Some(best) = &self.best {
            if best.metric.trim().is_empty() {
                return Err(EvalError::InvalidConfig("best.metric is required".to_string()));
            }
            if best.name.trim().is_empty() || best.name.contains(std::path::is_separator) {
                return Err(EvalError::InvalidConfig(format!("invalid best checkpoint name '{}'", best.name)));
            }
        }
        Ok(())
    }
}
