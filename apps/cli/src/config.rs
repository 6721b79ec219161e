//! Evaluator configuration: an optional TOML file with CLI flags on top.
//!
//! ```toml
//! data = "data/generated/text_classification/test.jsonl"
//!
//! [eval]
//! max_steps = 100000
//! restore_policy = "repoll"
//!
//! [eval.best]
//! metric = "accuracy"
//! goal = "maximize"
//!
//! [model]
//! kind = "text_classification_cnn"
//! ```

use anyhow::{Context, Result};
use oncotext_eval::{BestCheckpointConfig, EvalConfig, RestorePolicy};
use oncotext_models::{ModelConfig, ModelKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Evaluator settings as written in the file; everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalSection {
    pub checkpoint_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub max_time_secs: Option<u64>,
    pub max_steps: Option<u64>,
    pub infinite_loop: Option<bool>,
    pub batch_size: Option<usize>,
    pub epochs: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub restore_policy: Option<RestorePolicy>,
    pub best: Option<BestCheckpointConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// JSONL file with the held-out examples.
    pub data: Option<PathBuf>,
    pub max_examples: Option<usize>,
    pub eval: EvalSection,
    pub model: ModelConfig,
}

impl FileConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config {}", path.display()))
    }
}

/// Flags given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<ModelKind>,
    pub checkpoint_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub data: Option<PathBuf>,
    pub max_examples: Option<usize>,
    pub max_time_secs: Option<u64>,
    pub max_steps: Option<u64>,
    pub once: bool,
    pub batch_size: Option<usize>,
    pub epochs: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub restore_policy: Option<RestorePolicy>,
    pub best: Option<BestCheckpointConfig>,
}

/// The fully resolved configuration for one `eval` run.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub eval: EvalConfig,
    pub model: ModelConfig,
    pub data: Option<PathBuf>,
    pub max_examples: Option<usize>,
}

/// Merge precedence: CLI flags, then the config file, then defaults. The
/// checkpoint directory defaults to the model's training log directory and
/// the output directory to `<checkpoint_dir>/eval`.
pub fn resolve(file: FileConfig, overrides: Overrides) -> Resolved {
    let FileConfig { data, max_examples, eval: section, mut model } = file;
    if let Some(kind) = overrides.model {
        model.kind = kind;
    }

    let checkpoint_dir = overrides
        .checkpoint_dir
        .or(section.checkpoint_dir)
        .unwrap_or_else(|| model.kind.default_log_dir());
    let output_dir = overrides.output_dir.or(section.output_dir).unwrap_or_else(|| checkpoint_dir.join("eval"));

    let mut eval = EvalConfig::new(checkpoint_dir, output_dir);
    eval.max_time_secs = overrides.max_time_secs.or(section.max_time_secs);
    eval.max_steps = overrides.max_steps.or(section.max_steps);
    eval.infinite_loop = !overrides.once && section.infinite_loop.unwrap_or(true);
    eval.batch_size = overrides.batch_size.or(section.batch_size).unwrap_or_else(|| model.batch_size());
    if let Some(epochs) = overrides.epochs.or(section.epochs) {
        eval.epochs = epochs;
    }
    if let Some(secs) = overrides.poll_interval_secs.or(section.poll_interval_secs) {
        eval.poll_interval_secs = secs;
    }
    eval.restore_policy = overrides.restore_policy.or(section.restore_policy).unwrap_or_default();
    eval.best = overrides.best.or(section.best);

    Resolved {
        eval,
        model,
        data: overrides.data.or(data),
        max_examples: overrides.max_examples.or(max_examples),
    }
}
