use crate::error::{EvalError, EvalResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// One held-out example: a token id sequence and an optional class label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub tokens: Vec<u32>,
    #[serde(default)]
    pub label: Option<u32>,
}

pub type Batch = Vec<Example>;

/// Forward-only cursor over batches. `None` means end of data.
pub type BatchCursor = Box<dyn Iterator<Item = EvalResult<Batch>> + Send>;

/// Reads the evaluation dataset. Evaluation never shuffles.
pub trait DataSource: Send + Sync {
    fn read(&self, batch_size: usize, epochs: u32) -> EvalResult<BatchCursor>;
}

/// In-memory examples, mostly for tests and small fixtures.
#[derive(Debug, Clone, Default)]
pub struct VecDataSource {
    examples: Arc<Vec<Example>>,
}

impl VecDataSource {
    #[must_use]
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples: Arc::new(examples) }
    }
}

impl DataSource for VecDataSource {
    fn read(&self, batch_size: usize, epochs: u32) -> EvalResult<BatchCursor> {
        Ok(batches(Arc::clone(&self.examples), batch_size, epochs))
    }
}

/// One `Example` per line; blank lines are skipped.
#[derive(Debug, Clone)]
pub struct JsonlDataSource {
    path: PathBuf,
    max_examples: Option<usize>,
}

impl JsonlDataSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), max_examples: None }
    }

    #[must_use]
    pub fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = Some(max_examples);
        self
    }

    pub fn load(&self) -> EvalResult<Vec<Example>> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            EvalError::Dataset(format!("cannot read dataset {}: {e}", self.path.display()))
        })?;
        let mut out = Vec::new();

        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let ex: Example = serde_json::from_str(line).map_err(|e| {
                EvalError::Dataset(format!("failed to parse jsonl line {}: {}", idx + 1, e))
            })?;
            out.push(ex);
            if self.max_examples.is_some_and(|max| out.len() >= max) {
                break;
            }
        }

        Ok(out)
    }
}

impl DataSource for JsonlDataSource {
    fn read(&self, batch_size: usize, epochs: u32) -> EvalResult<BatchCursor> {
        Ok(batches(Arc::new(self.load()?), batch_size, epochs))
    }
}

fn batches(examples: Arc<Vec<Example>>, batch_size: usize, epochs: u32) -> BatchCursor {
    let batch_size = batch_size.max(1);
    let per_epoch = examples.len().div_ceil(batch_size);
    let iter = (0..epochs).flat_map(move |_| 0..per_epoch).map(move |b| {
        let start = b * batch_size;
        let end = (start + batch_size).min(examples.len());
        Ok(examples[start..end].to_vec())
    });
    Box::new(iter)
}
