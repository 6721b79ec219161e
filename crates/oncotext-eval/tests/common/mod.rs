//! Shared fixtures for the evaluation integration tests.
//!
//! `ScalarGraph` has a single variable `w` and reports it, together with the
//! number of examples seen so far, after every batch. That makes it easy to
//! check which checkpoint was restored in each pass.

#![allow(dead_code)]

use oncotext_eval::{
    BatchCursor, CheckpointId, CheckpointMeta, CheckpointWriter, EvalGraph, EvalResult, Example, GraphBuilder,
    ParameterSet, SessionHook, StepLimitHook, StepOutcome, Summary, Tensor,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct ScalarGraph {
    params: ParameterSet,
    cursor: Option<BatchCursor>,
    examples: usize,
}

impl EvalGraph for ScalarGraph {
    fn variables(&self) -> &ParameterSet {
        &self.params
    }

    fn variables_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn run_step(&mut self) -> EvalResult<StepOutcome> {
        let Some(batch) = self.cursor.as_mut().and_then(|c| c.next()) else {
            return Ok(StepOutcome::Exhausted);
        };
        self.examples += batch?.len();
        let w = f64::from(self.params.require("w")?.data()[0]);
        Ok(StepOutcome::Summary(Summary::new().with("w", w).with("examples", self.examples as f64)))
    }
}

#[derive(Clone)]
pub struct ScalarBuilder {
    pub graphs_built: Arc<AtomicUsize>,
    pub shape: Vec<usize>,
    pub step_limit: Option<u64>,
}

impl Default for ScalarBuilder {
    fn default() -> Self {
        Self { graphs_built: Arc::new(AtomicUsize::new(0)), shape: vec![1], step_limit: None }
    }
}

impl ScalarBuilder {
    pub fn built(&self) -> usize {
        self.graphs_built.load(Ordering::SeqCst)
    }
}

impl GraphBuilder for ScalarBuilder {
    fn name(&self) -> &str {
        "scalar"
    }

    fn create_graph(&self, data: Option<BatchCursor>, _batch_size: usize) -> EvalResult<Box<dyn EvalGraph>> {
        self.graphs_built.fetch_add(1, Ordering::SeqCst);
        let mut params = ParameterSet::new();
        params.declare("w", self.shape.clone());
        Ok(Box::new(ScalarGraph { params, cursor: data, examples: 0 }))
    }

    fn create_hooks(&self, _graph: &dyn EvalGraph) -> Vec<Box<dyn SessionHook>> {
        self.step_limit
            .map(|n| vec![Box::new(StepLimitHook::new(n)) as Box<dyn SessionHook>])
            .unwrap_or_default()
    }
}

pub fn examples(n: u32) -> Vec<Example> {
    (0..n).map(|i| Example { tokens: vec![i], label: None }).collect()
}

/// Write a complete single-variable checkpoint with `w = value`.
pub fn write_checkpoint(dir: &Path, step: u64, value: f32) -> CheckpointId {
    let mut params = ParameterSet::new();
    params.insert("w", Tensor::new(vec![1], vec![value]).unwrap());
    CheckpointWriter::new(dir, "model.ckpt")
        .with_shards(2)
        .save(&params, &CheckpointMeta::new("scalar", step))
        .unwrap()
}

/// Overwrite a shard so its checksum no longer matches the index.
pub fn corrupt(checkpoint: &CheckpointId) {
    std::fs::write(checkpoint.shard_path(0, 2), b"garbage").unwrap();
}

/// A fake trainer driven by the evaluator's sleeps: each sleep pops one
/// entry and, if it is `Some((step, value))`, writes that checkpoint.
pub fn trainer_schedule(
    dir: &Path,
    schedule: Vec<Option<(u64, f32)>>,
) -> impl FnMut(Duration) + Send + 'static {
    let dir: PathBuf = dir.to_path_buf();
    let queue = Arc::new(Mutex::new(VecDeque::from(schedule)));
    move |_| {
        let next = queue.lock().unwrap().pop_front();
        if let Some(Some((step, value))) = next {
            write_checkpoint(&dir, step, value);
        }
    }
}
