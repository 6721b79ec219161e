use crate::checkpoint::CheckpointSource;
use crate::error::{EvalError, EvalResult};
use crate::graph::{EvalGraph, StepOutcome, Summary};
use crate::hooks::{HookAction, SessionHook};
use crate::layout::CheckpointId;

/// One graph, one restored checkpoint and one data cursor, for exactly one
/// evaluation pass. Dropped when the pass ends.
pub struct EvalSession {
    graph: Box<dyn EvalGraph>,
    hooks: Vec<Box<dyn SessionHook>>,
    checkpoint: Option<CheckpointId>,
    batches: u64,
}

impl EvalSession {
    #[must_use]
    pub fn new(graph: Box<dyn EvalGraph>, hooks: Vec<Box<dyn SessionHook>>) -> Self {
        Self { graph, hooks, checkpoint: None, batches: 0 }
    }

    /// Load `checkpoint` into the graph. On failure the session stays
    /// unrestored and refuses to run steps.
    pub fn restore(&mut self, source: &dyn CheckpointSource, checkpoint: &CheckpointId) -> EvalResult<()> {
        source.load(checkpoint, self.graph.variables_mut())?;
        self.checkpoint = Some(checkpoint.clone());
        for hook in &mut self.hooks {
            hook.after_restore(checkpoint);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_restored(&self) -> bool {
        self.checkpoint.is_some()
    }

    #[must_use]
    pub fn checkpoint(&self) -> Option<&CheckpointId> {
        self.checkpoint.as_ref()
    }

    #[must_use]
    pub fn graph(&self) -> &dyn EvalGraph {
        self.graph.as_ref()
    }

    pub fn graph_mut(&mut self) -> &mut dyn EvalGraph {
        self.graph.as_mut()
    }

    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn run_step(&mut self) -> EvalResult<StepOutcome> {
        if !self.is_restored() {
            return Err(EvalError::NotRestored);
        }
        self.graph.run_step()
    }

    /// Count a completed step and let hooks decide whether to continue.
    pub(crate) fn after_step(&mut self, summary: &Summary) -> HookAction {
        self.batches += 1;
        let mut action = HookAction::Continue;
        for hook in &mut self.hooks {
            if hook.after_step(self.batches, summary) == HookAction::Stop {
                action = HookAction::Stop;
            }
        }
        action
    }

    pub(crate) fn end(mut self, summary: Option<&Summary>) {
        if let Some(checkpoint) = self.checkpoint.take() {
            for hook in &mut self.hooks {
                hook.end(&checkpoint, summary);
            }
        }
    }
}
