use crate::graph::Summary;
use crate::layout::CheckpointId;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Stop,
}

/// Observes one evaluation session.
pub trait SessionHook: Send {
    fn after_restore(&mut self, _checkpoint: &CheckpointId) {}

    fn after_step(&mut self, _batch: u64, _summary: &Summary) -> HookAction {
        HookAction::Continue
    }

    fn end(&mut self, _checkpoint: &CheckpointId, _summary: Option<&Summary>) {}
}

/// Stops the pass after a fixed number of batches.
#[derive(Debug, Clone, Copy)]
pub struct StepLimitHook {
    max_batches: u64,
}

impl StepLimitHook {
    #[must_use]
    pub fn new(max_batches: u64) -> Self {
        Self { max_batches }
    }
}

impl SessionHook for StepLimitHook {
    fn after_step(&mut self, batch: u64, _summary: &Summary) -> HookAction {
        if batch >= self.max_batches {
            HookAction::Stop
        } else {
            HookAction::Continue
        }
    }
}

/// Logs the running summary every `every` batches.
#[derive(Debug, Clone)]
pub struct ProgressLogHook {
    every: u64,
    step: u64,
}

impl ProgressLogHook {
    #[must_use]
    pub fn new(every: u64) -> Self {
        Self { every: every.max(1), step: 0 }
    }
}

impl SessionHook for ProgressLogHook {
    fn after_restore(&mut self, checkpoint: &CheckpointId) {
        self.step = checkpoint.step();
    }

    fn after_step(&mut self, batch: u64, summary: &Summary) -> HookAction {
        if batch % self.every == 0 {
            info!(step = self.step, batch, values = ?summary.values(), "evaluation progress");
        }
        HookAction::Continue
    }
}
