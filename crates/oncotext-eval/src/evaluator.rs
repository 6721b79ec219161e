//! Continuous evaluation of a concurrently running trainer's checkpoints.
//!
//! Each pass waits for a checkpoint newer than the last one evaluated, builds
//! a brand-new graph, restores the checkpoint into it, runs the dataset to
//! exhaustion and records the last summary under the checkpoint's step.
//! The trainer and evaluator share nothing but the checkpoint directory, so
//! waiting is a plain fixed-interval poll.

use crate::checkpoint::{CheckpointDir, CheckpointSource};
use crate::clock::{Clock, StopFlag, SystemClock};
use crate::config::{EvalConfig, RestorePolicy};
use crate::data::DataSource;
use crate::error::{EvalError, EvalResult};
use crate::graph::{GraphBuilder, StepOutcome, Summary};
use crate::hooks::HookAction;
use crate::layout::CheckpointId;
use crate::promote::promote;
use crate::session::EvalSession;
use crate::summary::{EventLog, SummaryRecorder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    WaitingForCheckpoint,
    BuildingGraph,
    Restoring,
    RunningSteps,
    Recording,
    Promoting,
    Terminated,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Continuous mode is off.
    SinglePass,
    /// The last evaluated step reached `max_steps`.
    MaxSteps,
    MaxTime,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub step: u64,
    pub checkpoint: PathBuf,
    pub batches: u64,
    pub summary: Option<Summary>,
    pub promoted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub passes: Vec<PassReport>,
    pub termination: Termination,
}

impl EvaluationReport {
    #[must_use]
    pub fn steps(&self) -> Vec<u64> {
        self.passes.iter().map(|p| p.step).collect()
    }
}

enum Wait {
    Found(CheckpointId),
    Stopped,
    TimedOut,
}

pub struct EvaluationLoop {
    config: EvalConfig,
    builder: Box<dyn GraphBuilder>,
    source: Box<dyn CheckpointSource>,
    data: Option<Arc<dyn DataSource>>,
    recorder: Box<dyn SummaryRecorder>,
    clock: Arc<dyn Clock>,
    stop: StopFlag,
    state: EvalState,
    last_step: Option<u64>,
    best_value: Option<f64>,
}

impl EvaluationLoop {
    /// Evaluator reading `config.checkpoint_dir` and recording to
    /// `config.output_dir`.
    pub fn new(config: EvalConfig, builder: Box<dyn GraphBuilder>) -> EvalResult<Self> {
        config.validate()?;
        let source = Box::new(CheckpointDir::new(&config.checkpoint_dir));
        let recorder = Box::new(EventLog::open(&config.output_dir)?);
        Ok(Self {
            config,
            builder,
            source,
            data: None,
            recorder,
            clock: Arc::new(SystemClock),
            stop: StopFlag::new(),
            state: EvalState::WaitingForCheckpoint,
            last_step: None,
            best_value: None,
        })
    }

    #[must_use]
    pub fn with_data(mut self, data: Arc<dyn DataSource>) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: Box<dyn CheckpointSource>) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Box<dyn SummaryRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    #[must_use]
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> EvalState {
        self.state
    }

    /// Step of the most recently restored checkpoint.
    #[must_use]
    pub fn last_step(&self) -> Option<u64> {
        self.last_step
    }

    pub fn run(&mut self) -> EvalResult<EvaluationReport> {
        let deadline = self.config.max_time().map(|d| self.clock.now() + d);
        let mut passes = Vec::new();

        let termination = loop {
            let checkpoint = match self.wait_for_checkpoint(deadline)? {
                Wait::Found(checkpoint) => checkpoint,
                Wait::Stopped => break Termination::Stopped,
                Wait::TimedOut => break Termination::MaxTime,
            };

            match self.run_pass(&checkpoint) {
                Ok(report) => passes.push(report),
                Err(e) if e.is_restore() && self.repolls() => {
                    warn!(checkpoint = %checkpoint, error = %e, "restore failed, waiting for a newer checkpoint");
                    self.last_step = Some(checkpoint.step());
                }
                Err(e) => {
                    self.transition(EvalState::Terminated);
                    return Err(e);
                }
            }

            if let Some(reason) = self.should_terminate(deadline) {
                break reason;
            }
        };

        self.transition(EvalState::Terminated);
        info!(passes = passes.len(), reason = ?termination, "evaluator finished");
        Ok(EvaluationReport { passes, termination })
    }

    fn repolls(&self) -> bool {
        self.config.infinite_loop && self.config.restore_policy == RestorePolicy::Repoll
    }

    fn transition(&mut self, state: EvalState) {
        debug!(from = ?self.state, to = ?state, "evaluator state");
        self.state = state;
    }

    fn deadline_passed(&self, deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|d| self.clock.now() >= d)
    }

    fn wait_for_checkpoint(&mut self, deadline: Option<Instant>) -> EvalResult<Wait> {
        self.transition(EvalState::WaitingForCheckpoint);
        let interval = self.config.poll_interval();

        loop {
            if self.stop.is_requested() {
                return Ok(Wait::Stopped);
            }

            let latest = self.source.latest()?;
            if !self.config.infinite_loop {
                return latest
                    .map(Wait::Found)
                    .ok_or_else(|| EvalError::NoCheckpoint { dir: self.source.dir().to_path_buf() });
            }

            if let Some(checkpoint) = latest {
                if self.last_step.is_none_or(|last| checkpoint.step() > last) {
                    return Ok(Wait::Found(checkpoint));
                }
            }

            if self.deadline_passed(deadline) {
                return Ok(Wait::TimedOut);
            }

            let nap = deadline.map_or(interval, |d| interval.min(d.saturating_duration_since(self.clock.now())));
            debug!(dir = %self.source.dir().display(), last_step = ?self.last_step, "waiting for a new checkpoint");
            self.clock.sleep_unless_stopped(nap, &self.stop);
        }
    }

    fn run_pass(&mut self, checkpoint: &CheckpointId) -> EvalResult<PassReport> {
        self.transition(EvalState::BuildingGraph);
        info!(checkpoint = %checkpoint, model = self.builder.name(), "creating graph");
        let cursor = match &self.data {
            Some(data) => Some(data.read(self.config.batch_size, self.config.epochs)?),
            None => None,
        };
        let graph = self.builder.create_graph(cursor, self.config.batch_size)?;
        let hooks = self.builder.create_hooks(graph.as_ref());
        let mut session = EvalSession::new(graph, hooks);

        self.transition(EvalState::Restoring);
        info!(checkpoint = %checkpoint, "restoring model");
        session.restore(self.source.as_ref(), checkpoint)?;
        self.last_step = Some(checkpoint.step());

        self.transition(EvalState::RunningSteps);
        info!(step = checkpoint.step(), "starting evaluation");
        let mut summary = None;
        while !self.stop.is_requested() {
            match self.builder.step(&mut session)? {
                StepOutcome::Exhausted => break,
                StepOutcome::Summary(s) => {
                    let action = session.after_step(&s);
                    // Only the latest summary is kept.
                    summary = Some(s);
                    if action == HookAction::Stop {
                        break;
                    }
                }
            }
        }
        let batches = session.batches();
        session.end(summary.as_ref());
        info!(step = checkpoint.step(), batches, "evaluation finished");

        self.transition(EvalState::Recording);
        if let Some(summary) = &summary {
            self.recorder.record(summary, checkpoint.step())?;
        }

        let promoted = self.maybe_promote(checkpoint, summary.as_ref());

        Ok(PassReport {
            step: checkpoint.step(),
            checkpoint: checkpoint.prefix().to_path_buf(),
            batches,
            summary,
            promoted,
        })
    }

    /// Promotion failures are logged and never fail the pass.
    fn maybe_promote(&mut self, checkpoint: &CheckpointId, summary: Option<&Summary>) -> bool {
        let Some(best) = self.config.best.clone() else {
            return false;
        };
        let Some(value) = summary.and_then(|s| s.get(&best.metric)) else {
            warn!(metric = %best.metric, step = checkpoint.step(), "summary has no value for the best-checkpoint metric");
            return false;
        };
        if value.is_nan() || self.best_value.is_some_and(|current| !best.goal.improves(value, current)) {
            return false;
        }

        self.transition(EvalState::Promoting);
        match promote(checkpoint, &self.config.output_dir, &best.name) {
            Ok(_) => {
                info!(step = checkpoint.step(), metric = %best.metric, value, "new best checkpoint");
                self.best_value = Some(value);
                true
            }
            Err(e) => {
                error!(checkpoint = %checkpoint, error = %e, "failed to promote best checkpoint");
                false
            }
        }
    }

    fn should_terminate(&self, deadline: Option<Instant>) -> Option<Termination> {
        if !self.config.infinite_loop {
            return Some(Termination::SinglePass);
        }
        if let (Some(max), Some(last)) = (self.config.max_steps, self.last_step) {
            if last >= max {
                return Some(Termination::MaxSteps);
            }
        }
        if self.stop.is_requested() {
            return Some(Termination::Stopped);
        }
        if self.deadline_passed(deadline) {
            return Some(Termination::MaxTime);
        }
        None
    }
}
