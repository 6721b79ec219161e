//! Oncotext Eval
//!
//! Continuous evaluation of checkpoints written by an independent trainer:
//! - Discovering complete checkpoints and restoring them (`CheckpointDir`)
//! - The per-model graph contract (`GraphBuilder`, `EvalGraph`)
//! - The polling evaluation loop (`EvaluationLoop`)
//! - Step-tagged summary records (`EventLog`)
//! - Promoting the best checkpoint (`promote`)

pub mod artifacts;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod hooks;
pub mod layout;
pub mod promote;
pub mod session;
pub mod summary;
pub mod tensor;
pub mod writer;

pub use artifacts::{CheckpointIndex, CheckpointMeta, TensorEntry};
pub use checkpoint::{read_pointer, CheckpointDir, CheckpointPointer, CheckpointSource};
pub use clock::{Clock, ManualClock, StopFlag, SystemClock};
pub use config::{BestCheckpointConfig, EvalConfig, MetricGoal, RestorePolicy};
pub use data::{Batch, BatchCursor, DataSource, Example, JsonlDataSource, VecDataSource};
pub use error::{EvalError, EvalResult};
pub use evaluator::{EvalState, EvaluationLoop, EvaluationReport, PassReport, Termination};
pub use graph::{EvalGraph, GraphBuilder, StepOutcome, Summary};
pub use hooks::{HookAction, ProgressLogHook, SessionHook, StepLimitHook};
pub use layout::CheckpointId;
pub use promote::{promote, DEFAULT_BEST_NAME};
pub use session::EvalSession;
pub use summary::{read_events, EventLog, SummaryRecord, SummaryRecorder, EVENT_LOG_FILE};
pub use tensor::{ParameterSet, Tensor};
pub use writer::CheckpointWriter;
