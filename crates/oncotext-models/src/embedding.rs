//! Word embeddings scored with the noise-contrastive objective.
//!
//! Every token is paired with its neighbours inside the adjacent window and
//! each (target, context) pair contributes `-ln σ(w_c · e_t + b_c)`. The
//! negative-sample term is only used while training, so the evaluation loss
//! is the positive term alone.

use crate::config::{HookConfig, ModelConfig};
use crate::factory::session_hooks;
use crate::math::{dot, softplus, StreamingMean};
use oncotext_eval::{
    Batch, BatchCursor, EvalError, EvalGraph, EvalResult, GraphBuilder, ParameterSet, SessionHook, StepOutcome,
    Summary,
};

pub const EMBEDDINGS: &str = "embeddings";
pub const NCE_WEIGHTS: &str = "nce_weights";
pub const NCE_BIASES: &str = "nce_biases";

#[derive(Debug, Clone)]
pub struct EmbeddingGraphBuilder {
    vocabulary_size: usize,
    embedding_size: usize,
    max_sequence_length: usize,
    window: usize,
    hooks: HookConfig,
}

impl EmbeddingGraphBuilder {
    #[must_use]
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            vocabulary_size: config.shared.vocabulary_size,
            embedding_size: config.shared.embedding_size,
            max_sequence_length: config.shared.max_sequence_length,
            window: config.word2vec.adjacent_window,
            hooks: config.hooks.clone(),
        }
    }
}

impl GraphBuilder for EmbeddingGraphBuilder {
    fn name(&self) -> &str {
        "word2vec"
    }

    fn create_graph(&self, data: Option<BatchCursor>, _batch_size: usize) -> EvalResult<Box<dyn EvalGraph>> {
        let (v, d) = (self.vocabulary_size, self.embedding_size);
        let mut params = ParameterSet::new();
        params.declare(EMBEDDINGS, vec![v, d]);
        params.declare(NCE_WEIGHTS, vec![v, d]);
        params.declare(NCE_BIASES, vec![v]);

        Ok(Box::new(EmbeddingGraph {
            params,
            cursor: data,
            vocabulary_size: v,
            max_sequence_length: self.max_sequence_length,
            window: self.window,
            loss: StreamingMean::default(),
        }))
    }

    fn create_hooks(&self, _graph: &dyn EvalGraph) -> Vec<Box<dyn SessionHook>> {
        session_hooks(&self.hooks)
    }
}

pub struct EmbeddingGraph {
    params: ParameterSet,
    cursor: Option<BatchCursor>,
    vocabulary_size: usize,
    max_sequence_length: usize,
    window: usize,
    loss: StreamingMean,
}

impl EmbeddingGraph {
    fn batch_loss(&self, batch: &Batch) -> EvalResult<(f64, u64)> {
        let embeddings = self.params.require(EMBEDDINGS)?;
        let weights = self.params.require(NCE_WEIGHTS)?;
        let biases = self.params.require(NCE_BIASES)?;

        let mut total = 0.0;
        let mut pairs = 0;
        for example in batch {
            let tokens = &example.tokens[..example.tokens.len().min(self.max_sequence_length)];
            if let Some(&bad) = tokens.iter().find(|&&t| t as usize >= self.vocabulary_size) {
                return Err(EvalError::Dataset(format!(
                    "token id {bad} outside vocabulary of {}",
                    self.vocabulary_size
                )));
            }

            for (i, &target) in tokens.iter().enumerate() {
                let lo = i.saturating_sub(self.window);
                let hi = (i + self.window).min(tokens.len().saturating_sub(1));
                let Some(e) = embeddings.row(target as usize) else {
                    continue;
                };
                for (j, &context) in tokens.iter().enumerate().take(hi + 1).skip(lo) {
                    if j == i {
                        continue;
                    }
                    let c = context as usize;
                    let (Some(w), Some(&b)) = (weights.row(c), biases.data().get(c)) else {
                        continue;
                    };
                    total += softplus(-f64::from(dot(w, e) + b));
                    pairs += 1;
                }
            }
        }
        Ok((total, pairs))
    }
}

impl EvalGraph for EmbeddingGraph {
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
        let (total, pairs) = self.batch_loss(&batch?)?;
        self.loss.add(total, pairs);

        let mut summary = Summary::new().with("pairs", self.loss.count() as f64);
        if let Some(loss) = self.loss.value() {
            summary.insert("loss", loss);
        }
        Ok(StepOutcome::Summary(summary))
    }
}
