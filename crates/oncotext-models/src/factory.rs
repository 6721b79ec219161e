//! Graph builder selection from configuration.

use crate::classifier::ClassifierGraphBuilder;
use crate::config::{HookConfig, ModelConfig, ModelKind};
use crate::embedding::EmbeddingGraphBuilder;
use oncotext_eval::{EvalResult, GraphBuilder, ProgressLogHook, SessionHook, StepLimitHook};
use tracing::debug;

/// Creates the graph builder for `config.kind`.
///
/// # Errors
/// Returns `EvalError::InvalidConfig` if the hyperparameters are unusable.
pub fn builder_for(config: &ModelConfig) -> EvalResult<Box<dyn GraphBuilder>> {
    config.validate()?;
    debug!(kind = %config.kind, "creating graph builder");

    Ok(match config.kind {
        ModelKind::Word2Vec => Box::new(EmbeddingGraphBuilder::new(config)),
        ModelKind::TextClassification(variant) => Box::new(ClassifierGraphBuilder::new(config, variant)),
    })
}

pub(crate) fn session_hooks(config: &HookConfig) -> Vec<Box<dyn SessionHook>> {
    let mut hooks: Vec<Box<dyn SessionHook>> = Vec::new();
    if let Some(n) = config.max_batches {
        hooks.push(Box::new(StepLimitHook::new(n)));
    }
    if let Some(n) = config.log_every_batches {
        hooks.push(Box::new(ProgressLogHook::new(n)));
    }
    hooks
}
