//! Oncotext Models
//!
//! Evaluation graphs for the two model families trained on the oncology
//! corpus:
//! - `word2vec` embeddings scored with a noise-contrastive loss
//! - text classifiers (`simple` and `cnn` variants) over token sequences
//!
//! Each family implements `oncotext_eval::GraphBuilder`; `builder_for` picks
//! one from a `ModelConfig`.

pub mod classifier;
pub mod config;
pub mod embedding;
pub mod factory;
pub mod math;

pub use classifier::{ClassifierGraph, ClassifierGraphBuilder};
pub use config::{
    ClassifierVariant, HookConfig, ModelConfig, ModelKind, SharedConfig, TextClassificationConfig, Word2VecConfig,
};
pub use embedding::{EmbeddingGraph, EmbeddingGraphBuilder};
pub use factory::builder_for;
