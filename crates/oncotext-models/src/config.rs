//! Model selection and hyperparameters.
//!
//! The defaults are the values the trainer was run with; an evaluator must
//! declare the same shapes or restoring a checkpoint fails.

use oncotext_eval::{EvalError, EvalResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Text classifier architecture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierVariant {
    /// Mean-pooled embeddings into a tanh hidden layer.
    #[default]
    Simple,
    /// Width-K convolution with max pooling before the hidden layer.
    Cnn,
}

impl FromStr for ClassifierVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "cnn" => Ok(Self::Cnn),
            other => Err(format!("unknown classifier variant '{other}'")),
        }
    }
}

/// Which model family is being evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelKind {
    #[default]
    Word2Vec,
    TextClassification(ClassifierVariant),
}

impl ModelKind {
    /// The trainer's log directory for this family, relative to the project root.
    #[must_use]
    pub fn default_log_dir(self) -> PathBuf {
        let leaf = match self {
            Self::Word2Vec => "word2vec",
            Self::TextClassification(ClassifierVariant::Simple) => "text_classification",
            Self::TextClassification(ClassifierVariant::Cnn) => "text_classification_cnn",
        };
        PathBuf::from("model").join("train").join(leaf)
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        match s.as_str() {
            "word2vec" | "w2v" => Ok(Self::Word2Vec),
            "text_classification" | "tc" => Ok(Self::TextClassification(ClassifierVariant::Simple)),
            _ => match s.strip_prefix("text_classification_").or_else(|| s.strip_prefix("tc_")) {
                Some(variant) => variant.parse().map(Self::TextClassification),
                None => Err(format!("unknown model kind '{s}'")),
            },
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word2Vec => write!(f, "word2vec"),
            Self::TextClassification(ClassifierVariant::Simple) => write!(f, "text_classification"),
            Self::TextClassification(ClassifierVariant::Cnn) => write!(f, "text_classification_cnn"),
        }
    }
}

impl TryFrom<String> for ModelKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> Self {
        kind.to_string()
    }
}

/// Settings both families share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedConfig {
    pub vocabulary_size: usize,
    pub embedding_size: usize,
    /// Longer token sequences are truncated.
    pub max_sequence_length: usize,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self { vocabulary_size: 30_000, embedding_size: 128, max_sequence_length: 117_000 }
    }
}

/// Word2vec settings that shape the evaluation graph. Trainer-only settings
/// (learning rate schedule, negative samples, ...) may appear in the same
/// config section and are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Word2VecConfig {
    pub batch_size: usize,
    /// Adjacent words on each side that form (target, context) pairs.
    pub adjacent_window: usize,
}

impl Default for Word2VecConfig {
    fn default() -> Self {
        Self { batch_size: 128, adjacent_window: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextClassificationConfig {
    pub batch_size: usize,
    pub hidden_size: usize,
    pub num_classes: usize,
    pub cnn_kernel_width: usize,
}

impl Default for TextClassificationConfig {
    fn default() -> Self {
        Self { batch_size: 4, hidden_size: 200, num_classes: 9, cnn_kernel_width: 3 }
    }
}

/// Optional session hooks attached to every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Log the running summary every N batches.
    pub log_every_batches: Option<u64>,
    /// Evaluate at most N batches per pass.
    pub max_batches: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub shared: SharedConfig,
    pub word2vec: Word2VecConfig,
    pub text_classification: TextClassificationConfig,
    pub hooks: HookConfig,
}

impl ModelConfig {
    #[must_use]
    pub fn new(kind: ModelKind) -> Self {
        Self { kind, ..Self::default() }
    }

    /// Batch size the selected family was trained with.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        match self.kind {
            ModelKind::Word2Vec => self.word2vec.batch_size,
            ModelKind::TextClassification(_) => self.text_classification.batch_size,
        }
    }

    pub fn validate(&self) -> EvalResult<()> {
        let invalid = |msg: &str| -> EvalResult<()> { Err(EvalError::InvalidConfig(msg.to_string())) };

        if self.shared.vocabulary_size == 0 {
            return invalid("vocabulary_size must be >= 1");
        }
        if self.shared.embedding_size == 0 {
            return invalid("embedding_size must be >= 1");
        }
        if self.shared.max_sequence_length == 0 {
            return invalid("max_sequence_length must be >= 1");
        }
        match self.kind {
            ModelKind::Word2Vec => {
                if self.word2vec.adjacent_window == 0 {
                    return invalid("word2vec.adjacent_window must be >= 1");
                }
            }
            ModelKind::TextClassification(variant) => {
                let tc = &self.text_classification;
                if tc.hidden_size == 0 {
                    return invalid("text_classification.hidden_size must be >= 1");
                }
                if tc.num_classes < 2 {
                    return invalid("text_classification.num_classes must be >= 2");
                }
                if variant == ClassifierVariant::Cnn && tc.cnn_kernel_width == 0 {
                    return invalid("text_classification.cnn_kernel_width must be >= 1");
                }
            }
        }
        Ok(())
    }
}
