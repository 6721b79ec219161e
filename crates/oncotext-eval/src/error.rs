use std::path::PathBuf;
use thiserror::Error;

pub type EvalResult<T> = std::result::Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("no checkpoint in {}", dir.display())]
    NoCheckpoint { dir: PathBuf },

    #[error("failed to restore checkpoint {}: {reason}", checkpoint.display())]
    Restore { checkpoint: PathBuf, reason: String },

    #[error("failed to promote checkpoint file {}: {source}", path.display())]
    PromotionIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session used before a checkpoint was restored")]
    NotRestored,

    #[error("invalid evaluation config: {0}")]
    InvalidConfig(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EvalError {
    pub(crate) fn restore(checkpoint: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Restore { checkpoint: checkpoint.into(), reason: reason.into() }
    }

    pub(crate) fn promotion(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PromotionIo { path: path.into(), source }
    }

    /// Whether the error is a restore failure (which a `repoll` policy may absorb).
    #[must_use]
    pub fn is_restore(&self) -> bool {
        matches!(self, Self::Restore { .. })
    }
}
