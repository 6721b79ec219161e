use crate::error::EvalResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Location of one tensor inside the data shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub shard: u32,
    /// Byte offset into the shard.
    pub offset: u64,
    /// Number of `f32` elements.
    pub len: u64,
}

/// Contents of `<prefix>.index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointIndex {
    pub version: u32,
    pub num_shards: u32,
    pub tensors: Vec<TensorEntry>,
    /// Hex SHA-256 of each shard, by shard number.
    pub shard_sha256: Vec<String>,
}

impl CheckpointIndex {
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&TensorEntry> {
        self.tensors.iter().find(|t| t.name == name)
    }
}

/// Contents of `<prefix>.meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub global_step: u64,
    pub model: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl CheckpointMeta {
    #[must_use]
    pub fn new(model: impl Into<String>, global_step: u64) -> Self {
        Self { global_step, model: model.into(), created_at: Utc::now(), attributes: BTreeMap::new() }
    }
}

#[must_use]
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> EvalResult<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> EvalResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
