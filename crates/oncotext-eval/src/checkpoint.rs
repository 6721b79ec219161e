//! Checkpoint discovery and restore.
//!
//! The directory is written by an external trainer and only ever read here.
//! A checkpoint becomes visible once its index, meta and every data shard
//! exist; anything less is treated as a write still in progress.

use crate::artifacts::{read_json, sha256_bytes, CheckpointIndex, CheckpointMeta, INDEX_FORMAT_VERSION};
use crate::error::{EvalError, EvalResult};
use crate::layout::{parse_shard_extension, CheckpointId, INDEX_EXT, META_EXT, POINTER_FILE};
use crate::tensor::{element_count, ParameterSet, Tensor};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where checkpoints come from.
pub trait CheckpointSource: Send + Sync {
    /// Directory being watched, for error messages.
    fn dir(&self) -> &Path;

    /// Most recent complete checkpoint, if any.
    fn latest(&self) -> EvalResult<Option<CheckpointId>>;

    /// Restore every variable of `into` from `checkpoint`.
    ///
    /// Fails with [`EvalError::Restore`] when files are missing, corrupted or
    /// do not match the variable set; `into` is left unchanged in that case.
    fn load(&self, checkpoint: &CheckpointId, into: &mut ParameterSet) -> EvalResult<()>;
}

/// Checkpoints stored as sibling files in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointDir {
    dir: PathBuf,
}

#[derive(Debug, Default)]
struct Siblings {
    index: bool,
    meta: bool,
    shards: BTreeSet<(u32, u32)>,
}

impl Siblings {
    fn is_complete(&self) -> bool {
        if !self.index || !self.meta {
            return false;
        }
        let Some(&(_, total)) = self.shards.iter().next() else {
            return false;
        };
        self.shards.iter().all(|&(_, n)| n == total)
            && (0..total).all(|i| self.shards.contains(&(i, total)))
    }
}

impl CheckpointDir {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Every complete checkpoint, ordered by step.
    pub fn list(&self) -> EvalResult<Vec<CheckpointId>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut groups: BTreeMap<String, Siblings> = BTreeMap::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if let Some(prefix) = name.strip_suffix(&format!(".{INDEX_EXT}")) {
                groups.entry(prefix.to_string()).or_default().index = true;
            } else if let Some(prefix) = name.strip_suffix(&format!(".{META_EXT}")) {
                groups.entry(prefix.to_string()).or_default().meta = true;
            } else if let Some(pos) = name.rfind(".data-") {
                if let Some(shard) = parse_shard_extension(&name[pos + 1..]) {
                    groups.entry(name[..pos].to_string()).or_default().shards.insert(shard);
                }
            }
        }

        let mut out: Vec<CheckpointId> = groups
            .into_iter()
            .filter_map(|(prefix, siblings)| {
                if !siblings.is_complete() {
                    debug!(prefix = %prefix, "skipping incomplete checkpoint");
                    return None;
                }
                CheckpointId::from_prefix(self.dir.join(prefix))
            })
            .collect();
        out.sort_by_key(CheckpointId::step);
        Ok(out)
    }

    pub fn read_meta(&self, checkpoint: &CheckpointId) -> EvalResult<CheckpointMeta> {
        read_json(&checkpoint.meta_path())
    }

    /// Resolve the pointer file of this directory (e.g. a promoted best model).
    ///
    /// The step is taken from the name when it has a `-<step>` suffix and from
    /// the meta file otherwise.
    pub fn pointed(&self) -> EvalResult<Option<CheckpointId>> {
        let Some(pointer) = read_pointer(&self.dir)? else {
            return Ok(None);
        };
        let prefix = self.dir.join(&pointer.primary);
        if let Some(id) = CheckpointId::from_prefix(&prefix) {
            return Ok(Some(id));
        }
        let meta: CheckpointMeta = read_json(&crate::layout::sibling_path(&prefix, META_EXT))?;
        Ok(Some(CheckpointId::with_step(prefix, meta.global_step)))
    }
}

impl CheckpointSource for CheckpointDir {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn latest(&self) -> EvalResult<Option<CheckpointId>> {
        Ok(self.list()?.pop())
    }

    fn load(&self, checkpoint: &CheckpointId, into: &mut ParameterSet) -> EvalResult<()> {
        let values = read_tensors(checkpoint, into)?;
        into.assign_all(values).map_err(|reason| EvalError::restore(checkpoint.prefix(), reason))
    }
}

fn read_tensors(checkpoint: &CheckpointId, wanted: &ParameterSet) -> EvalResult<BTreeMap<String, Tensor>> {
    let prefix = checkpoint.prefix();
    let index_path = checkpoint.index_path();

    let bytes = std::fs::read(&index_path).map_err(|e| {
        EvalError::restore(prefix, format!("cannot read {}: {e}", index_path.display()))
    })?;
    let index: CheckpointIndex = serde_json::from_slice(&bytes)
        .map_err(|e| EvalError::restore(prefix, format!("corrupt index: {e}")))?;

    if index.version != INDEX_FORMAT_VERSION {
        return Err(EvalError::restore(prefix, format!("unsupported index version {}", index.version)));
    }
    if index.shard_sha256.len() != index.num_shards as usize {
        return Err(EvalError::restore(prefix, "index lists the wrong number of shard checksums"));
    }

    let mut shards = Vec::with_capacity(index.num_shards as usize);
    for shard in 0..index.num_shards {
        let path = checkpoint.shard_path(shard, index.num_shards);
        let data = std::fs::read(&path)
            .map_err(|e| EvalError::restore(prefix, format!("cannot read {}: {e}", path.display())))?;
        if sha256_bytes(&data) != index.shard_sha256[shard as usize] {
            return Err(EvalError::restore(prefix, format!("checksum mismatch in {}", path.display())));
        }
        shards.push(data);
    }

    let mut out = BTreeMap::new();
    for name in wanted.names() {
        let entry = index
            .entry(name)
            .ok_or_else(|| EvalError::restore(prefix, format!("variable '{name}' not found in checkpoint")))?;
        let count = element_count(&entry.shape)
            .ok_or_else(|| EvalError::restore(prefix, format!("index entry '{name}' has an oversized shape")))?;
        if count as u64 != entry.len {
            return Err(EvalError::restore(prefix, format!("index entry '{name}' has inconsistent length")));
        }
        let shard = shards
            .get(entry.shard as usize)
            .ok_or_else(|| EvalError::restore(prefix, format!("'{name}' refers to missing shard {}", entry.shard)))?;

        let out_of_range = || EvalError::restore(prefix, format!("'{name}' extends past the end of its shard"));
        let start = usize::try_from(entry.offset).map_err(|_| out_of_range())?;
        let end = count.checked_mul(4).and_then(|bytes| start.checked_add(bytes)).ok_or_else(out_of_range)?;
        let raw = shard.get(start..end).ok_or_else(out_of_range)?;

        let data = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let tensor = Tensor::new(entry.shape.clone(), data).map_err(|e| EvalError::restore(prefix, e.to_string()))?;
        out.insert(name.to_string(), tensor);
    }
    Ok(out)
}

/// Parsed pointer file: a primary checkpoint name and every known one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPointer {
    pub primary: String,
    pub all: Vec<String>,
}

impl CheckpointPointer {
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { all: vec![name.clone()], primary: name }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("model_checkpoint_path: \"{}\"\n", self.primary);
        for name in &self.all {
            out.push_str(&format!("all_model_checkpoint_paths: \"{name}\"\n"));
        }
        out
    }

    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut primary = None;
        let mut all = Vec::new();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "model_checkpoint_path" => primary = Some(value),
                "all_model_checkpoint_paths" => all.push(value),
                _ => {}
            }
        }
        primary.map(|primary| Self { primary, all })
    }
}

pub fn read_pointer(dir: &Path) -> EvalResult<Option<CheckpointPointer>> {
    let path = dir.join(POINTER_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(CheckpointPointer::parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_siblings_completeness() {
        let mut s = Siblings { index: true, meta: true, shards: BTreeSet::new() };
        assert!(!s.is_complete());

        s.shards.insert((0, 2));
        assert!(!s.is_complete());

        s.shards.insert((1, 2));
        assert!(s.is_complete());

        s.meta = false;
        assert!(!s.is_complete());
    }

    #[test]
    fn test_pointer_render_and_parse() {
        let pointer = CheckpointPointer::single("best_model.ckpt");
        let text = pointer.render();
        assert_eq!(
            text,
            "model_checkpoint_path: \"best_model.ckpt\"\nall_model_checkpoint_paths: \"best_model.ckpt\"\n"
        );
        assert_eq!(CheckpointPointer::parse(&text), Some(pointer));
        assert_eq!(CheckpointPointer::parse("garbage"), None);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = CheckpointDir::new("/definitely/not/here");
        assert!(dir.list().unwrap().is_empty());
        assert!(dir.latest().unwrap().is_none());
    }
}
