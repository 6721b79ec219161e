//! Trainer side of the checkpoint format.
//!
//! Files are written to a temporary name and renamed into place; shards and
//! meta go first and the index last, then the pointer file is rewritten.

use crate::artifacts::{sha256_bytes, write_json, CheckpointIndex, CheckpointMeta, TensorEntry, INDEX_FORMAT_VERSION};
use crate::checkpoint::{CheckpointDir, CheckpointPointer};
use crate::error::{EvalError, EvalResult};
use crate::layout::{sibling_path, CheckpointId, POINTER_FILE};
use crate::tensor::ParameterSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    dir: PathBuf,
    name: String,
    num_shards: u32,
    keep_max: Option<usize>,
}

impl CheckpointWriter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self { dir: dir.into(), name: name.into(), num_shards: 1, keep_max: None }
    }

    #[must_use]
    pub fn with_shards(mut self, num_shards: u32) -> Self {
        self.num_shards = num_shards.max(1);
        self
    }

    /// Retire the oldest checkpoints so at most `keep_max` remain.
    #[must_use]
    pub fn with_keep_max(mut self, keep_max: usize) -> Self {
        self.keep_max = Some(keep_max.max(1));
        self
    }

    pub fn save(&self, params: &ParameterSet, meta: &CheckpointMeta) -> EvalResult<CheckpointId> {
        std::fs::create_dir_all(&self.dir)?;
        let id = CheckpointId::new(&self.dir, &self.name, meta.global_step);

        let mut shards = vec![Vec::<u8>::new(); self.num_shards as usize];
        let mut tensors = Vec::with_capacity(params.len());
        for (i, (name, tensor)) in params.iter().enumerate() {
            let shard = (i % self.num_shards as usize) as u32;
            let buf = &mut shards[shard as usize];
            let offset = buf.len() as u64;
            for v in tensor.data() {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            tensors.push(TensorEntry {
                name: name.to_string(),
                shape: tensor.shape().to_vec(),
                shard,
                offset,
                len: tensor.len() as u64,
            });
        }

        let mut shard_sha256 = Vec::with_capacity(shards.len());
        for (i, bytes) in shards.iter().enumerate() {
            write_atomic(&id.shard_path(i as u32, self.num_shards), bytes)?;
            shard_sha256.push(sha256_bytes(bytes));
        }

        write_json_atomic(&id.meta_path(), meta)?;
        let index = CheckpointIndex { version: INDEX_FORMAT_VERSION, num_shards: self.num_shards, tensors, shard_sha256 };
        write_json_atomic(&id.index_path(), &index)?;

        self.retire_old()?;
        self.write_pointer(&id)?;

        info!(checkpoint = %id, step = id.step(), "saved checkpoint");
        Ok(id)
    }

    fn retire_old(&self) -> EvalResult<()> {
        let Some(keep_max) = self.keep_max else {
            return Ok(());
        };
        let existing = CheckpointDir::new(&self.dir).list()?;
        let excess = existing.len().saturating_sub(keep_max);
        for old in existing.iter().take(excess) {
            for file in sibling_files(old)? {
                std::fs::remove_file(&file)?;
            }
            debug!(checkpoint = %old, "retired checkpoint");
        }
        Ok(())
    }

    fn write_pointer(&self, latest: &CheckpointId) -> EvalResult<()> {
        let all = CheckpointDir::new(&self.dir).list()?.iter().map(CheckpointId::file_name).collect();
        let pointer = CheckpointPointer { primary: latest.file_name(), all };
        write_atomic(&self.dir.join(POINTER_FILE), pointer.render().as_bytes())
    }
}

/// Every file sharing the checkpoint's prefix, found by glob.
pub fn sibling_files(checkpoint: &CheckpointId) -> EvalResult<Vec<PathBuf>> {
    let escaped = glob::Pattern::escape(&checkpoint.prefix().to_string_lossy());
    let pattern = format!("{escaped}.*");
    let paths = glob::glob(&pattern).map_err(|e| EvalError::Other(e.into()))?;

    let mut out = Vec::new();
    for path in paths {
        let path = path.map_err(|e| EvalError::Io(e.into_error()))?;
        if path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> EvalResult<()> {
    let tmp = sibling_path(path, "tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> EvalResult<()> {
    let tmp = sibling_path(path, "tmp");
    write_json(&tmp, value)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{read_pointer, CheckpointSource};
    use crate::tensor::Tensor;
    use tempfile::TempDir;

    fn params() -> ParameterSet {
        let mut p = ParameterSet::new();
        p.insert("a", Tensor::new(vec![2], vec![1.0, 2.0]).unwrap());
        p.insert("b", Tensor::new(vec![1, 3], vec![3.0, 4.0, 5.0]).unwrap());
        p.insert("c", Tensor::new(vec![1], vec![6.0]).unwrap());
        p
    }

    #[test]
    fn test_save_writes_all_siblings_and_pointer() {
        let temp = TempDir::new().unwrap();
        let writer = CheckpointWriter::new(temp.path(), "model.ckpt").with_shards(2);
        let id = writer.save(&params(), &CheckpointMeta::new("test", 10)).unwrap();

        assert!(id.index_path().exists());
        assert!(id.meta_path().exists());
        assert!(id.shard_path(0, 2).exists());
        assert!(id.shard_path(1, 2).exists());
        assert_eq!(sibling_files(&id).unwrap().len(), 4);

        let pointer = read_pointer(temp.path()).unwrap().unwrap();
        assert_eq!(pointer.primary, "model.ckpt-10");
    }

    #[test]
    fn test_saved_checkpoint_restores() {
        let temp = TempDir::new().unwrap();
        let writer = CheckpointWriter::new(temp.path(), "model.ckpt").with_shards(2);
        let id = writer.save(&params(), &CheckpointMeta::new("test", 5)).unwrap();

        let mut target = ParameterSet::new();
        target.declare("a", vec![2]);
        target.declare("b", vec![1, 3]);
        CheckpointDir::new(temp.path()).load(&id, &mut target).unwrap();

        assert_eq!(target.get("b").unwrap().data(), &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_keep_max_retires_oldest() {
        let temp = TempDir::new().unwrap();
        let writer = CheckpointWriter::new(temp.path(), "model.ckpt").with_keep_max(2);
        for step in [10, 20, 30] {
            writer.save(&params(), &CheckpointMeta::new("test", step)).unwrap();
        }

        let steps: Vec<u64> = CheckpointDir::new(temp.path()).list().unwrap().iter().map(CheckpointId::step).collect();
        assert_eq!(steps, vec![20, 30]);
        let pointer = read_pointer(temp.path()).unwrap().unwrap();
        assert_eq!(pointer.all, vec!["model.ckpt-20".to_string(), "model.ckpt-30".to_string()]);
    }
}
