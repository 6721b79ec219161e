//! Copy a checkpoint to a fixed "best" name so downstream loaders can find
//! it without knowing its step.

use crate::checkpoint::CheckpointPointer;
use crate::error::{EvalError, EvalResult};
use crate::layout::{sibling_path, CheckpointId, DATA_EXT_PREFIX, INDEX_EXT, META_EXT, POINTER_FILE};
use crate::writer::sibling_files;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_BEST_NAME: &str = "best_model.ckpt";

const STAGING_EXT: &str = "tmp";
const BACKUP_EXT: &str = "bak";

/// Copies every sibling of `checkpoint` to `<output_dir>/<base_name>.<ext>`
/// and writes the pointer file. Returns the copied destination paths.
pub fn promote(checkpoint: &CheckpointId, output_dir: &Path, base_name: &str) -> EvalResult<Vec<PathBuf>> {
    info!(checkpoint = %checkpoint, name = base_name, "saving best checkpoint");

    let files = sibling_files(checkpoint)?;

    let prefix_dot = format!("{}.", checkpoint.file_name());
    let extensions: Vec<String> = files
        .iter()
        .filter_map(|p| p.file_name()?.to_str()?.strip_prefix(&prefix_dot).map(str::to_string))
        .filter(|ext| !ext.ends_with(".tmp") && !ext.ends_with(".bak"))
        .collect();

    for required in [INDEX_EXT, META_EXT] {
        if !extensions.iter().any(|e| e == required) {
            return Err(missing(checkpoint, required));
        }
    }
    if !extensions.iter().any(|e| e.starts_with(DATA_EXT_PREFIX)) {
        return Err(missing(checkpoint, DATA_EXT_PREFIX));
    }

    std::fs::create_dir_all(output_dir).map_err(|e| EvalError::promotion(output_dir, e))?;
    let dest_prefix = output_dir.join(base_name);

    // Stage every file first; the previous best stays untouched until all
    // copies succeeded.
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(extensions.len());
    for ext in &extensions {
        let from = checkpoint.sibling(ext);
        let to = sibling_path(&dest_prefix, ext);
        let tmp = sibling_path(&to, STAGING_EXT);
        if let Err(e) = std::fs::copy(&from, &tmp) {
            discard(staged.iter().map(|(tmp, _)| tmp.as_path()).chain([tmp.as_path()]));
            return Err(EvalError::promotion(&from, e));
        }
        staged.push((tmp, to));
    }

    commit(&staged)?;
    let copied: Vec<PathBuf> = staged.into_iter().map(|(_, to)| to).collect();

    // A previous best may have had more shards.
    let previous = CheckpointId::with_step(&dest_prefix, 0);
    for stale in sibling_files(&previous)? {
        if !copied.contains(&stale) {
            if let Err(e) = std::fs::remove_file(&stale) {
                warn!(path = %stale.display(), error = %e, "could not remove stale best checkpoint file");
            }
        }
    }

    let pointer_path = output_dir.join(POINTER_FILE);
    let pointer_tmp = sibling_path(&pointer_path, STAGING_EXT);
    std::fs::write(&pointer_tmp, CheckpointPointer::single(base_name).render())
        .and_then(|()| std::fs::rename(&pointer_tmp, &pointer_path))
        .map_err(|e| EvalError::promotion(&pointer_path, e))?;

    Ok(copied)
}

/// Move staged files over their destinations. Existing destinations are
/// set aside first and put back if any rename fails.
fn commit(staged: &[(PathBuf, PathBuf)]) -> EvalResult<()> {
    let mut replaced: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut placed: Vec<&Path> = Vec::new();

    let result = (|| -> std::io::Result<()> {
        for (tmp, to) in staged {
            if to.is_file() {
                let backup = sibling_path(to, BACKUP_EXT);
                std::fs::rename(to, &backup)?;
                replaced.push((backup, to.clone()));
            }
            std::fs::rename(tmp, to)?;
            placed.push(to.as_path());
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            discard(replaced.iter().map(|(backup, _)| backup.as_path()));
            Ok(())
        }
        Err(e) => {
            discard(placed.iter().copied());
            for (backup, to) in &replaced {
                if let Err(e) = std::fs::rename(backup, to) {
                    warn!(path = %to.display(), error = %e, "could not restore previous best checkpoint file");
                }
            }
            discard(staged.iter().map(|(tmp, _)| tmp.as_path()));
            let path = staged.get(placed.len()).map_or_else(PathBuf::new, |(_, to)| to.clone());
            Err(EvalError::promotion(path, e))
        }
    }
}

fn discard<'a>(paths: impl IntoIterator<Item = &'a Path>) {
    for path in paths {
        if path.is_file() {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn missing(checkpoint: &CheckpointId, ext: &str) -> EvalError {
    let path = checkpoint.sibling(ext);
    EvalError::promotion(
        path,
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("checkpoint has no .{ext} file")),
    )
}
