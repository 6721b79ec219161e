use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

pub const INDEX_EXT: &str = "index";
pub const META_EXT: &str = "meta";
pub const DATA_EXT_PREFIX: &str = "data";

/// Pointer file naming the latest (or promoted) checkpoint of a directory.
pub const POINTER_FILE: &str = "checkpoint";

/// A checkpoint on disk, identified by its path prefix.
///
/// Sibling files are `<prefix>.index`, `<prefix>.meta` and one or more
/// `<prefix>.data-<i>-of-<n>` shards. The prefix file name ends in `-<step>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointId {
    prefix: PathBuf,
    step: u64,
}

impl CheckpointId {
    #[must_use]
    pub fn new(dir: &Path, name: &str, step: u64) -> Self {
        Self { prefix: dir.join(format!("{name}-{step}")), step }
    }

    /// Parse the step from a prefix ending in `-<step>`.
    #[must_use]
    pub fn from_prefix(prefix: impl Into<PathBuf>) -> Option<Self> {
        let prefix = prefix.into();
        let step = parse_step(&prefix)?;
        Some(Self { prefix, step })
    }

    /// For prefixes that do not carry the step in their name (e.g. a promoted
    /// `best_model.ckpt`).
    #[must_use]
    pub fn with_step(prefix: impl Into<PathBuf>, step: u64) -> Self {
        Self { prefix: prefix.into(), step }
    }

    #[must_use]
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        self.prefix.parent().unwrap_or_else(|| Path::new("."))
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        self.prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn sibling(&self, ext: &str) -> PathBuf {
        sibling_path(&self.prefix, ext)
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.sibling(INDEX_EXT)
    }

    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.sibling(META_EXT)
    }

    #[must_use]
    pub fn shard_path(&self, shard: u32, num_shards: u32) -> PathBuf {
        self.sibling(&shard_extension(shard, num_shards))
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.prefix.display().fmt(f)
    }
}

/// `<prefix>.<ext>`; the prefix may itself contain dots.
#[must_use]
pub fn sibling_path(prefix: &Path, ext: &str) -> PathBuf {
    let mut s: OsString = prefix.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

#[must_use]
pub fn shard_extension(shard: u32, num_shards: u32) -> String {
    format!("{DATA_EXT_PREFIX}-{shard:05}-of-{num_shards:05}")
}

/// Parse `data-<i>-of-<n>` into `(i, n)`.
#[must_use]
pub fn parse_shard_extension(ext: &str) -> Option<(u32, u32)> {
    let rest = ext.strip_prefix(DATA_EXT_PREFIX)?.strip_prefix('-')?;
    let (shard, total) = rest.split_once("-of-")?;
    let shard = shard.parse().ok()?;
    let total: u32 = total.parse().ok()?;
    (shard < total).then_some((shard, total))
}

fn parse_step(prefix: &Path) -> Option<u64> {
    let name = prefix.file_name()?.to_str()?;
    let (_, step) = name.rsplit_once('-')?;
    step.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_paths() {
        let id = CheckpointId::new(Path::new("/logs/w2v"), "model.ckpt", 30);

        assert_eq!(id.step(), 30);
        assert_eq!(id.file_name(), "model.ckpt-30");
        assert_eq!(id.index_path(), PathBuf::from("/logs/w2v/model.ckpt-30.index"));
        assert_eq!(id.meta_path(), PathBuf::from("/logs/w2v/model.ckpt-30.meta"));
        assert_eq!(
            id.shard_path(1, 2),
            PathBuf::from("/logs/w2v/model.ckpt-30.data-00001-of-00002")
        );
    }

    #[test]
    fn test_from_prefix_parses_trailing_step() {
        let id = CheckpointId::from_prefix("/logs/model.ckpt-1200").unwrap();
        assert_eq!(id.step(), 1200);
        assert!(CheckpointId::from_prefix("/logs/best_model.ckpt").is_none());
        assert!(CheckpointId::from_prefix("/logs/model.ckpt-abc").is_none());
    }

    #[test]
    fn test_parse_shard_extension() {
        assert_eq!(parse_shard_extension("data-00000-of-00001"), Some((0, 1)));
        assert_eq!(parse_shard_extension("data-00003-of-00004"), Some((3, 4)));
        assert_eq!(parse_shard_extension("data-00004-of-00004"), None);
        assert_eq!(parse_shard_extension("index"), None);
    }
}
