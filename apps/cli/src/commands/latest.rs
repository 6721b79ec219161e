use anyhow::{Context, Result};
use oncotext_eval::{CheckpointDir, CheckpointSource};
use serde_json::json;
use std::path::Path;

pub fn execute(dir: &Path, json_output: bool) -> Result<()> {
    let source = CheckpointDir::new(dir);
    let latest = source
        .latest()
        .with_context(|| format!("Failed to list checkpoints in {}", dir.display()))?
        .with_context(|| format!("No complete checkpoint in {}", dir.display()))?;

    if json_output {
        let meta = source.read_meta(&latest)?;
        let out = json!({
            "prefix": latest.prefix(),
            "step": latest.step(),
            "model": meta.model,
            "created_at": meta.created_at,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", latest.prefix().display());
    }
    Ok(())
}
