use anyhow::{Context, Result};
use colored::Colorize;
use oncotext_eval::{promote, CheckpointDir, CheckpointId};
use std::path::Path;

pub fn execute(prefix: &Path, output: &Path, name: &str) -> Result<()> {
    let checkpoint = match CheckpointId::from_prefix(prefix) {
        Some(id) => id,
        None => {
            // No `-<step>` suffix, e.g. an earlier best model; take the step from its meta.
            let unnumbered = CheckpointId::with_step(prefix, 0);
            let meta = CheckpointDir::new(unnumbered.dir())
                .read_meta(&unnumbered)
                .with_context(|| format!("Cannot read the meta file of {}", prefix.display()))?;
            CheckpointId::with_step(prefix, meta.global_step)
        }
    };

    let copied = promote(&checkpoint, output, name)
        .with_context(|| format!("Failed to promote {}", prefix.display()))?;

    println!("{} step {} -> {}", "Promoted".green().bold(), checkpoint.step(), output.join(name).display());
    for path in copied {
        println!("  {}", path.display().to_string().dimmed());
    }
    Ok(())
}
