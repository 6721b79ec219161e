use anyhow::{Context, Result};
use colored::Colorize;
use oncotext_eval::{read_events, EVENT_LOG_FILE};
use std::path::Path;

pub fn execute(output_dir: &Path, json_output: bool) -> Result<()> {
    let path = output_dir.join(EVENT_LOG_FILE);
    let records = if path.exists() {
        read_events(&path).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        Vec::new()
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", format!("No events recorded in {}", output_dir.display()).dimmed());
        return Ok(());
    }

    println!("{:<10} {:<26} {}", "Step", "Recorded", "Values");
    println!("{}", "─".repeat(70));
    for record in records {
        let values =
            record.values.values().iter().map(|(k, v)| format!("{k}={v:.4}")).collect::<Vec<_>>().join(" ");
        println!(
            "{:<10} {:<26} {}",
            record.step.to_string().cyan(),
            record.wall_time.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed(),
            values
        );
    }
    Ok(())
}
