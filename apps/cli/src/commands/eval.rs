//! `oncotext eval`: run the evaluation loop.

use crate::config::{resolve, FileConfig, Overrides};
use crate::EvalArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use oncotext_eval::{BestCheckpointConfig, EvaluationLoop, EvaluationReport, JsonlDataSource, DEFAULT_BEST_NAME};
use oncotext_models::builder_for;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn execute(args: EvalArgs) -> Result<()> {
    let file = match &args.config {
        Some(path) => FileConfig::load_from_file(path)?,
        None => FileConfig::default(),
    };
    let overrides = Overrides {
        model: args.model,
        checkpoint_dir: args.checkpoint_dir,
        output_dir: args.output_dir,
        data: args.data,
        max_examples: args.max_examples,
        max_time_secs: args.max_time,
        max_steps: args.max_steps,
        once: args.once,
        batch_size: args.batch_size,
        epochs: args.epochs,
        poll_interval_secs: args.poll_interval,
        restore_policy: args.restore_policy,
        best: args.best_metric.map(|metric| BestCheckpointConfig {
            metric,
            goal: args.best_goal,
            name: DEFAULT_BEST_NAME.to_string(),
        }),
    };
    let resolved = resolve(file, overrides);
    let checkpoint_dir = resolved.eval.checkpoint_dir.clone();

    let builder = builder_for(&resolved.model).context("Invalid model configuration")?;
    let mut evaluator =
        EvaluationLoop::new(resolved.eval, builder).context("Failed to set up the evaluator")?;

    match &resolved.data {
        Some(path) => {
            let mut source = JsonlDataSource::new(path);
            if let Some(n) = resolved.max_examples {
                source = source.with_max_examples(n);
            }
            evaluator = evaluator.with_data(Arc::new(source));
        }
        None => warn!("no dataset configured, passes will not produce summaries"),
    }

    let stop = evaluator.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested, finishing the current step");
            stop.request();
        }
    });

    info!(
        model = %resolved.model.kind,
        checkpoint_dir = %checkpoint_dir.display(),
        "starting evaluator"
    );
    let report = tokio::task::spawn_blocking(move || evaluator.run())
        .await
        .context("Evaluator thread panicked")?
        .with_context(|| format!("Evaluation of {} failed", checkpoint_dir.display()))?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &EvaluationReport) {
    println!();
    println!("{}", format!("Evaluated checkpoints ({})", report.passes.len()).bold().cyan());
    for pass in &report.passes {
        let metrics = pass.summary.as_ref().map_or_else(
            || "no summary".dimmed().to_string(),
            |s| s.values().iter().map(|(k, v)| format!("{k}={v:.4}")).collect::<Vec<_>>().join(" "),
        );
        let marker = if pass.promoted { " (best)".green().to_string() } else { String::new() };
        println!("  step {:<10} {}{}", pass.step, metrics, marker);
    }
    println!("Stopped: {:?}", report.termination);
}
