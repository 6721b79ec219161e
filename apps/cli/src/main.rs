//! Oncotext CLI - continuous evaluation of oncology text models
//!
//! Provides the `oncotext` command: an evaluator that follows a trainer's
//! checkpoint directory, plus small tools for inspecting checkpoints and
//! event logs.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use oncotext_eval::{MetricGoal, RestorePolicy};
use oncotext_models::ModelKind;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "oncotext",
    author,
    version,
    about = "Continuous evaluation of oncology text models",
    long_about = "Evaluates every new checkpoint a trainer writes, records step-tagged metrics\nand keeps a copy of the best checkpoint so far."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate checkpoints as the trainer writes them
    ///
    /// Polls the checkpoint directory, evaluates each newer checkpoint once
    /// and appends its summary to `<output_dir>/events.jsonl`. Ctrl-C stops
    /// the evaluator after the current step.
    Eval(EvalArgs),

    /// Print the latest complete checkpoint in a directory
    Latest {
        /// Checkpoint directory
        dir: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy a checkpoint into a directory as its best model
    Promote {
        /// Checkpoint prefix (e.g. model/train/word2vec/model.ckpt-1000)
        prefix: PathBuf,

        /// Destination directory
        #[arg(short, long)]
        output: PathBuf,

        /// Base name of the copied files
        #[arg(long, default_value = oncotext_eval::DEFAULT_BEST_NAME)]
        name: String,
    },

    /// Print the recorded summaries of an output directory
    Events {
        /// Evaluator output directory
        output_dir: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct EvalArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model family (word2vec, text_classification, text_classification_cnn)
    #[arg(short, long)]
    model: Option<ModelKind>,

    /// Directory the trainer writes checkpoints to
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Where the event log and best checkpoint go
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JSONL file with the held-out examples
    #[arg(long)]
    data: Option<PathBuf>,

    /// Only read the first N examples
    #[arg(long)]
    max_examples: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    max_time: Option<u64>,

    /// Stop once a checkpoint at or past this step has been evaluated
    #[arg(long)]
    max_steps: Option<u64>,

    /// Evaluate the latest checkpoint once and exit
    #[arg(long)]
    once: bool,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    epochs: Option<u32>,

    /// Seconds between checks for a new checkpoint
    #[arg(long)]
    poll_interval: Option<u64>,

    /// What to do when a checkpoint cannot be restored (abort, repoll)
    #[arg(long, value_parser = parse_restore_policy)]
    restore_policy: Option<RestorePolicy>,

    /// Metric that selects the best checkpoint
    #[arg(long)]
    best_metric: Option<String>,

    /// Whether the best metric is minimized or maximized
    #[arg(long, value_parser = parse_metric_goal, default_value = "minimize", requires = "best_metric")]
    best_goal: MetricGoal,
}

fn parse_restore_policy(s: &str) -> Result<RestorePolicy, String> {
    match s {
        "abort" => Ok(RestorePolicy::Abort),
        "repoll" => Ok(RestorePolicy::Repoll),
        other => Err(format!("unknown restore policy '{other}' (expected abort or repoll)")),
    }
}

fn parse_metric_goal(s: &str) -> Result<MetricGoal, String> {
    match s {
        "minimize" | "min" => Ok(MetricGoal::Minimize),
        "maximize" | "max" => Ok(MetricGoal::Maximize),
        other => Err(format!("unknown metric goal '{other}' (expected minimize or maximize)")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Eval(eval_args) => commands::eval::execute(eval_args).await,
        Command::Latest { dir, json } => commands::latest::execute(&dir, json),
        Command::Promote { prefix, output, name } => commands::promote::execute(&prefix, &output, &name),
        Command::Events { output_dir, json } => commands::events::execute(&output_dir, json),
    }
}
