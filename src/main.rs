use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use nielsennet::dataset::Datasets;
use nielsennet::mnist_dataset::load_mnist;
use nielsennet::summary::JsonlSummary;
use nielsennet::train::{self, TrainConfig, Trainer};
use std::io;
use std::path::PathBuf;

/// Train the Nielsen convolutional network on MNIST and report test accuracy.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Folder holding the uncompressed MNIST idx files
    #[arg(long, default_value = "data/")]
    data_dir: PathBuf,
    /// Where the loss / validation accuracy stream is written (JSON lines)
    #[arg(long, default_value = "summaries/train.jsonl")]
    summary_path: PathBuf,
    #[arg(long, default_value_t = train::BATCH_SIZE)]
    batch_size: usize,
    #[arg(long, default_value_t = train::TOTAL_STEPS)]
    total_steps: usize,
    /// Every how many steps do we evaluate on the validation partition?
    #[arg(long, default_value_t = train::EVAL_INTERVAL)]
    eval_interval: usize,
    #[arg(long, default_value_t = train::LEARNING_RATE)]
    learning_rate: f32,
    #[arg(long, default_value_t = train::MOMENTUM)]
    momentum: f32,
    #[arg(long, default_value_t = train::DROPOUT_RATE)]
    dropout_rate: f32,
    #[arg(long, default_value_t = train::SEED)]
    seed: u64,
    /// Train on a small generated dataset instead of MNIST
    #[arg(long)]
    synthetic: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error during training: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = TrainConfig {
        batch_size: cli.batch_size,
        total_steps: cli.total_steps,
        eval_interval: cli.eval_interval,
        learning_rate: cli.learning_rate,
        momentum: cli.momentum,
        dropout_rate: cli.dropout_rate,
        seed: cli.seed,
        ..TrainConfig::default()
    };

    let datasets = if cli.synthetic {
        Datasets::synthetic(5_000, 500, 1_000, cli.seed).context("generating synthetic dataset")?
    } else {
        load_mnist(&cli.data_dir)
            .with_context(|| format!("loading MNIST from {}", cli.data_dir.display()))?
    };
    let summary = JsonlSummary::create(&cli.summary_path)
        .with_context(|| format!("creating summary file {}", cli.summary_path.display()))?;

    let pb = ProgressBar::new(config.total_steps as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?,
    );

    let mut trainer = Trainer::new(config, datasets, summary, io::stdout())
        .context("initializing training")?
        .with_progress(pb);
    let report = trainer.run().context("training run failed")?;

    info!(
        "Training completed: {} steps, test accuracy {:.4}",
        report.steps_completed, report.test_accuracy
    );
    Ok(())
}
