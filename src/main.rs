//! scene_transfer CLI
//!
//! Cross-validated transfer learning of a pretrained ResNet-50 on remote-sensing
//! scenes, plus helpers to export and inspect the fold partitions.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use scene_transfer::backend::{default_device, device_summary, TrainingBackend};
use scene_transfer::config::ExperimentConfig;
use scene_transfer::metadata::{self, export_folds, Split};
use scene_transfer::training::{CrossValidator, FoldReport, Phase, ProgressEvent};
use scene_transfer::utils::logging::{init_logging, LogConfig};
use scene_transfer::utils::{format_duration, format_number, format_percent};

/// ResNet-50 transfer learning with k-fold cross-validation
#[derive(Parser, Debug)]
#[command(name = "scene_transfer")]
#[command(version)]
#[command(about = "Cross-validated scene classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false")]
    quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train and evaluate every configured fold
    Train {
        /// Experiment configuration (TOML)
        #[arg(short, long, default_value = "config/resisc.toml")]
        config: PathBuf,

        /// Override the number of epochs per fold
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Override the batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Override the learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Run only these folds (comma separated)
        #[arg(long, value_delimiter = ',')]
        folds: Option<Vec<usize>>,

        /// Override the checkpoint directory
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Write per-epoch metrics of every fold to this CSV file
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// Write fold_<k>_<train|test>.csv files from the configured metadata source
    ExportFolds {
        /// Experiment configuration (TOML)
        #[arg(short, long, default_value = "config/resisc.toml")]
        config: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show per-class sample counts of every fold
    Folds {
        /// Experiment configuration (TOML)
        #[arg(short, long, default_value = "config/resisc.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&LogConfig::from_flags(cli.verbose, cli.quiet));

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            epochs,
            batch_size,
            learning_rate,
            folds,
            checkpoint_dir,
            metrics_out,
        } => {
            let mut config = load_config(&config)?;
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(lr) = learning_rate {
                config.training.learning_rate = lr;
            }
            if folds.is_some() {
                config.folds.run = folds;
            }
            if checkpoint_dir.is_some() {
                config.output.checkpoint_dir = checkpoint_dir;
            }
            if metrics_out.is_some() {
                config.output.metrics_csv = metrics_out;
            }
            cmd_train(config)?;
        }

        Commands::ExportFolds { config, output } => {
            cmd_export(&load_config(&config)?, &output)?;
        }

        Commands::Folds { config } => {
            cmd_folds(&load_config(&config)?)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║   Scene Transfer                                             ║
 ║   ResNet-50 transfer learning with k-fold cross-validation   ║
 ╚══════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn load_config(path: &Path) -> Result<ExperimentConfig> {
    let config = ExperimentConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok(config)
}

fn cmd_train(config: ExperimentConfig) -> Result<()> {
    config.validate()?;

    let device = default_device();
    let folds = config.fold_indices();

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Backend:        {}", device_summary(&device));
    println!("  Dataset root:   {}", config.data.root.display());
    println!("  Labels:         {:?}", config.metadata.labels);
    println!("  Folds:          {:?} of {}", folds, config.folds.num_folds);
    println!("  Epochs:         {}", config.training.epochs);
    println!("  Batch size:     {}", config.training.batch_size);
    println!("  Learning rate:  {}", config.training.learning_rate);
    println!("  Optimizer:      {}", config.training.optimizer);
    match &config.model.pretrained_weights {
        Some(path) => println!("  Pretrained:     {}", path.display()),
        None => println!("  Pretrained:     {}", "none (random init)".yellow()),
    }
    println!();

    if let Some(dir) = &config.output.checkpoint_dir {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("experiment.toml"), config.to_toml()?)?;
    }

    let provider = metadata::open_provider(&config)?;
    let validator = CrossValidator::<TrainingBackend>::new(config.clone(), device);

    let started = std::time::Instant::now();
    let mut bar: Option<ProgressBar> = None;
    let reports = validator.run(provider.as_ref(), &mut |event| match event {
        ProgressEvent::FoldStarted {
            fold,
            train_samples,
            test_samples,
            ..
        } => {
            println!(
                "{}",
                format!(
                    "Fold {} ({} train / {} test)",
                    fold,
                    format_number(train_samples),
                    format_number(test_samples)
                )
                .yellow()
                .bold()
            );
        }
        ProgressEvent::BatchCompleted {
            epoch,
            phase,
            batch,
            num_batches,
            running,
            ..
        } => {
            let pb = bar.get_or_insert_with(|| new_bar(num_batches as u64));
            if batch == 0 {
                pb.reset();
                pb.set_length(num_batches as u64);
            }
            pb.set_position(batch as u64 + 1);
            pb.set_message(format!(
                "epoch {} {} loss {:.4} acc {:.2}%",
                epoch + 1,
                phase,
                running.loss,
                running.accuracy * 100.0
            ));
            if phase == Phase::Eval && batch + 1 == num_batches {
                pb.finish_and_clear();
                bar = None;
            }
        }
        ProgressEvent::EpochCompleted { report, .. } => {
            println!(
                "  {} Epoch {} | Train loss {:.4} acc {:.2}% | Eval loss {:.4} acc {:.2}% | {}",
                "→".cyan(),
                report.epoch + 1,
                report.train.loss,
                report.train.accuracy * 100.0,
                report.eval.loss,
                report.eval.accuracy * 100.0,
                format_duration(report.duration_secs)
            );
        }
        ProgressEvent::FoldCompleted { fold, final_eval } => {
            if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
            println!(
                "  {} Fold {} final eval accuracy: {}",
                "✓".green(),
                fold,
                format_percent(final_eval.accuracy)
            );
            println!();
        }
    })?;

    if let Some(path) = &config.output.metrics_csv {
        write_metrics_csv(path, &reports)?;
        println!("  Metrics written to {}", path.display());
    }

    print_summary(&reports);
    info!(
        "Cross-validation finished in {}",
        format_duration(started.elapsed().as_secs_f64())
    );
    Ok(())
}

fn new_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Mean and population standard deviation
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn print_summary(reports: &[FoldReport]) {
    println!("{}", "Cross-Validation Summary:".cyan().bold());
    for report in reports {
        let eval = report.final_eval();
        println!(
            "  Fold {}: {} ({}/{}), best epoch {}",
            report.fold,
            format_percent(eval.accuracy),
            eval.correct,
            eval.samples,
            format_percent(report.best_eval_accuracy())
        );
    }
    let accuracies: Vec<f64> = reports.iter().map(|r| r.final_eval().accuracy).collect();
    let (mean, std) = mean_std(&accuracies);
    println!(
        "  {} {} ± {} over {} folds",
        "Mean eval accuracy:".green().bold(),
        format_percent(mean),
        format_percent(std),
        reports.len()
    );
}

#[derive(Serialize)]
struct MetricsRow {
    fold: usize,
    epoch: usize,
    train_loss: f64,
    train_accuracy: f64,
    eval_loss: f64,
    eval_accuracy: f64,
    duration_secs: f64,
}

fn write_metrics_csv(path: &Path, reports: &[FoldReport]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for report in reports {
        for epoch in &report.epochs {
            writer.serialize(MetricsRow {
                fold: report.fold,
                epoch: epoch.epoch + 1,
                train_loss: epoch.train.loss,
                train_accuracy: epoch.train.accuracy,
                eval_loss: epoch.eval.loss,
                eval_accuracy: epoch.eval.accuracy,
                duration_secs: epoch.duration_secs,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn cmd_export(config: &ExperimentConfig, output: &Path) -> Result<()> {
    config.validate()?;
    let provider = metadata::open_provider(config)?;
    let folds: Vec<usize> = (0..config.folds.num_folds).collect();

    let written = export_folds(provider.as_ref(), output, &folds)?;
    println!(
        "{} Wrote {} files to {}",
        "✓".green(),
        written.len(),
        output.display()
    );
    Ok(())
}

fn cmd_folds(config: &ExperimentConfig) -> Result<()> {
    config.validate()?;
    let provider = metadata::open_provider(config)?;

    println!("{}", "Fold Partitions:".cyan().bold());
    for fold in 0..config.folds.num_folds {
        let partition = provider.fold_partition(fold)?;
        println!(
            "  Fold {}: {} train / {} test",
            fold,
            format_number(partition.train.len()),
            format_number(partition.test.len())
        );
        for split in [Split::Train, Split::Test] {
            let counts = partition.class_counts(split);
            let line = counts
                .iter()
                .map(|(label, count)| format!("{label}: {count}"))
                .collect::<Vec<_>>()
                .join(", ");
            println!("    {:<5} {}", split.as_str(), line);
        }
    }
    Ok(())
}
