//! Logging Module
//!
//! Structured logging with the `tracing` crate, plus a small logger that
//! reports fold and epoch progress of a cross-validation run.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::training::metrics::EpochReport;
use crate::utils::error::{Result, SceneError};
use crate::utils::format_duration;

/// Crates whose debug output drowns the fold progress lines
const NOISY_TARGETS: [&str; 2] = ["burn_import", "burn_core"];

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level for this crate
    pub level: Level,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs (rayon decode workers show up here)
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug output with module paths and thread ids
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            include_thread_ids: true,
            ..Self::default()
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Preset for the CLI flags; `quiet` wins over `verbose`
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (_, true) => Self::quiet(),
            (true, false) => Self::verbose(),
            (false, false) => Self::default(),
        }
    }

    /// `EnvFilter` directive: the configured level, with framework crates
    /// capped at `warn` unless the level is already stricter
    pub fn filter_directive(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        let framework = if self.level < Level::WARN { level.as_str() } else { "warn" };
        let mut directive = level.clone();
        for target in NOISY_TARGETS {
            directive.push_str(&format!(",{target}={framework}"));
        }
        directive
    }
}

/// Initialize logging with the given configuration
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids),
        )
        .with(filter)
        .try_init()
        .map_err(|e| SceneError::Config(format!("Failed to initialize logging: {e}")))
}

/// Fold/epoch progress logger
pub struct TrainingLogger {
    fold: usize,
    total_epochs: usize,
    epoch_start: Instant,
    fold_start: Instant,
}

impl TrainingLogger {
    /// Create a new logger for one fold
    pub fn new(fold: usize, total_epochs: usize) -> Self {
        Self {
            fold,
            total_epochs,
            epoch_start: Instant::now(),
            fold_start: Instant::now(),
        }
    }

    /// Log start of the fold
    pub fn start_fold(&mut self, train_samples: usize, test_samples: usize) {
        self.fold_start = Instant::now();
        tracing::info!(
            fold = self.fold,
            "Fold {} started: {} train / {} test samples",
            self.fold,
            train_samples,
            test_samples
        );
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch_start = Instant::now();
        tracing::debug!(
            fold = self.fold,
            "Epoch {}/{} started",
            epoch + 1,
            self.total_epochs
        );
    }

    /// Log end of an epoch with train and eval metrics
    pub fn end_epoch(&self, report: &EpochReport) {
        let epochs_done = report.epoch + 1;
        let avg_epoch_secs = self.fold_start.elapsed().as_secs_f64() / epochs_done as f64;
        let eta_secs = self.total_epochs.saturating_sub(epochs_done) as f64 * avg_epoch_secs;

        tracing::info!(
            fold = self.fold,
            "Epoch {}/{} in {} | train loss {:.4} acc {:.2}% | eval loss {:.4} acc {:.2}% | ETA {}",
            epochs_done,
            self.total_epochs,
            format_duration(self.epoch_start.elapsed().as_secs_f64()),
            report.train.loss,
            report.train.accuracy * 100.0,
            report.eval.loss,
            report.eval.accuracy * 100.0,
            format_duration(eta_secs)
        );
    }

    /// Log fold completion
    pub fn finish_fold(&self, final_eval_accuracy: f64) {
        tracing::info!(
            fold = self.fold,
            "Fold {} complete in {} | final eval accuracy {:.2}%",
            self.fold,
            format_duration(self.fold_start.elapsed().as_secs_f64()),
            final_eval_accuracy * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_presets() {
        assert_eq!(LogConfig::from_flags(false, false).level, Level::INFO);
        assert_eq!(LogConfig::from_flags(true, false).level, Level::DEBUG);
        assert!(LogConfig::from_flags(true, false).include_target);
        assert_eq!(LogConfig::from_flags(true, true).level, Level::ERROR);
    }

    #[test]
    fn test_filter_directive_caps_framework_crates() {
        assert_eq!(
            LogConfig::default().filter_directive(),
            "info,burn_import=warn,burn_core=warn"
        );
        assert_eq!(
            LogConfig::quiet().filter_directive(),
            "error,burn_import=error,burn_core=error"
        );
    }

    #[test]
    fn test_training_logger_tracks_fold() {
        let mut logger = TrainingLogger::new(3, 10);
        logger.start_fold(480, 120);
        logger.start_epoch(0);
        assert_eq!(logger.fold, 3);
        assert_eq!(logger.total_epochs, 10);
    }
}
