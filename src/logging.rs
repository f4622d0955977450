//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingSection};

/// Keeps the file writer flushing until dropped. Hold it for the life of
/// the process.
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Resolve the filter: `RUST_LOG` first, then the configured directives.
pub fn env_filter(config: &LoggingSection) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .with_context(|| format!("Invalid logging filter '{}'", config.filter)),
    }
}

/// Install the global subscriber: stderr in the configured format, plus a
/// daily-rotated JSON file when `logging.directory` is set.
pub fn init_tracing(config: &LoggingSection) -> Result<LogGuard> {
    let filter = env_filter(config)?;

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "quadro.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_filter_is_parsed() {
        let config = LoggingSection {
            filter: "quadro=debug".to_string(),
            ..Default::default()
        };
        assert!(env_filter(&config).is_ok());
    }
}
