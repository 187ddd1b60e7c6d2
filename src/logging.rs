use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;
use crate::error::SettingsError;

// Keeps the file writer flushing for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`. Calling this again after a subscriber
/// is installed is a no-op.
pub fn init_logging(config: &LogConfig) -> Result<(), SettingsError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config_filter(config)?,
    };

    let file_layer = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // A repeated init keeps the first guard
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    if installed.is_err() {
        tracing::debug!("[Logging] Subscriber already installed");
    }
    Ok(())
}

fn config_filter(config: &LogConfig) -> Result<EnvFilter, SettingsError> {
    EnvFilter::try_new(&config.filter)
        .map_err(|e| SettingsError::Config(format!("invalid log filter '{}': {}", config.filter, e)))
}
