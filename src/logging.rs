//! Structured logging and tracing for the wallbox bridge
//!
//! Console output plus a daily rolling log file written through a
//! non-blocking appender. Rotated files are compressed by the maintenance
//! task in [`rotation`].

use crate::config::LoggingConfig;
use crate::error::{BridgeError, Result};
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod level;
pub mod rotation;
mod state;
mod structured;

pub use level::parse_log_level;
pub use rotation::LogFileLayout;
use state::{INIT_ERROR, INIT_ONCE, LOG_GUARD};
pub use structured::{LogContext, StructuredLogger, get_logger, get_logger_with_context};

/// Environment variable that forces console-only logging
pub const DISABLE_FILE_LOG_ENV_VAR: &str = "WALLBOX_BRIDGE_DISABLE_FILE_LOG";

/// Initialize logging system based on configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        let init_result = (|| -> Result<()> {
            let level = parse_log_level(&config.level)?;
            let filter = build_env_filter(level);

            if should_use_console_only() {
                init_console_only_logging(filter, config.json_format, level);
                return Ok(());
            }

            init_file_logging(config, filter, level)
        })();

        if let Err(e) = init_result {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(BridgeError::config(err.clone()));
    }
    Ok(())
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = format!("wallbox_bridge={level},tokio_modbus=warn,rumqttc=warn");
        EnvFilter::new(directives)
    })
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os(DISABLE_FILE_LOG_ENV_VAR).is_some()
}

fn init_console_only_logging(filter: EnvFilter, json_format: bool, level: Level) {
    let console_layer = {
        let layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if json_format {
            layer.json().with_filter(LevelFilter::from_level(level)).boxed()
        } else {
            layer.with_filter(LevelFilter::from_level(level)).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();

    info!("Logging initialized - level: {:?}, console-only", level);
}

fn init_file_logging(config: &LoggingConfig, filter: EnvFilter, level: Level) -> Result<()> {
    let layout = LogFileLayout::from_config(config);
    std::fs::create_dir_all(&layout.directory).map_err(|e| {
        BridgeError::io(format!(
            "Failed to create log directory {}: {}",
            layout.directory.display(), e
        ))
    })?;

    // Set up log file appender with daily rotation
    let mut builder = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix(layout.prefix.as_str());
    if let Some(suffix) = &layout.suffix {
        builder = builder.filename_suffix(suffix.as_str());
    }
    let file_appender = builder
        .build(&layout.directory)
        .map_err(|e| BridgeError::io(format!("Failed to create log file appender: {}", e)))?;

    let (non_blocking_appender, guard) = non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let file_layer = {
        let base = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_ansi(false)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if config.json_format {
            base.json().with_filter(LevelFilter::from_level(level)).boxed()
        } else {
            base.with_filter(LevelFilter::from_level(level)).boxed()
        }
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(file_layer);

    if config.console_output {
        let console_layer = {
            let base = fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false);
            if config.json_format {
                base.json().with_filter(LevelFilter::from_level(level)).boxed()
            } else {
                base.with_filter(LevelFilter::from_level(level)).boxed()
            }
        };
        subscriber.with(console_layer).init();
    } else {
        subscriber.init();
    }

    info!(
        "Logging initialized - level: {:?}, directory: {}, file: {}",
        level, config.directory, config.file_name
    );
    Ok(())
}

/// Start compressing rotated log files in the background.
///
/// Does nothing when logging runs console-only.
pub fn start_log_maintenance(config: &LoggingConfig) -> Option<tokio::task::JoinHandle<()>> {
    if should_use_console_only() {
        return None;
    }
    let layout = LogFileLayout::from_config(config);
    let keep = config.backup_count as usize;
    Some(rotation::spawn_maintenance(layout, keep))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_console_only_in_tests() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        // Second call is a no-op
        assert!(init_logging(&config).is_ok());
        assert!(start_log_maintenance(&config).is_none());
    }
}
