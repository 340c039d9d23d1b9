/// Logging setup for clockprint
///
/// This module initializes and configures the tracing-based logging system
/// with support for console and file output, structured logging, and configurable
/// levels. It also carries the user-facing stderr helpers: fatal errors are
/// prefixed `FATAL` in red, recoverable ones `ERR` in yellow.

use crate::config::LoggingConfig;
use crate::error::{FpError, FpResult};
use std::path::Path;
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Initialize the logging system based on configuration
///
/// # Arguments
/// * `config` - Logging configuration from config.toml
/// * `verbosity` - CLI verbosity bumps (0 = config level, 1 = debug, 2+ = trace)
///
/// # Returns
/// * `FpResult<Option<WorkerGuard>>` - Guard that must be kept alive for file logging
pub fn init_logging(config: &LoggingConfig, verbosity: u8) -> FpResult<Option<WorkerGuard>> {
    let level = match verbosity {
        0 => parse_log_level(&config.level)?,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("clockprint={}", level)));

    let guard = if config.file_logging {
        let log_dir = Path::new(&config.log_dir);

        if !log_dir.exists() {
            std::fs::create_dir_all(log_dir).map_err(|e| {
                FpError::validation("log_dir", format!("Failed to create log directory: {}", e))
            })?;
        }

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("clockprint")
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(log_dir)
            .map_err(|e| {
                FpError::validation("log_dir", format!("Failed to create file appender: {}", e))
            })?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Console output goes to stderr so stdout stays clean for the
        // display lines and the pcap sink when `-o -` is given.
        if config.format == "json" {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .with(fmt::layer().json().with_target(true).with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .with(fmt::layer().with_target(true).with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else {
        if config.format == "json" {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .init();
        }

        None
    };

    info!(
        "Logging initialized: level={}, format={}, file_logging={}",
        level, config.format, config.file_logging
    );

    Ok(guard)
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> FpResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(FpError::validation(
            "log_level",
            format!("Invalid log level: {}", level),
        )),
    }
}

/// Print a recoverable error to stderr with a yellow `ERR` prefix
pub fn log_error(reason: &str, err: &dyn std::fmt::Display) {
    eprintln!("{}ERR{} {}{}", YELLOW, RESET, reason, err);
}

/// Print a fatal error to stderr with a red `FATAL` prefix and exit 1
pub fn log_fatal_error(reason: &str, err: &dyn std::fmt::Display) -> ! {
    eprintln!("{}FATAL{} {}{}", RED, RESET, reason, err);
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("WARN"), Ok(Level::WARN)));
        assert!(parse_log_level("invalid").is_err());
    }
}
