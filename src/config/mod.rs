/// Configuration module for clockprint
///
/// This module handles loading and validating the single configuration file
/// (config.toml) that supplies the defaults for both pipelines. CLI flags
/// override the values loaded here.

use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub app_name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_logging: bool,
    pub log_dir: String,
    pub max_files: usize,
}

/// Defaults for the classifier and the offline pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Destination IP the trust probe watches for flag traffic
    pub host: String,
    /// Bound on concurrently classified packets in the offline pipeline
    pub max_concurrent_tasks: usize,
    /// Packets between progress lines when progress is enabled
    pub progress_interval: u64,
}

/// Defaults for the kernel packet-queue transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue_num: u16,
    pub max_packet_len: u32,
    pub max_queue_len: u32,
    pub write_timeout_ms: u64,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        debug!("Loading configuration from: {}", path_str);

        let config = Config::builder()
            .add_source(File::with_name(&path_str))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Load configuration with a default fallback
    ///
    /// Attempts to load from the specified path, or uses default config if not found
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::from_file(&path) {
            Ok(config) => Ok(config),
            Err(e) => {
                debug!("Failed to load config from file: {}. Using defaults.", e);
                Ok(Self::default())
            }
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Message(format!(
                "Invalid logging level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Message(format!(
                "Invalid logging format: {}. Must be one of: {:?}",
                self.logging.format, valid_formats
            )));
        }

        if self.engine.host.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Message(format!(
                "Invalid engine host IP: {}",
                self.engine.host
            )));
        }

        if self.engine.max_concurrent_tasks == 0 {
            return Err(ConfigError::Message(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }

        if self.engine.progress_interval == 0 {
            return Err(ConfigError::Message(
                "progress_interval must be at least 1".to_string(),
            ));
        }

        if self.queue.write_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "write_timeout_ms must be at least 1".to_string(),
            ));
        }

        if self.queue.max_queue_len == 0 {
            return Err(ConfigError::Message(
                "max_queue_len must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                app_name: "clockprint".to_string(),
                version: "0.1.0".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                file_logging: false,
                log_dir: "./logs".to_string(),
                max_files: 5,
            },
            engine: EngineConfig {
                host: "10.60.2.1".to_string(),
                max_concurrent_tasks: 256,
                progress_interval: 10_000,
            },
            queue: QueueConfig {
                queue_num: 420,
                max_packet_len: 0xFFFF,
                max_queue_len: 0xFF,
                write_timeout_ms: 15,
            },
        }
    }
}
