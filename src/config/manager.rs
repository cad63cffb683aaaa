//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(max_message) = std::env::var("WSBRIDGE_MAX_MESSAGE_SIZE") {
            config.transport.max_message_size = max_message
                .parse::<usize>()
                .with_context(|| format!("Invalid WSBRIDGE_MAX_MESSAGE_SIZE: {}", max_message))?;
        }

        if let Ok(max_frame) = std::env::var("WSBRIDGE_MAX_FRAME_SIZE") {
            config.transport.max_frame_size = max_frame
                .parse::<usize>()
                .with_context(|| format!("Invalid WSBRIDGE_MAX_FRAME_SIZE: {}", max_frame))?;
        }

        if let Ok(capacity) = std::env::var("WSBRIDGE_EVENT_CAPACITY") {
            config.events.channel_capacity = capacity
                .parse::<usize>()
                .with_context(|| format!("Invalid WSBRIDGE_EVENT_CAPACITY: {}", capacity))?;
        }

        if let Ok(log_level) = std::env::var("WSBRIDGE_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.transport.max_message_size < 1024 {
            bail!("transport.max_message_size must be at least 1024 bytes");
        }

        if self.transport.max_message_size > (1 << 30) {
            bail!("transport.max_message_size cannot exceed 1 GiB");
        }

        if self.transport.max_frame_size < 1024 {
            bail!("transport.max_frame_size must be at least 1024 bytes");
        }

        if self.transport.max_frame_size > self.transport.max_message_size {
            bail!("transport.max_frame_size cannot exceed transport.max_message_size");
        }

        if self.events.channel_capacity == 0 {
            bail!("events.channel_capacity must be greater than 0");
        }

        if self.events.channel_capacity > 65536 {
            bail!("events.channel_capacity cannot exceed 65536");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        max_message_size: Option<usize>,
        event_capacity: Option<usize>,
    ) {
        if let Some(size) = max_message_size {
            self.transport.max_message_size = size;
            tracing::info!("CLI override: max message size set to {}", size);
        }

        if let Some(capacity) = event_capacity {
            self.events.channel_capacity = capacity;
            tracing::info!("CLI override: event channel capacity set to {}", capacity);
        }
    }
}
