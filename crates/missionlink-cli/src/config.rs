//! Configuration system for the MissionLink CLI.

use missionlink_core::{LinkModel, TransferConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// MissionLink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Transfer retry policy
    #[serde(default)]
    pub transfer: TransferSettings,
    /// Simulated link behaviour
    #[serde(default)]
    pub link: LinkSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Response timeout per step in milliseconds
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Resends allowed per step
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Simulated link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Probability that any single message is lost
    #[serde(default)]
    pub loss: f64,
    /// One-way latency in milliseconds
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Seed for the loss generator
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_ack_timeout_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    1
}

fn default_latency_ms() -> u64 {
    5
}

fn default_seed() -> u64 {
    0x4d4c
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            loss: 0.0,
            latency_ms: default_latency_ms(),
            seed: default_seed(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("missionlink/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Engine configuration for these settings
    #[must_use]
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig::default()
            .with_ack_timeout(Duration::from_millis(self.transfer.ack_timeout_ms))
            .with_max_retries(self.transfer.max_retries)
    }

    /// Link model for these settings
    #[must_use]
    pub fn link_model(&self) -> LinkModel {
        LinkModel::lossy(self.link.loss, self.link.seed)
            .with_latency(Duration::from_millis(self.link.latency_ms))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.transfer_config().validate()?;

        if self.transfer.max_retries > 100 {
            anyhow::bail!("Max retries must be at most 100");
        }

        if !(0.0..1.0).contains(&self.link.loss) {
            anyhow::bail!(
                "Link loss must be in [0, 1), got {}",
                self.link.loss
            );
        }

        if self.link.latency_ms >= self.transfer.ack_timeout_ms {
            anyhow::bail!(
                "Link latency ({} ms) must be below the ack timeout ({} ms)",
                self.link.latency_ms,
                self.transfer.ack_timeout_ms
            );
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
