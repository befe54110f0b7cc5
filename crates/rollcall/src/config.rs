//! Configuration management for rollcall.
//!
//! This module provides configuration loading and validation using figment,
//! supporting a TOML config file, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default config directory name.
const CONFIG_DIR_NAME: &str = "rollcall";

/// Environment variable holding the text-generation credential.
pub const API_KEY_ENV: &str = "API_KEY";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. The `API_KEY` environment variable (credential only)
/// 2. Environment variables prefixed with `ROLLCALL_`, sections split on `__`
/// 3. TOML config file at `~/.config/rollcall/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Report backend configuration.
    pub report: ReportConfig,
    /// Simulated detection configuration.
    pub detection: DetectionConfig,
    /// Camera configuration.
    pub camera: CameraConfig,
}

/// Report backend configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Credential for the text-generation service. Never serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model the prompt is sent to.
    pub model: String,
    /// Base URL of the generative language API.
    pub endpoint: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Simulated detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Interval between detection ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// How long a detection notice stays visible in milliseconds.
    pub notice_duration_ms: u64,
    /// Fixed seed for the student picker. Entropy-seeded when unset.
    pub seed: Option<u64>,
}

/// Camera configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// JPEG quality for captured photos (1-100).
    pub jpeg_quality: u8,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_secs: 60,
        }
    }
}

impl std::fmt::Debug for ReportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 4_000,
            notice_duration_ms: 3_000,
            seed: None,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            jpeg_quality: 85,
        }
    }
}

impl ReportConfig {
    /// Whether a non-blank credential is configured.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("ROLLCALL_").split("__"))
            .merge(
                Env::raw()
                    .only(&[API_KEY_ENV])
                    .map(|_| "report.api_key".into()),
            );

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.detection.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms must be greater than 0"));
        }

        if self.detection.notice_duration_ms == 0 {
            return Err(invalid("notice_duration_ms must be greater than 0"));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(invalid(format!(
                "camera resolution must be non-zero (got {}x{})",
                self.camera.width, self.camera.height
            )));
        }

        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(invalid(format!(
                "jpeg_quality must be between 1 and 100 (got {})",
                self.camera.jpeg_quality
            )));
        }

        if self.report.model.trim().is_empty() {
            return Err(invalid("report model must not be empty"));
        }

        let endpoint = self.report.endpoint.trim();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(invalid(format!(
                "report endpoint must be an http(s) URL: {endpoint}"
            )));
        }

        Ok(())
    }

    /// Get the detection tick interval as a Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.detection.tick_interval_ms)
    }

    /// Get the detection notice duration as a Duration.
    #[must_use]
    pub fn notice_duration(&self) -> Duration {
        Duration::from_millis(self.detection.notice_duration_ms)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
