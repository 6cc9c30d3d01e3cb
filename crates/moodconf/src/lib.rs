//! Configuration loading for the mood detection session.
//!
//! Kept free of runtime dependencies so the binary can read its settings
//! before logging or the async runtime exist.
//!
//! # Usage
//!
//! ```rust,no_run
//! use moodconf::MoodConfig;
//!
//! let config = MoodConfig::load().expect("Failed to load config");
//! println!("Songs backend: {}", config.endpoints.songs_url);
//! println!("Inference: {}", config.endpoints.inference_url);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/mooddetect/config.toml` (system)
//! 2. `~/.config/mooddetect/config.toml` (user)
//! 3. `./mooddetect.toml` (local override, or the `--config` path)
//! 4. Environment variables (`MOODDETECT_*`)
//!
//! # Example Config
//!
//! ```toml
//! [endpoints]
//! songs_url = "http://localhost:3000"
//! inference_url = "http://127.0.0.1:2030"
//! timeout_ms = 10000
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [capture]
//! frame_path = "~/frames/latest.rgb"
//! width = 640
//! height = 480
//!
//! [playback]
//! probe_durations = true
//! ```

pub mod infra;
pub mod loader;
pub mod session;

pub use infra::{EndpointsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use session::{CaptureConfig, PlaybackConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MoodConfig {
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,
}

impl MoodConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file taking the place of the
    /// local `./mooddetect.toml` override. System and user configs still
    /// load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::table_to_config(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "endpoints.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "capture dimensions must be non-zero (got {}x{})",
                self.capture.width, self.capture.height
            )));
        }
        for (name, url) in [
            ("endpoints.songs_url", &self.endpoints.songs_url),
            ("endpoints.inference_url", &self.endpoints.inference_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be an http(s) URL (got {:?})",
                    name, url
                )));
            }
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# mooddetect configuration\n\n");

        output.push_str("[endpoints]\n");
        output.push_str(&format!("songs_url = \"{}\"\n", self.endpoints.songs_url));
        output.push_str(&format!(
            "inference_url = \"{}\"\n",
            self.endpoints.inference_url
        ));
        output.push_str(&format!("timeout_ms = {}\n", self.endpoints.timeout_ms));

        output.push_str("\n[telemetry]\n");
        match &self.telemetry.otlp_endpoint {
            Some(endpoint) => output.push_str(&format!("otlp_endpoint = \"{}\"\n", endpoint)),
            None => output.push_str("# otlp_endpoint = \"127.0.0.1:4317\"\n"),
        }
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output.push_str("\n[capture]\n");
        if let Some(path) = &self.capture.frame_path {
            output.push_str(&format!("frame_path = \"{}\"\n", path.display()));
        }
        output.push_str(&format!("width = {}\n", self.capture.width));
        output.push_str(&format!("height = {}\n", self.capture.height));
        output.push_str(&format!(
            "ready_timeout_ms = {}\n",
            self.capture.ready_timeout_ms
        ));

        output.push_str("\n[playback]\n");
        output.push_str(&format!(
            "probe_durations = {}\n",
            self.playback.probe_durations
        ));

        output
    }
}
