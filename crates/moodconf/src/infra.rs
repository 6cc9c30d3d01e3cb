//! Endpoint and telemetry configuration - fixed for the lifetime of a process.

use serde::{Deserialize, Serialize};

/// External services the session talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Recommendation backend base URL (serves `GET /songs?mood=<label>`).
    /// Default: http://localhost:3000
    #[serde(default = "EndpointsConfig::default_songs_url")]
    pub songs_url: String,

    /// Expression inference service base URL (`/health`, `/detect`).
    /// Default: http://127.0.0.1:2030
    #[serde(default = "EndpointsConfig::default_inference_url")]
    pub inference_url: String,

    /// Per-request timeout in milliseconds.
    /// Default: 10000
    #[serde(default = "EndpointsConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl EndpointsConfig {
    fn default_songs_url() -> String {
        "http://localhost:3000".to_string()
    }

    fn default_inference_url() -> String {
        "http://127.0.0.1:2030".to_string()
    }

    fn default_timeout_ms() -> u64 {
        10_000
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            songs_url: Self::default_songs_url(),
            inference_url: Self::default_inference_url(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Telemetry and logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint (host:port). Unset means console logging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}
