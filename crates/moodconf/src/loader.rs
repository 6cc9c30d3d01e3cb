//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, MoodConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/mooddetect/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("mooddetect/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("mooddetect.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file into a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a typed config, filling gaps with defaults.
pub fn table_to_config(table: toml::Table, origin: &Path) -> Result<MoodConfig, ConfigError> {
    let mut config: MoodConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    if let Some(path) = config.capture.frame_path.take() {
        config.capture.frame_path = Some(expand_path(&path.to_string_lossy()));
    }

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut MoodConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides using an arbitrary variable lookup.
pub fn apply_overrides_from<F>(config: &mut MoodConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("MOODDETECT_SONGS_URL") {
        config.endpoints.songs_url = v;
        sources.env_overrides.push("MOODDETECT_SONGS_URL".to_string());
    }
    if let Some(v) = lookup("MOODDETECT_INFERENCE_URL") {
        config.endpoints.inference_url = v;
        sources.env_overrides.push("MOODDETECT_INFERENCE_URL".to_string());
    }
    if let Some(v) = lookup("MOODDETECT_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.endpoints.timeout_ms = ms;
            sources.env_overrides.push("MOODDETECT_TIMEOUT_MS".to_string());
        }
    }

    if let Some(v) = lookup("MOODDETECT_FRAME_PATH") {
        config.capture.frame_path = Some(expand_path(&v));
        sources.env_overrides.push("MOODDETECT_FRAME_PATH".to_string());
    }

    if let Some(v) = lookup("MOODDETECT_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        sources.env_overrides.push("MOODDETECT_OTLP_ENDPOINT".to_string());
    }
    // Also support standard OTEL env var
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Some(v) = lookup("MOODDETECT_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("MOODDETECT_LOG_LEVEL".to_string());
    }
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
