//! Device and playback settings for a detection session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Video input settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// File used as the frame source by the file camera.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_path: Option<PathBuf>,

    /// Frame width reported once the source is ready.
    #[serde(default = "CaptureConfig::default_width")]
    pub width: u32,

    /// Frame height reported once the source is ready.
    #[serde(default = "CaptureConfig::default_height")]
    pub height: u32,

    /// How long to wait for the device to report usable frames.
    /// Default: 5000
    #[serde(default = "CaptureConfig::default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

impl CaptureConfig {
    fn default_width() -> u32 {
        640
    }

    fn default_height() -> u32 {
        480
    }

    fn default_ready_timeout_ms() -> u64 {
        5_000
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_path: None,
            width: Self::default_width(),
            height: Self::default_height(),
            ready_timeout_ms: Self::default_ready_timeout_ms(),
        }
    }
}

/// Playback pool behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Probe every track's duration as soon as a track list arrives.
    #[serde(default = "PlaybackConfig::default_probe_durations")]
    pub probe_durations: bool,
}

impl PlaybackConfig {
    fn default_probe_durations() -> bool {
        true
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            probe_durations: Self::default_probe_durations(),
        }
    }
}
