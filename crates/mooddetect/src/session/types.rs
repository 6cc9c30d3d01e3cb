use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mood::Mood;
use crate::playback::TrackView;
use crate::types::TrackDescriptor;

/// Identifies one orchestrator instance in logs and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    AwaitingCapture,
    Idle,
    Detecting,
    Error,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Initializing => "initializing",
            SessionState::AwaitingCapture => "awaiting capture",
            SessionState::Idle => "idle",
            SessionState::Detecting => "detecting",
            SessionState::Error => "error",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Everything presentation needs to follow a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    /// Announced as soon as resolution finishes, before tracks arrive.
    MoodDetected { mood: Mood },
    TracksPublished { mood: Mood, tracks: Vec<TrackDescriptor> },
    TrackChanged { track: TrackView },
    /// A user-facing message; the text is ready to show.
    Notice { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub capture_ready: bool,
    pub mood: Option<Mood>,
    pub tracks: Vec<TrackDescriptor>,
    pub playback: Vec<TrackView>,
    pub last_error: Option<String>,
}

/// Knobs the orchestrator takes from configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ready_timeout: Duration,
    pub probe_durations: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_millis(5000),
            probe_durations: true,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &moodconf::MoodConfig) -> Self {
        Self {
            ready_timeout: Duration::from_millis(config.capture.ready_timeout_ms),
            probe_durations: config.playback.probe_durations,
        }
    }
}
