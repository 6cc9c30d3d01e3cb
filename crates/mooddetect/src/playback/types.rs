use serde::Serialize;

use crate::types::TrackId;

/// Lifecycle of one audio resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Never selected, or played through to the end.
    Idle,
    Loading,
    Playing,
    Paused,
    /// Load or playback failed. Selecting the track again retries.
    Unplayable,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceState::Idle => "idle",
            ResourceState::Loading => "loading",
            ResourceState::Playing => "playing",
            ResourceState::Paused => "paused",
            ResourceState::Unplayable => "unplayable",
        };
        f.write_str(s)
    }
}

/// Per-track state for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackView {
    pub index: usize,
    pub id: TrackId,
    pub state: ResourceState,
    /// Seconds, once known from a load or a probe.
    pub duration: Option<f64>,
    pub liked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEventKind {
    Ended,
    Error(String),
}

/// Signal from a backing handle. Stamped with the pool generation that
/// created the handle so events from a replaced sequence can be dropped,
/// and with the `play` call it answers so a late `Ended` from an earlier
/// run cannot end a resumed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub generation: u64,
    pub index: usize,
    pub run: u64,
    pub kind: PlaybackEventKind,
}
