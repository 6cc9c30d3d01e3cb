//! Track fetching from the recommendation backend.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::mood::Mood;
use crate::telemetry::inject_trace_context;
use crate::types::{TrackDescriptor, TrackId};

/// Transport failures are kept apart from errors the backend reported so the
/// user can be told which side to fix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("failed to reach {url}: {message}")]
    Network { url: String, message: String },

    #[error("backend error: {message}")]
    Backend { status: Option<u16>, message: String },
}

/// Maps a mood to an ordered list of tracks. One call per resolved mood;
/// implementations do not retry.
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn fetch(&self, mood: &Mood) -> Result<Vec<TrackDescriptor>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct SongsResponse {
    #[serde(default)]
    songs: Vec<SongEntry>,
}

#[derive(Debug, Deserialize)]
struct SongEntry {
    #[serde(default, alias = "_id")]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    audio: Option<String>,
}

impl SongEntry {
    fn into_descriptor(self, mood: &Mood, display_index: usize) -> TrackDescriptor {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{}-{}", mood, display_index));
        TrackDescriptor {
            id: TrackId::new(id),
            audio_url: self.audio.filter(|a| !a.is_empty()),
            display_index,
            title: self.title.filter(|t| !t.is_empty()),
        }
    }
}

/// `GET {base}/songs?mood=<label>` client.
pub struct HttpTrackSource {
    client: Client,
    base_url: String,
}

impl HttpTrackSource {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TrackSource for HttpTrackSource {
    #[instrument(skip(self), fields(mood = %mood))]
    async fn fetch(&self, mood: &Mood) -> Result<Vec<TrackDescriptor>, FetchError> {
        let url = format!("{}/songs", self.base_url);
        let request = self.client.get(&url).query(&[("mood", mood.as_str())]);

        let response = inject_trace_context(request)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: self.base_url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            warn!(%status, error_body = %error_body, "songs request failed");
            return Err(FetchError::Backend {
                status: Some(status.as_u16()),
                message: format!("songs endpoint returned {}", status),
            });
        }

        // A body that arrives but does not parse is the backend's fault;
        // a connection lost while reading it is not.
        let parsed: SongsResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                FetchError::Backend {
                    status: Some(status.as_u16()),
                    message: format!("malformed songs response: {}", e),
                }
            } else {
                FetchError::Network {
                    url: self.base_url.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let tracks: Vec<TrackDescriptor> = parsed
            .songs
            .into_iter()
            .enumerate()
            .map(|(i, song)| song.into_descriptor(mood, i))
            .collect();
        debug!(count = tracks.len(), "fetched tracks");
        Ok(tracks)
    }
}
