//! Audio backend that keeps time instead of driving a sound device.
//!
//! Tracks are fetched and their WAV header parsed with hound so the
//! duration is real; "playing" runs a tokio timer for the remaining time
//! and reports `Ended` when it fires.

use std::io::Cursor;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::backend::{AudioBackend, AudioError, AudioHandle, CompletionNotifier};

pub struct TimedAudioBackend {
    client: Client,
}

impl TimedAudioBackend {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, AudioError> {
        let load_err = |message: String| AudioError::Load {
            uri: uri.to_string(),
            message,
        };

        if uri.starts_with("http://") || uri.starts_with("https://") {
            let response = self
                .client
                .get(uri)
                .send()
                .await
                .map_err(|e| load_err(e.to_string()))?;
            if !response.status().is_success() {
                return Err(load_err(format!("server returned {}", response.status())));
            }
            let bytes = response.bytes().await.map_err(|e| load_err(e.to_string()))?;
            Ok(bytes.to_vec())
        } else {
            let path = uri.strip_prefix("file://").unwrap_or(uri);
            tokio::fs::read(path).await.map_err(|e| load_err(e.to_string()))
        }
    }
}

/// Duration in seconds from a WAV header.
pub(crate) fn wav_duration(data: &[u8]) -> Result<f64, String> {
    let reader = hound::WavReader::new(Cursor::new(data)).map_err(|e| e.to_string())?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err("WAV header has zero sample rate".to_string());
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

#[async_trait]
impl AudioBackend for TimedAudioBackend {
    async fn load(&self, uri: &str) -> Result<Box<dyn AudioHandle>, AudioError> {
        let data = self.fetch(uri).await?;
        let seconds = wav_duration(&data).map_err(|message| AudioError::Load {
            uri: uri.to_string(),
            message,
        })?;
        debug!(uri, seconds, "audio loaded");
        Ok(Box::new(TimedHandle::new(uri, seconds)))
    }
}

pub(crate) struct TimedHandle {
    uri: String,
    duration: Duration,
    position: Duration,
    started_at: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    released: bool,
}

impl TimedHandle {
    pub(crate) fn new(uri: &str, seconds: f64) -> Self {
        Self {
            uri: uri.to_string(),
            duration: Duration::from_secs_f64(seconds.max(0.0)),
            position: Duration::ZERO,
            started_at: None,
            timer: None,
            released: false,
        }
    }

    /// Stop the timer and fold elapsed time into the position.
    fn settle(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(started) = self.started_at.take() {
            self.position = (self.position + started.elapsed()).min(self.duration);
        }
    }

    pub(crate) fn position(&self) -> Duration {
        match self.started_at {
            Some(started) => (self.position + started.elapsed()).min(self.duration),
            None => self.position,
        }
    }

    fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl AudioHandle for TimedHandle {
    fn duration(&self) -> Option<f64> {
        Some(self.duration.as_secs_f64())
    }

    fn play(&mut self, notifier: CompletionNotifier) -> Result<(), AudioError> {
        if self.released {
            return Err(AudioError::Playback(format!("{} was released", self.uri)));
        }
        if self.is_running() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AudioError::Playback(e.to_string()))?;

        self.settle();
        if self.position >= self.duration {
            self.position = Duration::ZERO;
        }
        let remaining = self.duration - self.position;
        self.started_at = Some(Instant::now());
        self.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(remaining).await;
            notifier.ended();
        }));
        Ok(())
    }

    fn pause(&mut self) {
        self.settle();
    }

    fn release(&mut self) {
        self.settle();
        self.released = true;
    }
}

impl Drop for TimedHandle {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
