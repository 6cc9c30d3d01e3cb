use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::types::{PlaybackEvent, PlaybackEventKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("failed to load {uri}: {message}")]
    Load { uri: String, message: String },

    #[error("playback failed: {0}")]
    Playback(String),
}

/// Where a playing handle reports completion and errors.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    tx: mpsc::UnboundedSender<PlaybackEvent>,
    generation: u64,
    index: usize,
    run: u64,
}

impl CompletionNotifier {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<PlaybackEvent>,
        generation: u64,
        index: usize,
        run: u64,
    ) -> Self {
        Self {
            tx,
            generation,
            index,
            run,
        }
    }

    pub fn ended(&self) {
        self.send(PlaybackEventKind::Ended);
    }

    pub fn failed(&self, message: impl Into<String>) {
        self.send(PlaybackEventKind::Error(message.into()));
    }

    fn send(&self, kind: PlaybackEventKind) {
        // Receiver gone means the pool is gone; nothing left to tell.
        let _ = self.tx.send(PlaybackEvent {
            generation: self.generation,
            index: self.index,
            run: self.run,
            kind,
        });
    }
}

/// Source of backing handles.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Load enough of `uri` to play it and know its duration.
    async fn load(&self, uri: &str) -> Result<Box<dyn AudioHandle>, AudioError>;

    /// Duration in seconds without keeping a handle around.
    async fn probe_duration(&self, uri: &str) -> Result<Option<f64>, AudioError> {
        let mut handle = self.load(uri).await?;
        let duration = handle.duration();
        handle.release();
        Ok(duration)
    }
}

/// One loaded, playable piece of audio.
///
/// Playing a handle that reached its end starts it over. After `release`
/// the handle must produce no further output or events.
pub trait AudioHandle: Send {
    fn duration(&self) -> Option<f64>;
    fn play(&mut self, notifier: CompletionNotifier) -> Result<(), AudioError>;
    fn pause(&mut self);
    fn release(&mut self);
}
