//! Playback pool.
//!
//! Audio resources are created lazily the first time a track is selected
//! and are keyed by the track's stable id. At most one resource plays at a
//! time: selecting a track pauses whichever other one is playing before
//! anything else happens. Replacing the track sequence releases every
//! backing handle before the new sequence is installed.
//!
//! Each sequence gets a generation number. Loads, probes and handle events
//! carry the generation they started under and are dropped (with their
//! handle released) if the sequence changed underneath them. Every `play`
//! call also gets its own run number, so an event raised by a run that was
//! paused and later resumed is ignored.

mod backend;
mod timed;
mod types;

pub use backend::{AudioBackend, AudioError, AudioHandle, CompletionNotifier};
pub use timed::TimedAudioBackend;
pub use types::{PlaybackEvent, PlaybackEventKind, ResourceState, TrackView};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::{TrackDescriptor, TrackId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("no track at index {0}")]
    UnknownTrack(usize),

    #[error("a track is still loading")]
    LoadInProgress,

    #[error("track {index} failed to load: {message}")]
    AudioLoad { index: usize, message: String },

    #[error("track {0} has no playable audio")]
    Unplayable(usize),

    #[error("load finished after the track list changed")]
    Discarded,

    #[error("playback pool has been shut down")]
    TornDown,
}

struct Resource {
    state: ResourceState,
    handle: Option<Box<dyn AudioHandle>>,
    error: Option<String>,
    /// Run number of the latest `play`; events from other runs are stale.
    run: u64,
}

impl Resource {
    fn loading() -> Self {
        Self {
            state: ResourceState::Loading,
            handle: None,
            error: None,
            run: 0,
        }
    }

    fn mark_unplayable(&mut self, message: String) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
        self.state = ResourceState::Unplayable;
        self.error = Some(message);
    }
}

#[derive(Default)]
struct PoolState {
    generation: u64,
    tracks: Vec<TrackDescriptor>,
    resources: HashMap<TrackId, Resource>,
    durations: HashMap<TrackId, f64>,
    liked: BTreeSet<usize>,
    shut_down: bool,
    last_run: u64,
}

impl PoolState {
    fn next_run(&mut self) -> u64 {
        self.last_run += 1;
        self.last_run
    }

    fn any_loading(&self) -> bool {
        self.resources
            .values()
            .any(|r| r.state == ResourceState::Loading)
    }

    fn pause_playing_except(&mut self, keep: &TrackId) {
        for (id, resource) in self.resources.iter_mut() {
            if id != keep && resource.state == ResourceState::Playing {
                if let Some(handle) = resource.handle.as_mut() {
                    handle.pause();
                }
                resource.state = ResourceState::Paused;
                debug!(track.id = %id, "paused to make room");
            }
        }
    }

    fn release_all(&mut self) -> usize {
        let mut released = 0;
        for (_, mut resource) in self.resources.drain() {
            if let Some(mut handle) = resource.handle.take() {
                if resource.state == ResourceState::Playing {
                    handle.pause();
                }
                handle.release();
                released += 1;
            }
        }
        released
    }

    fn view(&self, index: usize) -> Option<TrackView> {
        let track = self.tracks.get(index)?;
        let resource = self.resources.get(&track.id);
        Some(TrackView {
            index,
            id: track.id.clone(),
            state: resource.map_or(ResourceState::Idle, |r| r.state),
            duration: self.durations.get(&track.id).copied(),
            liked: self.liked.contains(&index),
            error: resource.and_then(|r| r.error.clone()),
        })
    }
}

/// Clears a `Loading` entry if the load future is dropped before it
/// finishes, so the pool does not refuse selections forever.
struct PendingLoad<'a> {
    pool: &'a PlaybackPool,
    id: TrackId,
    generation: u64,
    armed: bool,
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.pool.state();
        if state.generation == self.generation
            && state
                .resources
                .get(&self.id)
                .is_some_and(|r| r.state == ResourceState::Loading)
        {
            state.resources.remove(&self.id);
            debug!(track.id = %self.id, "abandoned load cleared");
        }
    }
}

pub struct PlaybackPool {
    backend: Arc<dyn AudioBackend>,
    state: Mutex<PoolState>,
    events_tx: mpsc::UnboundedSender<PlaybackEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PlaybackEvent>>,
}

impl PlaybackPool {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            state: Mutex::new(PoolState::default()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a new sequence, releasing everything from the old one first.
    ///
    /// Ids repeated within the sequence are made unique by appending the
    /// display index. Returns the sequence as installed.
    pub fn replace_tracks(&self, tracks: Vec<TrackDescriptor>) -> Result<Vec<TrackDescriptor>, PlaybackError> {
        let mut state = self.state();
        if state.shut_down {
            return Err(PlaybackError::TornDown);
        }
        Self::reset_locked(&mut state);

        let mut seen = HashSet::new();
        let tracks: Vec<TrackDescriptor> = tracks
            .into_iter()
            .enumerate()
            .map(|(index, mut track)| {
                track.display_index = index;
                if !seen.insert(track.id.clone()) {
                    track.id = TrackId::new(format!("{}#{}", track.id, index));
                    seen.insert(track.id.clone());
                }
                track
            })
            .collect();

        state.tracks = tracks.clone();
        info!(count = tracks.len(), generation = state.generation, "track sequence replaced");
        Ok(tracks)
    }

    /// Pause whatever plays, release every handle and forget the sequence.
    pub fn reset_all(&self) {
        let mut state = self.state();
        Self::reset_locked(&mut state);
    }

    fn reset_locked(state: &mut PoolState) {
        let released = state.release_all();
        state.generation += 1;
        state.tracks.clear();
        state.durations.clear();
        state.liked.clear();
        debug!(released, generation = state.generation, "pool reset");
    }

    /// Reset and refuse all further work. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.state();
        if state.shut_down {
            return;
        }
        Self::reset_locked(&mut state);
        state.shut_down = true;
        info!("playback pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }

    /// Toggle play/pause on track `index`, loading it on first use.
    ///
    /// Returns the state the track ended up in.
    pub async fn select_track(&self, index: usize) -> Result<ResourceState, PlaybackError> {
        let (generation, id, uri) = {
            let mut state = self.state();
            if state.shut_down {
                return Err(PlaybackError::TornDown);
            }
            let track = state
                .tracks
                .get(index)
                .cloned()
                .ok_or(PlaybackError::UnknownTrack(index))?;
            if state.any_loading() {
                debug!(track.index = index, "selection rejected: load in progress");
                return Err(PlaybackError::LoadInProgress);
            }

            let current = state.resources.get(&track.id).map(|r| r.state);
            if current == Some(ResourceState::Playing) {
                if let Some(resource) = state.resources.get_mut(&track.id) {
                    if let Some(handle) = resource.handle.as_mut() {
                        handle.pause();
                    }
                    resource.state = ResourceState::Paused;
                }
                info!(track.index = index, "paused");
                return Ok(ResourceState::Paused);
            }

            state.pause_playing_except(&track.id);

            let run = state.next_run();
            let notifier = CompletionNotifier::new(self.events_tx.clone(), state.generation, index, run);
            if let Some(resource) = state.resources.get_mut(&track.id) {
                if let Some(handle) = resource.handle.as_mut() {
                    return match handle.play(notifier) {
                        Ok(()) => {
                            resource.state = ResourceState::Playing;
                            resource.run = run;
                            info!(track.index = index, "resumed");
                            Ok(ResourceState::Playing)
                        }
                        Err(e) => {
                            warn!(track.index = index, error = %e, "resume failed");
                            resource.mark_unplayable(e.to_string());
                            Err(PlaybackError::AudioLoad {
                                index,
                                message: e.to_string(),
                            })
                        }
                    };
                }
            }

            let Some(uri) = track.audio_url.clone() else {
                let mut resource = Resource::loading();
                resource.mark_unplayable("no audio location".to_string());
                state.resources.insert(track.id.clone(), resource);
                warn!(track.index = index, "track has no audio location");
                return Err(PlaybackError::Unplayable(index));
            };

            state.resources.insert(track.id.clone(), Resource::loading());
            (state.generation, track.id, uri)
        };

        let mut pending = PendingLoad {
            pool: self,
            id: id.clone(),
            generation,
            armed: true,
        };
        debug!(track.index = index, uri = %uri, "loading");
        let loaded = self.backend.load(&uri).await;
        pending.armed = false;

        let mut state = self.state();
        let still_current = !state.shut_down
            && state.generation == generation
            && state
                .resources
                .get(&id)
                .is_some_and(|r| r.state == ResourceState::Loading);
        if !still_current {
            if let Ok(mut handle) = loaded {
                handle.release();
            }
            debug!(track.index = index, generation, "stale load discarded");
            return Err(PlaybackError::Discarded);
        }

        match loaded {
            Ok(mut handle) => {
                if let Some(duration) = handle.duration() {
                    state.durations.insert(id.clone(), duration);
                }
                state.pause_playing_except(&id);
                let run = state.next_run();
                let notifier = CompletionNotifier::new(self.events_tx.clone(), generation, index, run);
                let played = handle.play(notifier);
                let Some(resource) = state.resources.get_mut(&id) else {
                    handle.release();
                    return Err(PlaybackError::Discarded);
                };
                resource.handle = Some(handle);
                match played {
                    Ok(()) => {
                        resource.state = ResourceState::Playing;
                        resource.run = run;
                        info!(track.index = index, "playing");
                        Ok(ResourceState::Playing)
                    }
                    Err(e) => {
                        warn!(track.index = index, error = %e, "play failed");
                        resource.mark_unplayable(e.to_string());
                        Err(PlaybackError::AudioLoad {
                            index,
                            message: e.to_string(),
                        })
                    }
                }
            }
            Err(e) => {
                warn!(track.index = index, error = %e, "load failed");
                if let Some(resource) = state.resources.get_mut(&id) {
                    resource.mark_unplayable(e.to_string());
                }
                Err(PlaybackError::AudioLoad {
                    index,
                    message: e.to_string(),
                })
            }
        }
    }

    fn check_index(state: &PoolState, index: usize) -> Result<(), PlaybackError> {
        if index < state.tracks.len() {
            Ok(())
        } else {
            Err(PlaybackError::UnknownTrack(index))
        }
    }

    pub fn like(&self, index: usize) -> Result<(), PlaybackError> {
        let mut state = self.state();
        Self::check_index(&state, index)?;
        state.liked.insert(index);
        Ok(())
    }

    pub fn unlike(&self, index: usize) -> Result<(), PlaybackError> {
        let mut state = self.state();
        Self::check_index(&state, index)?;
        state.liked.remove(&index);
        Ok(())
    }

    /// Returns whether the track is liked afterwards.
    pub fn toggle_like(&self, index: usize) -> Result<bool, PlaybackError> {
        let mut state = self.state();
        Self::check_index(&state, index)?;
        if state.liked.remove(&index) {
            Ok(false)
        } else {
            state.liked.insert(index);
            Ok(true)
        }
    }

    pub fn liked(&self) -> Vec<usize> {
        self.state().liked.iter().copied().collect()
    }

    pub fn tracks(&self) -> Vec<TrackDescriptor> {
        self.state().tracks.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    pub fn view(&self, index: usize) -> Option<TrackView> {
        self.state().view(index)
    }

    pub fn snapshot(&self) -> Vec<TrackView> {
        let state = self.state();
        (0..state.tracks.len()).filter_map(|i| state.view(i)).collect()
    }

    pub fn playing_count(&self) -> usize {
        self.state()
            .resources
            .values()
            .filter(|r| r.state == ResourceState::Playing)
            .count()
    }

    pub fn playing_index(&self) -> Option<usize> {
        let state = self.state();
        state.tracks.iter().position(|t| {
            state
                .resources
                .get(&t.id)
                .is_some_and(|r| r.state == ResourceState::Playing)
        })
    }

    /// Apply one handle event. Returns the changed track, or `None` when the
    /// event was stale or changed nothing.
    pub fn apply_event(&self, event: PlaybackEvent) -> Option<TrackView> {
        let mut state = self.state();
        if state.shut_down || event.generation != state.generation {
            debug!(generation = event.generation, "stale playback event dropped");
            return None;
        }
        let id = state.tracks.get(event.index)?.id.clone();
        let resource = state.resources.get_mut(&id)?;
        if event.run != resource.run {
            debug!(track.index = event.index, run = event.run, "event from an earlier run dropped");
            return None;
        }
        match event.kind {
            PlaybackEventKind::Ended => {
                if resource.state != ResourceState::Playing {
                    return None;
                }
                // Leave the handle silent; the next select starts it over.
                if let Some(handle) = resource.handle.as_mut() {
                    handle.pause();
                }
                resource.state = ResourceState::Idle;
                info!(track.index = event.index, "finished");
            }
            PlaybackEventKind::Error(message) => {
                if !matches!(resource.state, ResourceState::Playing | ResourceState::Paused) {
                    return None;
                }
                warn!(track.index = event.index, error = %message, "playback error");
                resource.mark_unplayable(message);
            }
        }
        state.view(event.index)
    }

    /// Wait for the next event that changes a track.
    pub async fn next_event(&self) -> Option<TrackView> {
        let mut rx = self.events_rx.lock().await;
        loop {
            let event = rx.recv().await?;
            if let Some(view) = self.apply_event(event) {
                return Some(view);
            }
        }
    }

    /// Apply every event already queued, without waiting.
    pub fn pump_events(&self) -> Vec<TrackView> {
        let Ok(mut rx) = self.events_rx.try_lock() else {
            // Someone is parked in next_event and will apply them.
            return Vec::new();
        };
        let mut changed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(view) = self.apply_event(event) {
                changed.push(view);
            }
        }
        changed
    }

    /// Learn durations of tracks that have not been loaded yet. Returns how
    /// many were recorded; results for a replaced sequence are dropped.
    pub async fn probe_durations(&self) -> usize {
        let (generation, pending): (u64, Vec<(TrackId, String)>) = {
            let state = self.state();
            if state.shut_down {
                return 0;
            }
            let pending = state
                .tracks
                .iter()
                .filter(|t| !state.durations.contains_key(&t.id))
                .filter_map(|t| t.audio_url.clone().map(|uri| (t.id.clone(), uri)))
                .collect();
            (state.generation, pending)
        };

        let mut recorded = 0;
        for (id, uri) in pending {
            let probed = self.backend.probe_duration(&uri).await;
            let mut state = self.state();
            if state.shut_down || state.generation != generation {
                debug!(generation, "duration probe outlived its sequence");
                return recorded;
            }
            match probed {
                Ok(Some(duration)) => {
                    state.durations.entry(id).or_insert(duration);
                    recorded += 1;
                }
                Ok(None) => {}
                Err(e) => debug!(track.id = %id, error = %e, "duration probe failed"),
            }
        }
        recorded
    }
}

impl Drop for PlaybackPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
