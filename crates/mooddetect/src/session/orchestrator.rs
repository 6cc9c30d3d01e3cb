use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::types::{SessionEvent, SessionId, SessionSettings, SessionSnapshot, SessionState};
use crate::capture::{CameraSource, CaptureError, CaptureHandle, FrameGrab};
use crate::error::SessionError;
use crate::inference::{ExpressionDetector, InferenceSession};
use crate::mood::{self, Mood};
use crate::playback::{AudioBackend, PlaybackError, PlaybackPool, ResourceState, TrackView};
use crate::tracks::TrackSource;
use crate::types::{Frame, FrameDimensions, TrackDescriptor};

const EVENT_CAPACITY: usize = 256;

struct Inner {
    state: SessionState,
    capture: Option<CaptureHandle>,
    /// Bumped whenever the capture handle is replaced or dropped, so a
    /// readiness wait can tell it no longer owns the handle.
    capture_epoch: u64,
    cycle: u64,
    mood: Option<Mood>,
    tracks: Vec<TrackDescriptor>,
    last_error: Option<String>,
    probe: Option<JoinHandle<()>>,
}

/// Puts the state back to `Idle` if a detect cycle is dropped mid-flight.
struct CycleGuard<'a> {
    session: &'a SessionOrchestrator,
    cycle: u64,
    armed: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.session.inner();
        if inner.state == SessionState::Detecting && inner.cycle == self.cycle {
            debug!(cycle = self.cycle, "detect cycle abandoned");
            self.session.transition(&mut inner, SessionState::Idle);
        }
    }
}

/// Owns the capture handle, the inference session and the playback pool,
/// and runs detection cycles over them.
///
/// All methods take `&self`. Internal locks are never held across an
/// await; results that arrive after teardown are dropped and whatever
/// they carried is released.
pub struct SessionOrchestrator {
    id: SessionId,
    camera: Arc<dyn CameraSource>,
    inference: InferenceSession,
    track_source: Arc<dyn TrackSource>,
    pool: Arc<PlaybackPool>,
    settings: SessionSettings,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionOrchestrator {
    pub fn new(
        camera: Arc<dyn CameraSource>,
        detector: Arc<dyn ExpressionDetector>,
        track_source: Arc<dyn TrackSource>,
        audio: Arc<dyn AudioBackend>,
        settings: SessionSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let id = SessionId::generate();
        info!(session.id = %id, "session created");
        Self {
            id,
            camera,
            inference: InferenceSession::new(detector),
            track_source,
            pool: Arc::new(PlaybackPool::new(audio)),
            settings,
            inner: Mutex::new(Inner {
                state: SessionState::Initializing,
                capture: None,
                capture_epoch: 0,
                cycle: 0,
                mood: None,
                tracks: Vec::new(),
                last_error: None,
                probe: None,
            }),
            events,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn transition(&self, inner: &mut Inner, to: SessionState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        info!(session.id = %self.id, session.state = %to, from = %from, "state changed");
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn notify(&self, inner: &mut Inner, err: &SessionError) {
        let message = err.user_message();
        inner.last_error = Some(message.clone());
        self.emit(SessionEvent::Notice { message });
    }

    /// Report an error that ended an operation without touching state.
    fn report(&self, err: SessionError) -> SessionError {
        if err.is_rejection() {
            debug!(session.id = %self.id, error = %err, "call rejected");
        } else {
            warn!(session.id = %self.id, error = %err, "operation failed");
            let mut inner = self.inner();
            self.notify(&mut inner, &err);
        }
        err
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn pool(&self) -> &PlaybackPool {
        &self.pool
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner();
        SessionSnapshot {
            id: self.id,
            state: inner.state,
            capture_ready: inner.capture.as_ref().is_some_and(|c| c.is_ready()),
            mood: inner.mood.clone(),
            tracks: inner.tracks.clone(),
            playback: self.pool.snapshot(),
            last_error: inner.last_error.clone(),
        }
    }

    fn require_state(&self, expected: SessionState) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Terminated => Err(SessionError::Terminated),
            state if state == expected => Ok(()),
            state => Err(SessionError::InvalidState(state)),
        }
    }

    /// Load the expression model. On failure the session stays in
    /// `Initializing` and this may be called again.
    #[instrument(skip(self), fields(session.id = %self.id))]
    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.require_state(SessionState::Initializing)?;

        if let Err(e) = self.inference.load().await {
            return Err(self.report(e.into()));
        }

        let mut inner = self.inner();
        match inner.state {
            SessionState::Initializing => {
                self.transition(&mut inner, SessionState::AwaitingCapture);
                Ok(())
            }
            SessionState::Terminated => Err(SessionError::Terminated),
            // A concurrent initialize got there first.
            _ => Ok(()),
        }
    }

    /// Acquire the camera and wait for it to report frame dimensions.
    ///
    /// The handle is owned by the session from the moment it is acquired,
    /// so teardown during the wait still releases it.
    #[instrument(skip(self), fields(session.id = %self.id))]
    pub async fn start_capture(&self) -> Result<FrameDimensions, SessionError> {
        self.require_state(SessionState::AwaitingCapture)?;

        let (handle, ready) = match CaptureHandle::acquire(self.camera.as_ref()).await {
            Ok(acquired) => acquired,
            Err(e) => return Err(self.report(e.into())),
        };

        let epoch = {
            let mut inner = self.inner();
            if inner.state == SessionState::Terminated {
                drop(inner);
                drop(handle);
                return Err(SessionError::Terminated);
            }
            if let Some(mut previous) = inner.capture.replace(handle) {
                previous.release();
            }
            inner.capture_epoch += 1;
            inner.capture_epoch
        };

        let outcome = tokio::time::timeout(self.settings.ready_timeout, ready).await;

        let mut inner = self.inner();
        if inner.state == SessionState::Terminated {
            return Err(SessionError::Terminated);
        }
        if inner.capture_epoch != epoch {
            debug!("readiness result superseded");
            return Err(SessionError::NotReady);
        }

        let result = match outcome {
            Ok(Ok(dimensions)) => match inner.capture.as_mut() {
                Some(capture) => capture.mark_ready(dimensions).map(|()| dimensions),
                None => Err(CaptureError::Released),
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::DeviceUnavailable(format!(
                "camera did not become ready within {:?}",
                self.settings.ready_timeout
            ))),
        };

        match result {
            Ok(dimensions) => {
                info!(width = dimensions.width, height = dimensions.height, "capture ready");
                if inner.state == SessionState::AwaitingCapture {
                    self.transition(&mut inner, SessionState::Idle);
                }
                Ok(dimensions)
            }
            Err(e) => {
                if let Some(mut capture) = inner.capture.take() {
                    capture.release();
                }
                inner.capture_epoch += 1;
                let err = SessionError::from(e);
                warn!(error = %err, "capture failed");
                self.notify(&mut inner, &err);
                Err(err)
            }
        }
    }

    /// Run one detection cycle: capture, infer, resolve, fetch, present.
    ///
    /// Rejected with `Busy` while another cycle runs and with `NotReady`
    /// until capture is ready. Failures return the session to `Idle` and
    /// leave the previously published tracks alone.
    #[instrument(skip(self), fields(session.id = %self.id))]
    pub async fn detect(&self) -> Result<(Mood, Vec<TrackDescriptor>), SessionError> {
        let (cycle, grab) = {
            let mut inner = self.inner();
            match inner.state {
                SessionState::Terminated => return Err(SessionError::Terminated),
                SessionState::Detecting => {
                    debug!("detect rejected: cycle in flight");
                    return Err(SessionError::Busy);
                }
                SessionState::Initializing | SessionState::AwaitingCapture => {
                    debug!(session.state = %inner.state, "detect rejected: capture not ready");
                    return Err(SessionError::NotReady);
                }
                SessionState::Idle | SessionState::Error => {}
            }

            // The read itself is awaited after the lock is released.
            let grab = match inner.capture.as_mut() {
                Some(capture) if capture.is_ready() => capture.grab_frame(),
                _ => {
                    drop(inner);
                    return Err(self.report(CaptureError::NotReady.into()));
                }
            };

            inner.cycle += 1;
            let cycle = inner.cycle;
            self.transition(&mut inner, SessionState::Detecting);
            (cycle, grab)
        };

        let mut guard = CycleGuard {
            session: self,
            cycle,
            armed: true,
        };
        let outcome = self.run_cycle(grab).await;
        guard.armed = false;

        let mut inner = self.inner();
        if inner.state == SessionState::Terminated {
            debug!(cycle, "cycle finished after teardown, result dropped");
            return Err(SessionError::Terminated);
        }

        let published = outcome.and_then(|(mood, tracks)| {
            let tracks = self.pool.replace_tracks(tracks)?;
            Ok((mood, tracks))
        });

        match published {
            Ok((mood, tracks)) => {
                inner.mood = Some(mood.clone());
                inner.tracks = tracks.clone();
                inner.last_error = None;
                info!(mood = %mood, count = tracks.len(), cycle, "tracks published");
                self.emit(SessionEvent::TracksPublished {
                    mood: mood.clone(),
                    tracks: tracks.clone(),
                });
                self.transition(&mut inner, SessionState::Idle);
                if self.settings.probe_durations {
                    self.spawn_probe(&mut inner);
                }
                Ok((mood, tracks))
            }
            Err(err) => {
                warn!(error = %err, cycle, "detect cycle failed");
                self.transition(&mut inner, SessionState::Error);
                self.notify(&mut inner, &err);
                self.transition(&mut inner, SessionState::Idle);
                Err(err)
            }
        }
    }

    async fn run_cycle(
        &self,
        grab: FrameGrab<Frame>,
    ) -> Result<(Mood, Vec<TrackDescriptor>), SessionError> {
        let frame = grab.await?;
        let scores = self.inference.infer(&frame).await?;
        let mood = mood::resolve(&scores).ok_or(SessionError::NoFaceDetected)?;
        debug!(mood = %mood, expressions = scores.len(), "mood resolved");

        if self.state() == SessionState::Terminated {
            return Err(SessionError::Terminated);
        }
        self.emit(SessionEvent::MoodDetected { mood: mood.clone() });

        let tracks = self.track_source.fetch(&mood).await?;
        Ok((mood, tracks))
    }

    fn spawn_probe(&self, inner: &mut Inner) {
        if let Some(previous) = inner.probe.take() {
            previous.abort();
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let pool = self.pool.clone();
        inner.probe = Some(runtime.spawn(async move {
            let recorded = pool.probe_durations().await;
            debug!(recorded, "durations probed");
        }));
    }

    /// Toggle playback of track `index` in the current sequence.
    #[instrument(skip(self), fields(session.id = %self.id, track.index = index))]
    pub async fn select_track(&self, index: usize) -> Result<ResourceState, SessionError> {
        if self.state() == SessionState::Terminated {
            return Err(SessionError::Terminated);
        }

        let previous = self.pool.playing_index();
        match self.pool.select_track(index).await {
            Ok(state) => {
                if let Some(prev) = previous.filter(|p| *p != index) {
                    self.emit_track(prev);
                }
                self.emit_track(index);
                Ok(state)
            }
            Err(PlaybackError::TornDown) => Err(SessionError::Terminated),
            Err(PlaybackError::Discarded) if self.state() == SessionState::Terminated => {
                Err(SessionError::Terminated)
            }
            Err(e) => {
                if let Some(prev) = previous.filter(|p| *p != index) {
                    self.emit_track(prev);
                }
                self.emit_track(index);
                Err(self.report(e.into()))
            }
        }
    }

    fn emit_track(&self, index: usize) {
        if let Some(track) = self.pool.view(index) {
            self.emit(SessionEvent::TrackChanged { track });
        }
    }

    fn live_pool(&self) -> Result<&PlaybackPool, SessionError> {
        if self.state() == SessionState::Terminated {
            Err(SessionError::Terminated)
        } else {
            Ok(&self.pool)
        }
    }

    pub fn like(&self, index: usize) -> Result<(), SessionError> {
        self.live_pool()?.like(index)?;
        self.emit_track(index);
        Ok(())
    }

    pub fn unlike(&self, index: usize) -> Result<(), SessionError> {
        self.live_pool()?.unlike(index)?;
        self.emit_track(index);
        Ok(())
    }

    pub fn toggle_like(&self, index: usize) -> Result<bool, SessionError> {
        let liked = self.live_pool()?.toggle_like(index)?;
        self.emit_track(index);
        Ok(liked)
    }

    /// Wait for the next completion or error from a playing track.
    pub async fn next_playback_event(&self) -> Option<TrackView> {
        let track = self.pool.next_event().await?;
        self.emit(SessionEvent::TrackChanged {
            track: track.clone(),
        });
        Some(track)
    }

    /// Apply queued completion and error signals without waiting.
    pub fn pump_playback_events(&self) -> Vec<TrackView> {
        let changed = self.pool.pump_events();
        for track in &changed {
            self.emit(SessionEvent::TrackChanged {
                track: track.clone(),
            });
        }
        changed
    }

    /// Release everything the session holds. Safe to call any number of
    /// times from any state; returns whether this call did the work.
    #[instrument(skip(self), fields(session.id = %self.id))]
    pub fn teardown(&self) -> bool {
        let (capture, probe) = {
            let mut inner = self.inner();
            if inner.state == SessionState::Terminated {
                return false;
            }
            self.transition(&mut inner, SessionState::Terminated);
            inner.capture_epoch += 1;
            (inner.capture.take(), inner.probe.take())
        };

        if let Some(probe) = probe {
            probe.abort();
        }
        self.pool.shutdown();
        if let Some(mut capture) = capture {
            capture.release();
        }
        info!("session torn down");
        true
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.teardown();
    }
}
