//! Recording doubles for session integration tests.
//!
//! Every double can be gated on a `Notify` so a test can park the session
//! at a suspension point and do something else (teardown, a second call)
//! while it waits.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use tokio::sync::Notify;

use mooddetect::capture::{CameraSource, CaptureError, FrameGrab, OpenedCamera, VideoStream};
use mooddetect::inference::{ExpressionDetector, FaceDetection, InferenceError};
use mooddetect::playback::{AudioBackend, AudioError, AudioHandle, CompletionNotifier};
use mooddetect::tracks::{FetchError, TrackSource};
use mooddetect::{
    ExpressionScoreSet, Frame, FrameDimensions, Mood, SessionOrchestrator, SessionSettings,
    TrackDescriptor, TrackId,
};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn count(log: &Log, entry: &str) -> usize {
    log.lock().unwrap().iter().filter(|e| *e == entry).count()
}

// --- camera ---

#[derive(Default)]
pub struct CameraStats {
    pub opened: AtomicUsize,
    pub stopped: AtomicUsize,
    pub grabbed: AtomicUsize,
    /// When set, frame reads fail with this reason.
    pub grab_fault: Mutex<Option<String>>,
}

pub struct MockCamera {
    pub stats: Arc<CameraStats>,
    pub fail: Option<String>,
    pub ready_gate: Option<Arc<Notify>>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(CameraStats::default()),
            fail: None,
            ready_gate: None,
        }
    }
}

struct MockStream {
    stats: Arc<CameraStats>,
}

impl VideoStream for MockStream {
    fn grab(&mut self) -> FrameGrab<Bytes> {
        self.stats.grabbed.fetch_add(1, Ordering::SeqCst);
        let result = match self.stats.grab_fault.lock().unwrap().clone() {
            Some(reason) => Err(CaptureError::DeviceUnavailable(reason)),
            None => Ok(Bytes::from_static(&[1, 2, 3, 4])),
        };
        futures::future::ready(result).boxed()
    }

    fn stop(&mut self) {
        self.stats.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CameraSource for MockCamera {
    async fn open(&self) -> Result<OpenedCamera, CaptureError> {
        if let Some(reason) = &self.fail {
            return Err(CaptureError::DeviceUnavailable(reason.clone()));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let gate = self.ready_gate.clone();
        let ready = async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            Ok::<_, CaptureError>(FrameDimensions {
                width: 2,
                height: 2,
            })
        }
        .boxed();
        Ok(OpenedCamera {
            stream: Box::new(MockStream {
                stats: self.stats.clone(),
            }),
            ready,
        })
    }
}

// --- detector ---

pub fn scores(pairs: &[(&str, f32)]) -> ExpressionScoreSet {
    pairs.iter().map(|(n, s)| (*n, *s)).collect()
}

pub fn face(pairs: &[(&str, f32)]) -> Vec<FaceDetection> {
    vec![FaceDetection {
        expressions: scores(pairs),
    }]
}

/// Answers from a script; once the script runs out every frame is happy.
pub struct MockDetector {
    pub load: Mutex<VecDeque<Result<(), InferenceError>>>,
    pub script: Mutex<VecDeque<Result<Vec<FaceDetection>, InferenceError>>>,
    pub gate: Option<Arc<Notify>>,
    pub entered: Arc<Notify>,
    pub calls: AtomicUsize,
}

impl MockDetector {
    pub fn new() -> Self {
        Self {
            load: Mutex::new(VecDeque::new()),
            script: Mutex::new(VecDeque::new()),
            gate: None,
            entered: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, result: Result<Vec<FaceDetection>, InferenceError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn failing_load(self, err: InferenceError) -> Self {
        self.load.lock().unwrap().push_back(Err(err));
        self
    }
}

#[async_trait]
impl ExpressionDetector for MockDetector {
    async fn load(&self) -> Result<(), InferenceError> {
        self.load.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn detect(&self, _frame: &Frame) -> Result<Vec<FaceDetection>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(face(&[("happy", 0.8), ("sad", 0.1), ("neutral", 0.1)])))
    }
}

// --- tracks ---

pub fn tracks_for(mood: &str, n: usize) -> Vec<TrackDescriptor> {
    (0..n)
        .map(|i| TrackDescriptor {
            id: TrackId::new(format!("{}-{}", mood, i)),
            audio_url: Some(format!("mem://{}/{}", mood, i)),
            display_index: i,
            title: None,
        })
        .collect()
}

/// Returns three tracks per mood unless scripted otherwise.
pub struct MockTracks {
    pub script: Mutex<VecDeque<Result<Vec<TrackDescriptor>, FetchError>>>,
    pub requested: Mutex<Vec<String>>,
    pub gate: Option<Arc<Notify>>,
    pub entered: Arc<Notify>,
}

impl MockTracks {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requested: Mutex::new(Vec::new()),
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    pub fn then(self, result: Result<Vec<TrackDescriptor>, FetchError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }
}

#[async_trait]
impl TrackSource for MockTracks {
    async fn fetch(&self, mood: &Mood) -> Result<Vec<TrackDescriptor>, FetchError> {
        self.requested.lock().unwrap().push(mood.to_string());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(tracks_for(mood.as_str(), 3)))
    }
}

// --- audio ---

pub struct RecordingHandle {
    uri: String,
    log: Log,
    notifiers: Arc<Mutex<Vec<CompletionNotifier>>>,
}

impl AudioHandle for RecordingHandle {
    fn duration(&self) -> Option<f64> {
        Some(95.0)
    }

    fn play(&mut self, notifier: CompletionNotifier) -> Result<(), AudioError> {
        self.log.lock().unwrap().push(format!("play:{}", self.uri));
        self.notifiers.lock().unwrap().push(notifier);
        Ok(())
    }

    fn pause(&mut self) {
        self.log.lock().unwrap().push(format!("pause:{}", self.uri));
    }

    fn release(&mut self) {
        self.log.lock().unwrap().push(format!("release:{}", self.uri));
    }
}

#[derive(Default)]
pub struct RecordingAudio {
    pub log: Log,
    /// Notifier handed to the most recent `play`, for firing completions.
    pub notifiers: Arc<Mutex<Vec<CompletionNotifier>>>,
}

#[async_trait]
impl AudioBackend for RecordingAudio {
    async fn load(&self, uri: &str) -> Result<Box<dyn AudioHandle>, AudioError> {
        self.log.lock().unwrap().push(format!("load:{}", uri));
        Ok(Box::new(RecordingHandle {
            uri: uri.to_string(),
            log: self.log.clone(),
            notifiers: self.notifiers.clone(),
        }))
    }

    async fn probe_duration(&self, _uri: &str) -> Result<Option<f64>, AudioError> {
        Ok(Some(95.0))
    }
}

// --- assembled session ---

pub struct Harness {
    pub session: SessionOrchestrator,
    pub camera: Arc<CameraStats>,
    pub detector: Arc<MockDetector>,
    pub tracks: Arc<MockTracks>,
    pub audio_log: Log,
    pub notifiers: Arc<Mutex<Vec<CompletionNotifier>>>,
}

impl Harness {
    pub fn new(camera: MockCamera, detector: MockDetector, tracks: MockTracks) -> Self {
        let audio = RecordingAudio::default();
        let audio_log = audio.log.clone();
        let notifiers = audio.notifiers.clone();
        let camera_stats = camera.stats.clone();
        let detector = Arc::new(detector);
        let tracks = Arc::new(tracks);
        let settings = SessionSettings {
            probe_durations: false,
            ..SessionSettings::default()
        };
        let session = SessionOrchestrator::new(
            Arc::new(camera),
            detector.clone(),
            tracks.clone(),
            Arc::new(audio),
            settings,
        );
        Self {
            session,
            camera: camera_stats,
            detector,
            tracks,
            audio_log,
            notifiers,
        }
    }

    pub fn basic() -> Self {
        Self::new(MockCamera::new(), MockDetector::new(), MockTracks::new())
    }

    /// Initialise and bring capture up; the session ends in `Idle`.
    pub async fn ready(self) -> Self {
        self.session.initialize().await.unwrap();
        self.session.start_capture().await.unwrap();
        self
    }

    pub fn stops(&self) -> usize {
        self.camera.stopped.load(Ordering::SeqCst)
    }
}
