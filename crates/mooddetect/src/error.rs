//! Session-level error taxonomy.
//!
//! Every component reports its own error type; the orchestrator folds them
//! into [`SessionError`], which also knows how to phrase each failure for the
//! person in front of the camera.

use thiserror::Error;

use crate::capture::CaptureError;
use crate::inference::InferenceError;
use crate::playback::PlaybackError;
use crate::session::SessionState;
use crate::tracks::FetchError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture is not ready")]
    NotReady,

    #[error("a detection is already in progress")]
    Busy,

    #[error("no face detected")]
    NoFaceDetected,

    #[error("expression model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("cannot reach recommendation backend at {url}: {message}")]
    Network { url: String, message: String },

    #[error("recommendation backend error{}: {message}", status_suffix(.status))]
    Backend { status: Option<u16>, message: String },

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("operation not permitted while {0}")]
    InvalidState(SessionState),

    #[error("session has been torn down")]
    Terminated,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl SessionError {
    /// Text shown to the user when this error ends an operation.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::DeviceUnavailable(_) => {
                "Failed to access camera. Please ensure you have granted camera permissions and try again.".to_string()
            }
            SessionError::NotReady => "Video not ready. Please wait and try again.".to_string(),
            SessionError::Busy => "Already analyzing your expression. Please wait.".to_string(),
            SessionError::NoFaceDetected => {
                "No face detected. Please ensure your face is visible in the camera and try again.".to_string()
            }
            SessionError::ModelUnavailable(_) => {
                "Failed to load AI models. Please check the logs for details.".to_string()
            }
            SessionError::Network { url, .. } => format!(
                "Cannot connect to the backend server. Please ensure the backend is running on {}",
                url
            ),
            SessionError::Backend { .. } => {
                "An error occurred during mood detection. Please check the logs for details.".to_string()
            }
            SessionError::Playback(PlaybackError::LoadInProgress) => {
                "A track is still loading. Please wait.".to_string()
            }
            SessionError::Playback(PlaybackError::AudioLoad { index, .. }) => {
                format!("Track {} could not be loaded.", index + 1)
            }
            SessionError::Playback(other) => format!("Playback problem: {}", other),
            SessionError::InvalidState(state) => format!("Not available while {}.", state),
            SessionError::Terminated => "The session has ended.".to_string(),
        }
    }

    /// Whether the error came from a call that was refused outright, leaving
    /// all state untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SessionError::NotReady
                | SessionError::Busy
                | SessionError::InvalidState(_)
                | SessionError::Terminated
                | SessionError::Playback(PlaybackError::LoadInProgress)
        )
    }
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::DeviceUnavailable(reason) => SessionError::DeviceUnavailable(reason),
            CaptureError::NotReady | CaptureError::Released => SessionError::NotReady,
        }
    }
}

impl From<InferenceError> for SessionError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Busy => SessionError::Busy,
            InferenceError::NoFaceDetected => SessionError::NoFaceDetected,
            InferenceError::ModelUnavailable(reason) => SessionError::ModelUnavailable(reason),
        }
    }
}

impl From<FetchError> for SessionError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network { url, message } => SessionError::Network { url, message },
            FetchError::Backend { status, message } => SessionError::Backend { status, message },
        }
    }
}
