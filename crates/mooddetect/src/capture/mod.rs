//! Camera ownership.
//!
//! A [`CaptureHandle`] holds the one live video stream of a session. It is
//! created by [`CaptureHandle::acquire`], becomes ready once the device
//! reports frame dimensions, and is released exactly once: by an explicit
//! [`CaptureHandle::release`] or, failing that, on drop.

mod file;

pub use file::FileCamera;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{Frame, FrameDimensions};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("video device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("video stream is not ready")]
    NotReady,

    #[error("video stream has been released")]
    Released,
}

/// Resolves when the device signals usable frame dimensions.
///
/// Does not borrow the stream, so the owner can keep the handle somewhere
/// teardown can reach it while this is awaited.
pub type Readiness = BoxFuture<'static, Result<FrameDimensions, CaptureError>>;

/// A pending frame read. Owns everything it needs, so it can be awaited
/// after whatever lock guards the handle has been released.
pub type FrameGrab<T> = BoxFuture<'static, Result<T, CaptureError>>;

/// A freshly opened device: the live stream plus its readiness signal.
pub struct OpenedCamera {
    pub stream: Box<dyn VideoStream>,
    pub ready: Readiness,
}

/// Platform video input.
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Request exclusive use of the video input.
    async fn open(&self) -> Result<OpenedCamera, CaptureError>;
}

/// A live stream from an opened device.
pub trait VideoStream: Send {
    /// Start reading the current frame.
    fn grab(&mut self) -> FrameGrab<Bytes>;

    /// Stop the stream and give the device back. Called at most once.
    fn stop(&mut self);
}

/// The session's single live camera stream.
pub struct CaptureHandle {
    stream: Option<Box<dyn VideoStream>>,
    dimensions: Option<FrameDimensions>,
}

impl CaptureHandle {
    /// Open the device. The returned [`Readiness`] must be awaited before
    /// frames can be grabbed; pass its result to [`CaptureHandle::mark_ready`].
    pub async fn acquire(source: &dyn CameraSource) -> Result<(Self, Readiness), CaptureError> {
        let OpenedCamera { stream, ready } = source.open().await?;
        info!("video device acquired");
        let handle = Self {
            stream: Some(stream),
            dimensions: None,
        };
        Ok((handle, ready))
    }

    /// Record the dimensions reported by the readiness signal.
    pub fn mark_ready(&mut self, dimensions: FrameDimensions) -> Result<(), CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::Released);
        }
        debug!(
            width = dimensions.width,
            height = dimensions.height,
            "video device ready"
        );
        self.dimensions = Some(dimensions);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.stream.is_some() && self.dimensions.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    pub fn dimensions(&self) -> Option<FrameDimensions> {
        self.dimensions
    }

    /// Start grabbing the current frame. Rejected with `NotReady` until
    /// readiness has been recorded.
    pub fn grab_frame(&mut self) -> FrameGrab<Frame> {
        let Some(stream) = self.stream.as_mut() else {
            return future::ready(Err(CaptureError::Released)).boxed();
        };
        let Some(dimensions) = self.dimensions else {
            return future::ready(Err(CaptureError::NotReady)).boxed();
        };
        let grab = stream.grab();
        async move {
            let data = grab.await?;
            Ok(Frame { dimensions, data })
        }
        .boxed()
    }

    /// Stop the stream. Safe to call repeatedly; only the first call reaches
    /// the device. Returns whether this call did the release.
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(mut stream) => {
                stream.stop();
                self.dimensions = None;
                info!("video device released");
                true
            }
            None => false,
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("live", &self.stream.is_some())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}
