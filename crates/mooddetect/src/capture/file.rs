//! File-backed camera: a file stands in for the video input.
//!
//! Useful wherever a real device is not available. Something else (a
//! capture daemon, a test, a person) keeps the file updated with the latest
//! frame; every grab reads it again.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;

use super::{CameraSource, CaptureError, FrameGrab, OpenedCamera, VideoStream};
use crate::types::FrameDimensions;

const READY_POLL: Duration = Duration::from_millis(25);

pub struct FileCamera {
    path: PathBuf,
    dimensions: FrameDimensions,
}

impl FileCamera {
    pub fn new(path: impl Into<PathBuf>, dimensions: FrameDimensions) -> Self {
        Self {
            path: path.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl CameraSource for FileCamera {
    async fn open(&self) -> Result<OpenedCamera, CaptureError> {
        let meta = tokio::fs::metadata(&self.path).await.map_err(|e| {
            CaptureError::DeviceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        if !meta.is_file() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is not a file",
                self.path.display()
            )));
        }

        let path = self.path.clone();
        let dimensions = self.dimensions;
        // Ready once the source holds at least one frame's worth of bytes.
        let ready = async move {
            loop {
                match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.len() > 0 => return Ok(dimensions),
                    Ok(_) => tokio::time::sleep(READY_POLL).await,
                    Err(e) => {
                        return Err(CaptureError::DeviceUnavailable(format!(
                            "{}: {}",
                            path.display(),
                            e
                        )))
                    }
                }
            }
        }
        .boxed();

        Ok(OpenedCamera {
            stream: Box::new(FileStream {
                path: self.path.clone(),
                live: true,
            }),
            ready,
        })
    }
}

struct FileStream {
    path: PathBuf,
    live: bool,
}

impl VideoStream for FileStream {
    fn grab(&mut self) -> FrameGrab<Bytes> {
        if !self.live {
            return futures::future::ready(Err(CaptureError::Released)).boxed();
        }
        let path = self.path.clone();
        async move {
            tokio::fs::read(&path)
                .await
                .map(Bytes::from)
                .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {}", path.display(), e)))
        }
        .boxed()
    }

    fn stop(&mut self) {
        self.live = false;
    }
}
