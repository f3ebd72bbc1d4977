use crate::config::CameraConfig;
use opencv::{core, core::Mat, prelude::*, videoio};
use thiserror::Error;
use tokio::sync::Mutex;
use tonic::async_trait;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Camera {0} could not be opened")]
    NotOpened(i32),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

/// Anything that can hand out BGR frames. `Ok(None)` means the source has
/// no more frames to give.
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    async fn capture_frame(&self) -> Result<Option<Mat>, CameraError>;
}

#[derive(Debug)]
pub struct Camera {
    capture: Mutex<videoio::VideoCapture>,
    flip_horizontal: bool,
}

impl Camera {
    pub async fn new(config: &CameraConfig) -> Result<Self, CameraError> {
        let capture = videoio::VideoCapture::new(config.device_index, videoio::CAP_ANY)
            .map_err(CameraError::OpenCameraFailed)?;
        if !capture.is_opened()? {
            return Err(CameraError::NotOpened(config.device_index));
        }

        tracing::info!("Opened camera {}", config.device_index);

        Ok(Self {
            capture: Mutex::new(capture),
            flip_horizontal: config.flip_horizontal,
        })
    }
}

#[async_trait]
impl FrameSource for Camera {
    async fn capture_frame(&self) -> Result<Option<Mat>, CameraError> {
        let mut cam = self.capture.lock().await;
        let mut frame = Mat::default();
        let grabbed = cam.read(&mut frame).map_err(CameraError::ReadFrameFailed)?;
        drop(cam);

        if !grabbed || frame.empty() {
            return Ok(None);
        }

        if !self.flip_horizontal {
            return Ok(Some(frame));
        }

        let mut mirrored = Mat::default();
        core::flip(&frame, &mut mirrored, 1)?;
        Ok(Some(mirrored))
    }
}
