use crate::camera::{CameraError, FrameSource};
use crate::config::DrawingConfig;
use crate::cv_utils::{CvUtilsError, ImageConverter};
use crate::hand_state::HandState;
use crate::telemetry::Metrics;
use bytes::Bytes;
use futures::stream;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::instrument;

pub const FRAME_BOUNDARY: &str = "frame";

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Cv utils error: {0}")]
    Encode(#[from] CvUtilsError),
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
}

/// Wraps one JPEG frame as a part of a `multipart/x-mixed-replace` body.
pub fn multipart_chunk(frame: &[u8]) -> Bytes {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        frame.len()
    );
    let mut body = part_header.into_bytes();
    body.extend_from_slice(frame);
    body.extend_from_slice(b"\r\n");
    Bytes::from(body)
}

#[derive(Clone)]
pub struct VideoStream {
    camera: Arc<dyn FrameSource>,
    hand_state: Arc<HandState>,
    drawing: Arc<DrawingConfig>,
    metrics: Arc<Metrics>,
    video_stream_delay: u64,
}

impl VideoStream {
    pub fn new(
        camera: Arc<dyn FrameSource>,
        hand_state: Arc<HandState>,
        drawing: DrawingConfig,
        metrics: Arc<Metrics>,
        video_stream_delay: u64,
    ) -> Self {
        Self {
            camera,
            hand_state,
            drawing: Arc::new(drawing),
            metrics,
            video_stream_delay,
        }
    }

    async fn next_chunk(&self) -> Result<Option<Bytes>, VideoStreamError> {
        let Some(mut frame) = self.camera.capture_frame().await? else {
            return Ok(None);
        };

        let hands = self.hand_state.snapshot();
        ImageConverter::annotate_frame(&mut frame, &hands, &self.drawing)?;
        let jpg = ImageConverter::encode_mat_to_jpg(&frame)?;

        self.metrics.record_streamed_frame();
        Ok(Some(multipart_chunk(&jpg)))
    }

    /// Yields annotated frames until the camera stops producing them. An
    /// error is yielded once and ends the stream.
    #[instrument(skip(self))]
    pub fn generate_stream(self) -> impl futures::Stream<Item = Result<Bytes, VideoStreamError>> {
        stream::unfold(Some(self), |state| async move {
            let video_stream = state?;
            sleep(Duration::from_millis(video_stream.video_stream_delay)).await;
            match video_stream.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(video_stream))),
                Ok(None) => {
                    tracing::info!("Frame capture failed, closing video stream");
                    None
                }
                Err(e) => {
                    tracing::error!("Error getting frame: {:?}", e);
                    Some((Err(e), None))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use opencv::core::{Mat, Scalar, CV_8UC3};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tonic::async_trait;

    /// Produces `limit` frames, then reports the camera as exhausted.
    struct FiniteFrames {
        limit: usize,
        served: AtomicUsize,
    }

    #[async_trait]
    impl FrameSource for FiniteFrames {
        async fn capture_frame(&self) -> Result<Option<Mat>, CameraError> {
            if self.served.fetch_add(1, Ordering::SeqCst) >= self.limit {
                return Ok(None);
            }
            Ok(Some(Mat::new_rows_cols_with_default(
                48,
                64,
                CV_8UC3,
                Scalar::all(0.0),
            )?))
        }
    }

    struct BrokenCamera;

    #[async_trait]
    impl FrameSource for BrokenCamera {
        async fn capture_frame(&self) -> Result<Option<Mat>, CameraError> {
            Err(CameraError::NotOpened(7))
        }
    }

    fn video_stream(camera: Arc<dyn FrameSource>) -> VideoStream {
        VideoStream::new(
            camera,
            Arc::new(HandState::new()),
            DrawingConfig::default(),
            Arc::new(Metrics::new().unwrap()),
            0,
        )
    }

    #[test]
    fn test_multipart_chunk_layout() {
        let chunk = multipart_chunk(&[0xFF, 0xD8, 0xFF, 0xD9]);

        let expected: &[u8] =
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n\xFF\xD8\xFF\xD9\r\n";
        assert_eq!(chunk.as_ref(), expected);
    }

    #[tokio::test]
    async fn test_stream_ends_when_capture_fails() {
        let camera = Arc::new(FiniteFrames {
            limit: 3,
            served: AtomicUsize::new(0),
        });

        let chunks: Vec<_> = video_stream(camera).generate_stream().collect().await;

        assert_eq!(chunks.len(), 3);
        for chunk in chunks {
            let chunk = chunk.unwrap();
            assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
            assert!(chunk.ends_with(b"\xFF\xD9\r\n"));
        }
    }

    #[tokio::test]
    async fn test_stream_yields_error_once() {
        let chunks: Vec<_> = video_stream(Arc::new(BrokenCamera))
            .generate_stream()
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Err(VideoStreamError::Camera(_))));
    }
}
