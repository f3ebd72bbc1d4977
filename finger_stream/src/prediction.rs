use crate::camera::{CameraError, FrameSource};
use crate::config::{InferenceServiceConfig, PredictionPollingConfig};
use crate::cv_utils::{CvUtilsError, ImageConverter};
use crate::hand_state::HandState;
use crate::telemetry::Metrics;
use finger_proto::{
    finger_spelling_service_client::FingerSpellingServiceClient, ClassifyRequest, Empty, Hand,
    ImageFrame, Prediction,
};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::{
    sync::broadcast,
    time::{sleep, timeout, Duration},
};
use tonic::{
    async_trait,
    transport::{Channel, Error},
    Request, Status,
};
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictionServiceError {
    #[error("Failed to connect to gRPC server: {0}")]
    ConnectionFailed(#[from] Error),
    #[error("Maximum connection retries exceeded.")]
    MaxRetriesExceeded,
    #[error("gRPC request failed: {0}")]
    GrpcRequestFailed(#[from] Status),
    #[error("Cv utils error: {0}")]
    OpenCvUtilsError(#[from] CvUtilsError),
    #[error("Camera error: {0}")]
    PredictionCameraError(#[from] CameraError),
}

/// Hand detection and finger-spelling classification, as seen from the
/// HTTP side.
#[async_trait]
pub trait Inference: Send + Sync + 'static {
    async fn detect_hands(&self, image_data: Vec<u8>) -> Result<Vec<Hand>, PredictionServiceError>;
    async fn classify(&self, hands: Vec<Hand>) -> Result<Prediction, PredictionServiceError>;
    fn class_labels(&self) -> &[String];
}

pub struct PredictionService {
    client: FingerSpellingServiceClient<Channel>,
    class_labels: Vec<String>,
}

impl PredictionService {
    pub async fn new(config: &InferenceServiceConfig) -> Result<Self, PredictionServiceError> {
        let mut client = Self::get_client(config.get_address()).await?;

        let class_labels = client
            .get_class_labels(Request::new(Empty {}))
            .await?
            .into_inner()
            .labels;
        tracing::info!(
            "Connected to inference service, {} class labels available",
            class_labels.len()
        );

        Ok(Self {
            client,
            class_labels,
        })
    }

    async fn get_client(
        address: String,
    ) -> Result<FingerSpellingServiceClient<Channel>, PredictionServiceError> {
        let mut retry_delay = Duration::from_millis(50);
        let max_retry_delay = Duration::from_secs(1);
        let max_retries = 10;
        let mut retry_count = 0;

        while retry_count < max_retries {
            match timeout(
                Duration::from_secs(1),
                FingerSpellingServiceClient::connect(address.clone()),
            )
            .await
            {
                Ok(Ok(client)) => return Ok(client),
                Ok(Err(e)) => {
                    tracing::error!("Failed to connect to gRPC server: {:?}", e);
                }
                Err(_) => {
                    tracing::error!("Connection timeout");
                }
            }

            retry_count += 1;
            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            sleep(retry_delay.mul_f32(jitter)).await;
            retry_delay = (retry_delay * 2).min(max_retry_delay);
        }

        Err(PredictionServiceError::MaxRetriesExceeded)
    }
}

#[async_trait]
impl Inference for PredictionService {
    #[instrument(skip(self, image_data))]
    async fn detect_hands(&self, image_data: Vec<u8>) -> Result<Vec<Hand>, PredictionServiceError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        let request = Request::new(ImageFrame {
            image_data,
            timestamp,
        });

        let mut client = self.client.clone();
        let response = client.detect_hands(request).await?;
        Ok(response.into_inner().hands)
    }

    #[instrument(skip(self, hands))]
    async fn classify(&self, hands: Vec<Hand>) -> Result<Prediction, PredictionServiceError> {
        let mut client = self.client.clone();
        let response = client.classify(Request::new(ClassifyRequest { hands })).await?;
        Ok(response.into_inner())
    }

    fn class_labels(&self) -> &[String] {
        &self.class_labels
    }
}

/// Periodically sends a camera frame to the hand detector and publishes the
/// result to the shared [`HandState`]. Hands are cleared whenever an
/// interval yields no detection, so the state never outlives the camera or
/// the detector.
pub struct PredictionPoller {
    camera: Arc<dyn FrameSource>,
    inference: Arc<dyn Inference>,
    hand_state: Arc<HandState>,
    metrics: Arc<Metrics>,
    poll_interval_ms: u64,
    max_retries: u64,
    initial_delay: u64,
    backoff_factor: u32,
    max_consecutive_failures: u64,
}

impl PredictionPoller {
    pub fn new(
        camera: Arc<dyn FrameSource>,
        inference: Arc<dyn Inference>,
        hand_state: Arc<HandState>,
        metrics: Arc<Metrics>,
        prediction_polling_config: &PredictionPollingConfig,
    ) -> Self {
        Self {
            camera,
            inference,
            hand_state,
            metrics,
            poll_interval_ms: prediction_polling_config.get_prediction_delay_ms(),
            max_retries: prediction_polling_config.max_retries,
            initial_delay: prediction_polling_config.initial_delay_ms,
            backoff_factor: prediction_polling_config.backoff_factor,
            max_consecutive_failures: prediction_polling_config.max_consecutive_failures,
        }
    }

    pub fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let initial_delay = Duration::from_millis(self.initial_delay);
        let mut consecutive_failures = 0;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = self.poll_and_predict() => {
                        match result {
                            Ok(_) => {
                                consecutive_failures = 0;
                            },
                            Err(ref err) => {
                                tracing::error!("Error during polling: {:?}", err);
                                let mut retry_delay = initial_delay;
                                let mut retry_successful = false;
                                for retry_count in 0..self.max_retries {
                                    tracing::warn!(
                                        "Retrying poll (attempt {}/{}) on consecutive failures: {}/{}",
                                        retry_count + 1,
                                        self.max_retries,
                                        consecutive_failures,
                                        self.max_consecutive_failures
                                    );
                                    sleep(retry_delay).await;

                                    let retry_result = self.poll_and_predict().await;
                                    if retry_result.is_ok() {
                                        tracing::info!("Retry successful");
                                        retry_successful = true;
                                        break;
                                    } else {
                                        tracing::error!("Retry failed: {:?}", retry_result);
                                        retry_delay *= self.backoff_factor;
                                    }
                                }
                                if !retry_successful {
                                    consecutive_failures += 1;
                                    tracing::error!("Max number of retries reached, skipping current poll interval");
                                    self.hand_state.update(vec![]);
                                }
                                if consecutive_failures >= self.max_consecutive_failures {
                                    tracing::error!("Persistent failure detected. Exiting polling loop");
                                    break;
                                }
                            }
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Prediction polling received shutdown signal");
                        break;
                    }
                }

                sleep(Duration::from_millis(self.poll_interval_ms)).await;
            }
            self.hand_state.update(vec![]);
            tracing::info!("Prediction polling stopped");
        })
    }

    async fn poll_and_predict(&self) -> Result<(), PredictionServiceError> {
        let Some(frame) = self.camera.capture_frame().await? else {
            tracing::debug!("No frame captured, clearing tracked hands");
            self.hand_state.update(vec![]);
            return Ok(());
        };

        let image_data = ImageConverter::encode_mat_to_jpg(&frame)?;

        let started = Instant::now();
        let hands = self.inference.detect_hands(image_data).await?;
        self.metrics
            .record_prediction_duration(started.elapsed().as_millis() as u64, "detect_hands");
        self.metrics.record_hands_detected(hands.len());

        self.hand_state.update(hands);
        tracing::debug!("Tracking {} hands", self.hand_state.hand_count());

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use opencv::core::{Mat, Scalar, CV_8UC3};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct StaticFrames;

    #[async_trait]
    impl FrameSource for StaticFrames {
        async fn capture_frame(&self) -> Result<Option<Mat>, CameraError> {
            Ok(Some(Mat::new_rows_cols_with_default(
                48,
                64,
                CV_8UC3,
                Scalar::all(0.0),
            )?))
        }
    }

    #[derive(Default)]
    pub(crate) struct MockInference {
        pub hands: Vec<Hand>,
        pub fail: bool,
        pub detect_calls: AtomicUsize,
        pub classified: Mutex<Vec<Vec<Hand>>>,
        pub labels: Vec<String>,
    }

    #[async_trait]
    impl Inference for MockInference {
        async fn detect_hands(
            &self,
            image_data: Vec<u8>,
        ) -> Result<Vec<Hand>, PredictionServiceError> {
            assert!(!image_data.is_empty());
            self.detect_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Status::unavailable("inference down").into());
            }
            Ok(self.hands.clone())
        }

        async fn classify(&self, hands: Vec<Hand>) -> Result<Prediction, PredictionServiceError> {
            if self.fail {
                return Err(Status::unavailable("inference down").into());
            }
            self.classified.lock().push(hands);
            Ok(Prediction {
                predicted_class: "ㄱ".into(),
                similarity: 0.91,
                class_id: 0,
            })
        }

        fn class_labels(&self) -> &[String] {
            &self.labels
        }
    }

    struct NoFrames;

    #[async_trait]
    impl FrameSource for NoFrames {
        async fn capture_frame(&self) -> Result<Option<Mat>, CameraError> {
            Ok(None)
        }
    }

    fn polling_config() -> PredictionPollingConfig {
        PredictionPollingConfig {
            prediction_fps: 1000,
            max_retries: 1,
            initial_delay_ms: 1,
            backoff_factor: 2,
            max_consecutive_failures: 2,
        }
    }

    #[tokio::test]
    async fn test_poll_and_predict_updates_hand_state() {
        let inference = Arc::new(MockInference {
            hands: vec![Hand::default()],
            ..Default::default()
        });
        let hand_state = Arc::new(HandState::new());
        let poller = PredictionPoller::new(
            Arc::new(StaticFrames),
            inference.clone(),
            hand_state.clone(),
            Arc::new(Metrics::new().unwrap()),
            &polling_config(),
        );

        poller.poll_and_predict().await.unwrap();

        assert_eq!(hand_state.hand_count(), 1);
        assert_eq!(inference.detect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poller_stops_after_persistent_failures() {
        let inference = Arc::new(MockInference {
            fail: true,
            ..Default::default()
        });
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let poller = PredictionPoller::new(
            Arc::new(StaticFrames),
            inference.clone(),
            Arc::new(HandState::new()),
            Arc::new(Metrics::new().unwrap()),
            &polling_config(),
        );

        let handle = poller.run(shutdown_rx);
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();

        // two failed intervals, each with one retry
        assert_eq!(inference.detect_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_hands_cleared_after_detection_fails() {
        let hand_state = Arc::new(HandState::new());
        let metrics = Arc::new(Metrics::new().unwrap());

        let healthy = PredictionPoller::new(
            Arc::new(StaticFrames),
            Arc::new(MockInference {
                hands: vec![Hand::default()],
                ..Default::default()
            }),
            hand_state.clone(),
            metrics.clone(),
            &polling_config(),
        );
        healthy.poll_and_predict().await.unwrap();
        assert_eq!(hand_state.hand_count(), 1);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let failing = PredictionPoller::new(
            Arc::new(StaticFrames),
            Arc::new(MockInference {
                fail: true,
                ..Default::default()
            }),
            hand_state.clone(),
            metrics,
            &polling_config(),
        );
        timeout(Duration::from_secs(5), failing.run(shutdown_rx))
            .await
            .expect("poller did not stop")
            .unwrap();

        assert_eq!(hand_state.hand_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_frame_clears_hands() {
        let inference = Arc::new(MockInference::default());
        let hand_state = Arc::new(HandState::new());
        hand_state.update(vec![Hand::default()]);
        let poller = PredictionPoller::new(
            Arc::new(NoFrames),
            inference.clone(),
            hand_state.clone(),
            Arc::new(Metrics::new().unwrap()),
            &polling_config(),
        );

        poller.poll_and_predict().await.unwrap();

        assert_eq!(hand_state.hand_count(), 0);
        assert_eq!(inference.detect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_poller_stops_on_shutdown() {
        let inference = Arc::new(MockInference::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let poller = PredictionPoller::new(
            Arc::new(StaticFrames),
            inference,
            Arc::new(HandState::new()),
            Arc::new(Metrics::new().unwrap()),
            &polling_config(),
        );

        let handle = poller.run(shutdown_rx);
        shutdown_tx.send(()).unwrap();

        timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller ignored shutdown")
            .unwrap();
    }
}
