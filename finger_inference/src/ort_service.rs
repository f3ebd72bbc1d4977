use crate::{
    config::{ClassifierConfig, LandmarkConfig, ModelConfig, PalmConfig, Validatable},
    features::{best_class, normalize_hand, FEATURE_LEN},
    model_service::{ClassScore, ModelService},
    palm::{decode_palms, generate_anchors, Anchor, HandRegion, Letterbox, REGRESSOR_LEN},
};
use finger_proto::{Hand, HandBatch, ImageFrame, Landmark, NUM_LANDMARKS};
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::{Array2, Array4, ArrayD};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use thiserror::Error;
use tonic::{async_trait, Status};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Missing model output `{0}`")]
    MissingOutput(String),
    #[error("Unexpected output size for `{name}`: expected {expected}, got {got}")]
    OutputSize {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Invalid hand: {0}")]
    InvalidHand(#[from] crate::features::FeatureError),
}

impl From<ModelError> for Status {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Decode(_) | ModelError::InvalidHand(_) => {
                Status::invalid_argument(err.to_string())
            }
            _ => Status::internal(err.to_string()),
        }
    }
}

/// Round-robin pool of sessions for one ONNX model.
struct SessionPool {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
}

impl SessionPool {
    fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let sessions = (0..model_config.num_instances.max(1))
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions for {:?}",
            sessions.len(),
            model_config.get_path()
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
        })
    }

    /// Runs the model on a single input and copies out the named outputs.
    fn run(&self, input: ArrayD<f32>, output_names: &[&str]) -> Result<Vec<Vec<f32>>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let input = input.as_standard_layout();
        let tensor_ref = TensorRef::from_array_view(input.view())?;
        let outputs = session.run(ort::inputs![tensor_ref])?;

        output_names
            .iter()
            .map(|name| {
                let value = outputs
                    .get(name)
                    .ok_or_else(|| ModelError::MissingOutput(name.to_string()))?;
                let (_, data) = value.try_extract_tensor::<f32>()?;
                Ok(data.to_vec())
            })
            .collect()
    }
}

/// Decodes a frame and centers it in a black square, the input shape the
/// palm detector expects.
fn letterbox_frame(image_frame: &ImageFrame) -> Result<(RgbImage, Letterbox), ModelError> {
    let image = image::load_from_memory(&image_frame.image_data)?.to_rgb8();
    let letterbox = Letterbox::new(image.width(), image.height());

    let mut square = RgbImage::new(letterbox.side, letterbox.side);
    imageops::overlay(
        &mut square,
        &image,
        letterbox.pad_x as i64,
        letterbox.pad_y as i64,
    );

    Ok((square, letterbox))
}

/// Cuts a hand region out of the letterboxed square. Parts of the region
/// outside the square stay black.
fn crop_region(square: &RgbImage, region: &HandRegion) -> RgbImage {
    let side = region.side.round().max(1.0) as u32;
    let mut crop = RgbImage::new(side, side);
    imageops::overlay(
        &mut crop,
        square,
        -(region.x0.round() as i64),
        -(region.y0.round() as i64),
    );
    crop
}

/// Resizes to the NHWC `[1, size, size, 3]` tensor both hand models take,
/// with RGB values in [0, 1].
fn to_input_tensor(image: &RgbImage, size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, size, size, FilterType::Triangle);

    let side = size as usize;
    let mut input = Array4::<f32>::zeros((1, side, side, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        input[[0, y as usize, x as usize, 0]] = r as f32 / 255.;
        input[[0, y as usize, x as usize, 1]] = g as f32 / 255.;
        input[[0, y as usize, x as usize, 2]] = b as f32 / 255.;
    }

    input
}

fn expect_len(name: &str, values: &[f32], expected: usize) -> Result<(), ModelError> {
    if values.len() < expected {
        return Err(ModelError::OutputSize {
            name: name.to_string(),
            expected,
            got: values.len(),
        });
    }
    Ok(())
}

/// Turns the raw landmark output (x, y, z triples in crop-input pixels)
/// into landmarks normalized to the original frame.
fn decode_landmarks(
    raw: &[f32],
    input_size: u32,
    region: &HandRegion,
    letterbox: &Letterbox,
) -> Result<Vec<Landmark>, ModelError> {
    expect_len("landmarks", raw, NUM_LANDMARKS * 3)?;

    let size = input_size as f32;
    Ok(raw[..NUM_LANDMARKS * 3]
        .chunks_exact(3)
        .map(|p| {
            let (x, y) = letterbox.to_frame(
                region.x0 + p[0] / size * region.side,
                region.y0 + p[1] / size * region.side,
            );
            Landmark {
                x: x.clamp(0.0, 1.0),
                y: y.clamp(0.0, 1.0),
                z: p[2] / size * region.side / letterbox.width as f32,
            }
        })
        .collect())
}

fn handedness_label(score: f32) -> &'static str {
    if score > 0.5 {
        "Right"
    } else {
        "Left"
    }
}

fn first_value(name: &str, values: &[f32]) -> Result<f32, ModelError> {
    values.first().copied().ok_or_else(|| ModelError::OutputSize {
        name: name.to_string(),
        expected: 1,
        got: 0,
    })
}

/// Builds a hand from one landmark-model run, or `None` when the model is
/// not confident a hand is in the region.
fn hand_from_outputs(
    outputs: &[Vec<f32>],
    config: &LandmarkConfig,
    region: &HandRegion,
    letterbox: &Letterbox,
) -> Result<Option<Hand>, ModelError> {
    let presence = first_value(&config.presence_output, &outputs[1])?;
    if presence < config.min_tracking_confidence {
        tracing::debug!("Dropping hand region (presence {:.3})", presence);
        return Ok(None);
    }

    let handedness = first_value(&config.handedness_output, &outputs[2])?;
    Ok(Some(Hand {
        landmarks: decode_landmarks(&outputs[0], config.input_size, region, letterbox)?,
        score: presence,
        handedness: handedness_label(handedness).to_string(),
    }))
}

#[derive(Clone)]
pub struct OrtModelService {
    palm_sessions: Arc<SessionPool>,
    landmark_sessions: Arc<SessionPool>,
    classifier_sessions: Arc<SessionPool>,
    anchors: Arc<Vec<Anchor>>,
    palms: Arc<PalmConfig>,
    landmarks: Arc<LandmarkConfig>,
    classifier: Arc<ClassifierConfig>,
}

impl OrtModelService {
    pub fn new(
        palms: &PalmConfig,
        landmarks: &LandmarkConfig,
        classifier: &ClassifierConfig,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            palm_sessions: Arc::new(SessionPool::new(&palms.model)?),
            landmark_sessions: Arc::new(SessionPool::new(&landmarks.model)?),
            classifier_sessions: Arc::new(SessionPool::new(&classifier.model)?),
            anchors: Arc::new(generate_anchors(palms.input_size)),
            palms: Arc::new(palms.clone()),
            landmarks: Arc::new(landmarks.clone()),
            classifier: Arc::new(classifier.clone()),
        })
    }

    fn detect_blocking(&self, frame: &ImageFrame) -> Result<Vec<Hand>, ModelError> {
        let (square, letterbox) = letterbox_frame(frame)?;

        let palm_cfg = &self.palms;
        let outputs = self.palm_sessions.run(
            to_input_tensor(&square, palm_cfg.input_size).into_dyn(),
            &[
                palm_cfg.regressors_output.as_str(),
                palm_cfg.scores_output.as_str(),
            ],
        )?;
        expect_len(
            &palm_cfg.regressors_output,
            &outputs[0],
            self.anchors.len() * REGRESSOR_LEN,
        )?;
        expect_len(&palm_cfg.scores_output, &outputs[1], self.anchors.len())?;

        let palms = decode_palms(&outputs[0], &outputs[1], &self.anchors, palm_cfg);
        tracing::debug!("Detected {} palms", palms.len());

        let lm_cfg = &self.landmarks;
        let mut hands = Vec::with_capacity(palms.len());
        for palm in palms {
            let region =
                palm.hand_region(letterbox.side as f32, palm_cfg.roi_scale, palm_cfg.roi_shift_y);
            let crop = crop_region(&square, &region);

            let outputs = self.landmark_sessions.run(
                to_input_tensor(&crop, lm_cfg.input_size).into_dyn(),
                &[
                    lm_cfg.landmarks_output.as_str(),
                    lm_cfg.presence_output.as_str(),
                    lm_cfg.handedness_output.as_str(),
                ],
            )?;

            if let Some(hand) = hand_from_outputs(&outputs, lm_cfg, &region, &letterbox)? {
                hands.push(hand);
            }
        }

        Ok(hands)
    }

    fn classify_blocking(&self, hand: &Hand) -> Result<ClassScore, ModelError> {
        let features = normalize_hand(hand)?;
        let input = Array2::from_shape_vec((1, FEATURE_LEN), features)
            .map_err(|e| ModelError::Inference(format!("invalid feature shape: {}", e)))?;

        let mut outputs = self
            .classifier_sessions
            .run(input.into_dyn(), &[self.classifier.scores_output.as_str()])?;
        let scores = outputs.pop().unwrap_or_default();

        best_class(&scores).map_err(|e| ModelError::Inference(e.to_string()))
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn detect_hands(&self, frame: ImageFrame) -> Result<HandBatch, Status> {
        let service = self.clone();
        let timestamp = frame.timestamp;
        let hands = tokio::task::spawn_blocking(move || service.detect_blocking(&frame))
            .await
            .map_err(|e| Status::internal(format!("hand detection task failed: {}", e)))??;

        Ok(HandBatch { hands, timestamp })
    }

    async fn classify(&self, hand: Hand) -> Result<ClassScore, Status> {
        let service = self.clone();
        let score = tokio::task::spawn_blocking(move || service.classify_blocking(&hand))
            .await
            .map_err(|e| Status::internal(format!("classifier task failed: {}", e)))??;

        Ok(score)
    }
}
