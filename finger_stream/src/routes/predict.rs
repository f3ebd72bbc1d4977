use crate::{prediction::PredictionServiceError, server::SharedState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct PredictResponse {
    pub predicted_class: Option<String>,
    pub similarity: f32,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Prediction service failed: {0}")]
    PredictionService(#[from] PredictionServiceError),
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_GATEWAY,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Classifies the hand currently tracked in the video stream.
#[instrument(skip(state))]
pub async fn predict(State(state): State<SharedState>) -> Result<Json<PredictResponse>, PredictError> {
    state.metrics.record_request("/predict");

    let hands = state.hand_state.snapshot();
    if hands.is_empty() {
        tracing::debug!("No hand in the stream, skipping classification");
        return Ok(Json(PredictResponse {
            predicted_class: None,
            similarity: 0.0,
        }));
    }

    let started = Instant::now();
    let prediction = state.inference.classify(hands).await?;
    state
        .metrics
        .record_prediction_duration(started.elapsed().as_millis() as u64, "classify");

    tracing::info!(
        "Predicted {} with similarity {:.3}",
        prediction.predicted_class,
        prediction.similarity
    );

    Ok(Json(PredictResponse {
        predicted_class: Some(prediction.predicted_class),
        similarity: prediction.similarity,
    }))
}
