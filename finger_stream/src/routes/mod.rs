mod health;
mod index;
mod labels;
mod metrics;
mod predict;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index::index))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/labels", get(labels::class_labels))
        .route("/video_feed", get(video_feed::video_feed))
        .route("/predict", post(predict::predict))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        config::DrawingConfig,
        hand_state::HandState,
        prediction::tests::{MockInference, StaticFrames},
        server::SharedState,
        stream::VideoStream,
        telemetry::Metrics,
    };
    use std::sync::Arc;

    pub fn shared_state(inference: Arc<MockInference>, hand_state: Arc<HandState>) -> SharedState {
        let metrics = Arc::new(Metrics::new().unwrap());
        let video_stream = VideoStream::new(
            Arc::new(StaticFrames),
            hand_state.clone(),
            DrawingConfig::default(),
            metrics.clone(),
            0,
        );
        SharedState {
            inference,
            hand_state,
            video_stream,
            metrics,
        }
    }
}
