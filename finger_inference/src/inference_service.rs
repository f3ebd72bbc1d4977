use crate::{model_service::ModelService, state::State};
use finger_proto::{
    finger_spelling_service_server::FingerSpellingService, ClassLabels, ClassifyRequest, Empty,
    HandBatch, ImageFrame, Prediction,
};
use std::sync::Arc;
use tonic::{async_trait, Request, Response, Status};
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct InferenceService<M: ModelService, S: State> {
    model_service: Arc<M>,
    service_state: Arc<S>,
}

impl<M: ModelService, S: State> InferenceService<M, S> {
    pub fn new(model_service: M, state: S) -> Self {
        Self {
            model_service: Arc::new(model_service),
            service_state: Arc::new(state),
        }
    }
}

#[async_trait]
impl<M: ModelService, S: State> FingerSpellingService for InferenceService<M, S> {
    #[instrument(skip(self, request))]
    async fn detect_hands(
        &self,
        request: Request<ImageFrame>,
    ) -> Result<Response<HandBatch>, Status> {
        let image_frame = request.into_inner();
        if image_frame.image_data.is_empty() {
            return Err(Status::invalid_argument("image_data is empty"));
        }

        let batch = self.model_service.detect_hands(image_frame).await?;

        tracing::debug!("Returning {} hands", batch.hands.len());
        for (i, hand) in batch.hands.iter().enumerate() {
            tracing::debug!(
                "Hand {}: handedness={}, score={:.3}, landmarks={}",
                i,
                hand.handedness,
                hand.score,
                hand.landmarks.len()
            );
        }

        Ok(Response::new(batch))
    }

    #[instrument(skip(self, request))]
    async fn classify(
        &self,
        request: Request<ClassifyRequest>,
    ) -> Result<Response<Prediction>, Status> {
        let hand = request
            .into_inner()
            .hands
            .into_iter()
            .next()
            .ok_or_else(|| Status::invalid_argument("at least one hand is required"))?;

        let score = self.model_service.classify(hand).await?;
        let predicted_class = self.service_state.label_for(score.class_id);

        tracing::debug!(
            "Predicted {} (class {}) with similarity {:.3}",
            predicted_class,
            score.class_id,
            score.similarity
        );

        Ok(Response::new(Prediction {
            predicted_class,
            similarity: score.similarity,
            class_id: score.class_id as u32,
        }))
    }

    async fn get_class_labels(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ClassLabels>, Status> {
        let labels = self.service_state.get_labels().to_vec();

        Ok(Response::new(ClassLabels { labels }))
    }
}
