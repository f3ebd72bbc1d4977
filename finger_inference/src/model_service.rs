use finger_proto::{Hand, HandBatch, ImageFrame};
use tonic::{async_trait, Status};

/// Arg-max of the classifier output and its softmax probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScore {
    pub class_id: usize,
    pub similarity: f32,
}

#[async_trait]
pub trait ModelService: Send + Sync + Clone + 'static {
    async fn detect_hands(&self, frame: ImageFrame) -> Result<HandBatch, Status>;
    async fn classify(&self, hand: Hand) -> Result<ClassScore, Status>;
}
