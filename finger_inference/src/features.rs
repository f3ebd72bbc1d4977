use crate::model_service::ClassScore;
use finger_proto::{Hand, NUM_LANDMARKS};
use thiserror::Error;

pub const FEATURE_LEN: usize = NUM_LANDMARKS * 3;

#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error("Expected {expected} landmarks, got {got}")]
    LandmarkCount { expected: usize, got: usize },
    #[error("Classifier returned no scores")]
    NoScores,
}

/// Flattens a hand into classifier features: coordinates relative to the
/// wrist, scaled so the largest absolute value is 1.
pub fn normalize_hand(hand: &Hand) -> Result<Vec<f32>, FeatureError> {
    if hand.landmarks.len() != NUM_LANDMARKS {
        return Err(FeatureError::LandmarkCount {
            expected: NUM_LANDMARKS,
            got: hand.landmarks.len(),
        });
    }

    let wrist = &hand.landmarks[0];
    let mut features: Vec<f32> = hand
        .landmarks
        .iter()
        .flat_map(|lm| [lm.x - wrist.x, lm.y - wrist.y, lm.z - wrist.z])
        .collect();

    let scale = features.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    if scale > 0.0 {
        features.iter_mut().for_each(|v| *v /= scale);
    }

    Ok(features)
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

pub fn best_class(scores: &[f32]) -> Result<ClassScore, FeatureError> {
    softmax(scores)
        .into_iter()
        .enumerate()
        .reduce(|best, current| if current.1 > best.1 { current } else { best })
        .map(|(class_id, similarity)| ClassScore {
            class_id,
            similarity,
        })
        .ok_or(FeatureError::NoScores)
}
