use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct ClassLabels {
    pub labels: Vec<String>,
}

pub async fn class_labels(State(state): State<SharedState>) -> Json<ClassLabels> {
    Json(ClassLabels {
        labels: state.inference.class_labels().to_vec(),
    })
}
