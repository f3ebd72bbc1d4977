use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    status: String,
    hands_tracked: usize,
}

pub async fn healthcheck(State(state): State<SharedState>) -> Json<Health> {
    Json(Health {
        status: "Available".into(),
        hands_tracked: state.hand_state.hand_count(),
    })
}
