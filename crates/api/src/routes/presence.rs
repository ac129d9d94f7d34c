//! Presence snapshot

use axum::{extract::State, Json};
use parley_shared::UserId;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub online_users: Vec<UserId>,
}

/// GET /presence
pub async fn get_presence(State(state): State<AppState>) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        online_users: state.registry.roster().await,
    })
}
