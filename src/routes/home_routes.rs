use axum::{Json, Router, routing::get};

use crate::models::{AppState, OkResponse};

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

pub async fn health() -> Json<OkResponse> {
    Json(OkResponse::ok())
}
