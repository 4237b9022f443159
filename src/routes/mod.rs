use crate::models::AppState;
use axum::Router;

pub mod home_routes;
pub mod patient_routes;
pub mod upload_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", patient_routes::router())
        .nest("/api", upload_routes::router())
        .merge(home_routes::router())
        .with_state(state)
}
