pub mod animator;
pub mod camera;
pub mod config;
pub mod error;
pub mod geometry;
pub mod ingest;
pub mod models;
pub mod poll;
pub mod render;
pub mod route;
pub mod session;
pub mod store;
pub mod tracker;
pub mod transport;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};

use crate::error::TrackerError;
use crate::models::{ApiError, OrientationReading, SessionKey, TrackerSnapshot};
use crate::tracker::{Command, TrackerHandle};

#[derive(Clone)]
pub struct AppState {
    pub tracker: TrackerHandle,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/tracker", get(snapshot_handler))
        .route("/api/heading-mode", post(heading_mode_handler))
        .route("/api/orientation", post(orientation_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/session", put(session_handler))
        .layer(cors)
        .with_state(state)
}

async fn snapshot_handler(State(state): State<AppState>) -> Json<TrackerSnapshot> {
    Json(state.tracker.snapshot())
}

async fn heading_mode_handler(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    dispatch(&state, Command::ToggleHeadingMode).await
}

async fn orientation_handler(
    State(state): State<AppState>,
    Json(reading): Json<OrientationReading>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    dispatch(&state, Command::Orientation(reading)).await
}

async fn refresh_handler(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    dispatch(&state, Command::Reconnect).await
}

async fn session_handler(
    State(state): State<AppState>,
    Json(key): Json<SessionKey>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    tracing::info!(trip_id = %key.trip_id, share_id = %key.share_id, "session change requested");
    dispatch(&state, Command::ChangeSession(key)).await
}

async fn dispatch(
    state: &AppState,
    command: Command,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    state.tracker.send(command).await.map_err(api_error)?;
    Ok(StatusCode::ACCEPTED)
}

fn api_error(err: TrackerError) -> (StatusCode, Json<ApiError>) {
    let status = match err {
        TrackerError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            message: err.to_string(),
        }),
    )
}
