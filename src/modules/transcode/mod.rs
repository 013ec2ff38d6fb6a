use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub mod coordinator;
pub mod dto;
pub mod handler;
pub mod manifest;
pub mod model;
pub mod progress;
pub mod repository;
pub mod ws;

/// Mounted at the root: these paths straddle `/api/videos`, `/api/transcode`
/// and `/ws`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/videos/transcode/{id}", post(handler::submit_transcode))
        .route("/api/transcode/progress/{id}", get(handler::get_progress))
        .route("/api/transcode/jobs/{job_id}", get(handler::get_job))
        .route("/ws/transcode/{id}", get(ws::transcode_progress_ws))
}
