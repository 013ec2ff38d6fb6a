use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::state::AppState;

pub mod dto;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    let upload = Router::new()
        .route("/api/videos", get(handler::list_videos).post(handler::upload_video))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes));

    Router::new()
        .merge(upload)
        .route("/api/videos/{id}", get(handler::get_video).delete(handler::delete_video))
}
