use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::state::AppState;

pub fn configure_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_routes())
        .merge(crate::modules::video::router(state.config.max_upload_bytes))
        .merge(crate::modules::transcode::router())
        .nest_service("/videos", ServeDir::new(&state.storage.uploads_dir))
        .nest_service("/transcoded", ServeDir::new(&state.storage.transcoded_dir))
        .layer(cors_layer(&state.config.cors_origin))
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/api/health", get(|| async { "ok" }))
}

/// `*` allows any origin; anything else is a comma separated list.
fn cors_layer(origins: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if origins.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(allowed))
}
