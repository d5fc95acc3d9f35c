//! API route definitions.

use std::path::Path;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};

use crate::auth::auth_middleware;
use crate::config::ServerConfig;

use super::handlers;
use super::state::AppState;
use super::ws_logs;

/// Build the application router.
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let cors = build_cors_layer(&state.allowed_origins);
    let max_body_size = server.max_upload_size_mb * 1024 * 1024;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let auth_state = state.auth.clone();

    // Protected routes (require authentication)
    let protected_api = Router::new()
        .route("/logout", post(handlers::logout))
        .route(
            "/containers",
            get(handlers::list_containers).post(handlers::create_container),
        )
        .route("/containers/{id}/inspect", get(handlers::inspect_container))
        .route("/containers/{id}/env", get(handlers::container_env))
        .route("/containers/{id}/settings", post(handlers::update_settings))
        .route("/containers/{id}/migrate", post(handlers::migrate_container))
        .route(
            "/containers/{id}/files",
            get(handlers::list_files).delete(handlers::delete_file),
        )
        .route("/containers/{id}/files/content", get(handlers::read_file))
        .route("/containers/{id}/files/download", get(handlers::download_file))
        .route("/containers/{id}/files/write", post(handlers::write_file))
        .route("/containers/{id}/files/upload", post(handlers::upload_file))
        .route(
            "/containers/{id}/files/create-file",
            post(handlers::create_file),
        )
        .route(
            "/containers/{id}/files/create-folder",
            post(handlers::create_folder),
        )
        .route(
            "/containers/{id}/files/extract",
            post(handlers::extract_archive),
        )
        .route(
            "/containers/{id}/files/compress",
            post(handlers::compress_files),
        )
        .route(
            "/containers/{id}/{action}",
            post(handlers::container_action),
        );

    // Public routes (no authentication)
    let public_api = Router::new()
        .route("/health", get(handlers::health))
        .route("/login", post(handlers::login));

    // Browsers cannot set headers on WebSocket requests; the token comes
    // from the cookie or the query string.
    let protected_ws = Router::new().route("/ws/logs", get(ws_logs::ws_logs));

    let protected = Router::new()
        .nest("/api", protected_api)
        .merge(protected_ws)
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    let mut router = Router::new()
        .nest("/api", public_api)
        .merge(protected)
        .with_state(state);

    if let Some(dir) = server.static_dir.as_deref().map(Path::new) {
        if dir.is_dir() {
            info!("Serving frontend from {}", dir.display());
            router = router.fallback_service(ServeDir::new(dir));
        } else {
            warn!("Static directory {} not found, frontend disabled", dir.display());
        }
    }

    router
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer from the configured origins.
///
/// With no configured origins, cross-origin requests are denied.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
        header::COOKIE,
    ];

    if allowed_origins.is_empty() {
        return CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")));
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
