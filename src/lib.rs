use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod backend_client;
pub mod config;
pub mod errors;
pub mod http;
pub mod import;
pub mod logging;

use http::sessions::SessionStore;
use import::Services;

#[derive(Clone)]
pub struct AppState {
    pub api_token: Arc<str>,
    pub services: Services,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(api_token: String, services: Services) -> Self {
        Self {
            api_token: Arc::<str>::from(api_token),
            services,
            sessions: Arc::new(SessionStore::new()),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/imports", post(http::handlers::open_import))
        .route(
            "/imports/{session_id}",
            get(http::handlers::get_import).delete(http::handlers::close_import),
        )
        .route(
            "/imports/{session_id}/submit",
            post(http::handlers::submit_import),
        )
        .route(
            "/imports/{session_id}/retry-install",
            post(http::handlers::retry_install),
        )
        .route(
            "/imports/{session_id}/reset",
            post(http::handlers::reset_import),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
