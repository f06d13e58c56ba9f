//! HTTP 网关：路由装配与共享状态。

pub mod handler;

use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use std::sync::Arc;

use crate::config::Config;
use crate::generation::GenerationService;
use crate::runtime_config::RuntimeCredentials;

pub struct AppState {
    pub cfg: Config,
    pub service: GenerationService,
    pub credentials: Arc<RuntimeCredentials>,
}

pub fn router(state: Arc<AppState>) -> Router {
    // === 公开路由（不需要认证）===
    let public_routes = Router::new().route("/health", get(handler::handle_health));

    // === API 路由 ===
    let api_routes = Router::new()
        .route("/api/generations", post(handler::handle_submit))
        .route("/api/prompt/optimize", post(handler::handle_optimize))
        .route("/api/history", get(handler::handle_history))
        .route("/api/history/{id}", delete(handler::handle_delete))
        .route(
            "/api/selection",
            get(handler::handle_selection_get).put(handler::handle_selection_put),
        )
        .route(
            "/api/credentials/{provider}",
            get(handler::handle_credentials_get).put(handler::handle_credentials_put),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            handler::api_auth_middleware,
        ))
        .with_state(state);

    Router::new().merge(public_routes).merge(api_routes)
}
