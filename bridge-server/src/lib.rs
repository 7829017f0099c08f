//! OpenAI-compatible HTTP surface over the bridging engine.

pub mod auth;
pub mod config;
pub mod openai;
pub mod routes;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use routes::AppState;

pub fn build_router(state: AppState) -> Router {
  Router::new()
    .route("/health", get(routes::health))
    .route("/v1/models", get(routes::list_models))
    .route("/v1/embeddings", post(routes::embeddings))
    .route("/v1/chat/completions", post(routes::chat_completions))
    .layer(middleware::from_fn_with_state(
      state.clone(),
      auth::require_api_key,
    ))
    .with_state(state)
}
