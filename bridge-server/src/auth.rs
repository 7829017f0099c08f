use crate::openai::error_body;
use crate::routes::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Gates every endpoint except `/health`. With no `API_KEY` configured the
/// bridge is open; otherwise the configured header must carry the key,
/// with a `Bearer ` prefix when bearer framing is required.
pub async fn require_api_key(
  State(state): State<AppState>,
  request: Request,
  next: Next,
) -> Response {
  let Some(expected) = state.config.api_key.as_deref() else {
    return next.run(request).await;
  };
  if request.uri().path() == "/health" {
    return next.run(request).await;
  }

  let presented = request
    .headers()
    .get(state.config.api_key_header.as_str())
    .and_then(|value| value.to_str().ok());
  let authorized = match presented {
    Some(value) if state.config.require_bearer => value
      .strip_prefix("Bearer ")
      .map(|token| token == expected)
      .unwrap_or(false),
    Some(value) => value == expected,
    None => false,
  };

  if authorized {
    next.run(request).await
  } else {
    (
      StatusCode::UNAUTHORIZED,
      Json(error_body("invalid_request_error", "missing or invalid API key")),
    )
      .into_response()
  }
}
