use crate::config::Config;
use crate::openai::{
  completion_body, embeddings_body, epoch_millis, error_body, flatten_messages, models_body,
  ChatCompletionRequest, EmbeddingsRequest,
};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bridge_engine::{BridgeEngine, CompleteStream};
use bytes::Bytes;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
  pub engine: Arc<BridgeEngine>,
  pub config: Arc<Config>,
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
  Json(json!({
    "ok": true,
    "model": state.config.model_id,
    "codex": state.engine.status(),
  }))
}

pub async fn list_models(State(state): State<AppState>) -> Json<serde_json::Value> {
  Json(models_body(&state.config.model_id))
}

pub async fn embeddings(
  State(state): State<AppState>,
  Json(request): Json<EmbeddingsRequest>,
) -> Json<serde_json::Value> {
  let inputs = request.input.into_vec();
  Json(embeddings_body(&state.config.model_id, &inputs))
}

pub async fn chat_completions(
  State(state): State<AppState>,
  Json(request): Json<ChatCompletionRequest>,
) -> Response {
  if request.model != state.config.model_id {
    return (
      StatusCode::BAD_REQUEST,
      Json(error_body(
        "invalid_request_error",
        &format!("unknown model: {}", request.model),
      )),
    )
      .into_response();
  }

  let prompt = flatten_messages(&request.messages);
  if request.stream {
    stream_chat(state, prompt).await
  } else {
    match state.engine.tools_call(&prompt).await {
      Ok(result) => {
        let text = BridgeEngine::extract_result_text(&result);
        Json(completion_body(&state.config.model_id, &text)).into_response()
      },
      Err(err) => (
        StatusCode::BAD_GATEWAY,
        Json(error_body("server_error", &err.to_string())),
      )
        .into_response(),
    }
  }
}

/// Sets up the SSE response for one streaming request: registers the
/// stream, emits the connected comment and the initial role chunk, kicks
/// off the `tools/call` future, and hands the channel to the body. From
/// here on the engine owns all emission; the `tools/call` settlement is
/// absorbed passively when notifications already finished the stream.
async fn stream_chat(state: AppState, prompt: String) -> Response {
  let request_id = format!("req-{}", Uuid::new_v4().simple());
  let stream_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
  let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
  let disconnect_tx = tx.clone();

  let stream = state.engine.register_stream(&request_id, &stream_id, tx);
  stream.emit_comment(&format!("connected {}", epoch_millis()));
  stream.emit_role_chunk();
  debug!("[stream] {} opened as {}", request_id, stream_id);

  {
    let engine = state.engine.clone();
    let request_id = request_id.clone();
    tokio::spawn(async move {
      disconnect_tx.closed().await;
      engine.on_client_disconnect(&request_id);
    });
  }

  {
    let engine = state.engine.clone();
    let request_id = request_id.clone();
    tokio::spawn(async move {
      match engine.tools_call_streaming(&prompt, &request_id).await {
        Ok(result) => {
          let text = BridgeEngine::extract_result_text(&result);
          engine.complete_stream(&request_id, CompleteStream::with_final_text(text));
        },
        Err(err) => {
          engine.complete_stream(&request_id, CompleteStream::with_error(err.to_string()));
        },
      }
    });
  }

  let body = Body::from_stream(UnboundedReceiverStream::new(rx).map(Ok::<Bytes, Infallible>));
  (
    [
      (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
      (header::CACHE_CONTROL, "no-cache, no-transform"),
      (header::CONNECTION, "keep-alive"),
      (header::HeaderName::from_static("x-accel-buffering"), "no"),
    ],
    body,
  )
    .into_response()
}
