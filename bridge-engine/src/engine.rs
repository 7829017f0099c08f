use crate::event::{normalize, NormalizedEvent};
use crate::registry::StreamRegistry;
use crate::stream::{ActiveStream, CompleteStream};
use bridge_rpc::core::process::CodexConfig;
use bridge_rpc::core::rpc_loop::NotificationSink;
use bridge_rpc::error::BridgeError;
use bridge_rpc::supervisor::{CodexStatus, CodexSupervisor, StreamFailer};
use bytes::Bytes;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub model_id: String,
  pub codex: CodexConfig,
  /// Keepalive comment interval; zero disables the timer.
  pub sse_keepalive: Duration,
  /// Forced completion deadline per stream; zero disables the timer.
  pub hard_request_timeout: Duration,
  /// Max characters per emitted content chunk; <= 0 disables splitting.
  pub stream_chunk_chars: i64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      model_id: "codex-mcp".to_string(),
      codex: CodexConfig::default(),
      sse_keepalive: Duration::from_millis(15_000),
      hard_request_timeout: Duration::from_millis(600_000),
      stream_chunk_chars: 0,
    }
  }
}

/// The bridging engine: owns the supervised codex child and the registry
/// of in-flight streams, and translates upstream event notifications into
/// OpenAI-shaped SSE chunks.
pub struct BridgeEngine {
  config: EngineConfig,
  supervisor: Arc<CodexSupervisor>,
  registry: StreamRegistry,
}

impl BridgeEngine {
  pub fn new(config: EngineConfig) -> Arc<Self> {
    let supervisor = Arc::new(CodexSupervisor::new(config.codex.clone()));
    Arc::new(BridgeEngine {
      config,
      supervisor,
      registry: StreamRegistry::default(),
    })
  }

  /// Spawns the codex child and begins supervision. Without this the
  /// engine still serves streams, but every RPC fails as unavailable.
  pub fn start(self: &Arc<Self>) {
    self
      .supervisor
      .start(self.clone(), self.clone());
  }

  pub fn model_id(&self) -> &str {
    &self.config.model_id
  }

  pub fn status(&self) -> CodexStatus {
    self.supervisor.status(self.registry.len())
  }

  pub fn shutdown(&self) {
    self.supervisor.shutdown();
  }

  /// Creates and registers the stream for one HTTP request and arms its
  /// keepalive and hard-timeout timers.
  pub fn register_stream(
    self: &Arc<Self>,
    request_id: &str,
    stream_id: &str,
    sink: UnboundedSender<Bytes>,
  ) -> Arc<ActiveStream> {
    let stream = Arc::new(ActiveStream::new(
      request_id.to_string(),
      stream_id.to_string(),
      self.config.model_id.clone(),
      sink,
      self.config.stream_chunk_chars,
    ));
    self.registry.register(stream.clone());

    let keepalive_interval = self.config.sse_keepalive;
    let keepalive = (!keepalive_interval.is_zero()).then(|| {
      let weak = Arc::downgrade(&stream);
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(keepalive_interval);
        ticker.tick().await;
        loop {
          ticker.tick().await;
          let Some(stream) = weak.upgrade() else { break };
          if !stream.emit_keepalive(keepalive_interval) {
            break;
          }
        }
      })
    });

    let hard_timeout = (!self.config.hard_request_timeout.is_zero()).then(|| {
      let engine = self.clone();
      let request_id = request_id.to_string();
      let deadline = self.config.hard_request_timeout;
      tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        engine.complete_stream(
          &request_id,
          CompleteStream::with_error(format!("hard timeout after {}ms", deadline.as_millis())),
        );
      })
    });

    stream.set_timers(keepalive, hard_timeout);
    stream
  }

  /// The single terminating entry point for a stream. Safe to call any
  /// number of times from any task; the first call wins.
  pub fn complete_stream(&self, request_id: &str, options: CompleteStream) {
    let Some(stream) = self.registry.get(request_id) else {
      return;
    };
    if stream.complete(options) {
      self.registry.unregister(request_id);
    }
  }

  /// Downstream socket gone: free resources, emit nothing further.
  pub fn on_client_disconnect(&self, request_id: &str) {
    if let Some(stream) = self.registry.unregister(request_id) {
      if stream.mark_closed() {
        trace!("[stream] client disconnected from {}", request_id);
      }
    }
  }

  pub async fn tools_call(&self, prompt: &str) -> Result<JsonValue, BridgeError> {
    self.supervisor.rpc("tools/call", call_params(prompt)).await
  }

  /// The streaming variant reuses the HTTP request's correlation id as the
  /// JSON-RPC id, so a late response still resolves after
  /// notification-based termination already finished the stream.
  pub async fn tools_call_streaming(
    &self,
    prompt: &str,
    request_id: &str,
  ) -> Result<JsonValue, BridgeError> {
    self
      .supervisor
      .rpc_with_id("tools/call", call_params(prompt), request_id.to_string())
      .await
  }

  fn handle_event(&self, params: &JsonValue) {
    let Some(msg) = params.get("msg") else { return };
    if msg.get("type").and_then(|t| t.as_str()).is_none() {
      return;
    }

    let Some((request_id, stream)) = self.registry.resolve(params) else {
      trace!("[stream] dropping event with no resolvable stream");
      return;
    };
    self.registry.learn_aliases(params, &request_id);

    for event in normalize(msg) {
      match event {
        NormalizedEvent::TextDelta(text) => {
          stream.apply_delta(&text);
        },
        NormalizedEvent::Error(text) => {
          self.complete_stream(&request_id, CompleteStream::with_error(text));
          break;
        },
        NormalizedEvent::Terminal => {
          self.complete_stream(&request_id, CompleteStream::default());
          break;
        },
      }
    }
  }

  /// Best-effort extraction of the assistant text from a `tools/call`
  /// result: `content[].text` where `type == "text"`, else a plain string
  /// result, else the JSON rendering.
  pub fn extract_result_text(result: &JsonValue) -> String {
    if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
      let text: String = content
        .iter()
        .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
        .collect();
      if !text.is_empty() {
        return text;
      }
    }
    if let Some(text) = result.as_str() {
      return text.to_string();
    }
    result.to_string()
  }
}

impl NotificationSink for BridgeEngine {
  fn handle_notification(&self, method: &str, params: Option<JsonValue>) {
    let Some(params) = params else {
      trace!("[stream] ignoring {} without params", method);
      return;
    };
    self.handle_event(&params);
  }
}

impl StreamFailer for BridgeEngine {
  fn fail_all_streams(&self, message: &str) {
    for stream in self.registry.drain() {
      stream.complete(CompleteStream::with_error(message.to_string()));
    }
  }
}

fn call_params(prompt: &str) -> JsonValue {
  json!({
    "name": "codex",
    "arguments": { "prompt": prompt },
  })
}
