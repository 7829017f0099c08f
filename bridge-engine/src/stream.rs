use crate::coalesce::EmittedWindow;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::trace;

/// How a stream is terminated. `finish_reason` defaults to `"stop"`.
#[derive(Debug, Default)]
pub struct CompleteStream {
  pub final_text: Option<String>,
  pub error_text: Option<String>,
  pub finish_reason: Option<String>,
}

impl CompleteStream {
  pub fn with_final_text(text: String) -> Self {
    CompleteStream {
      final_text: Some(text),
      ..Default::default()
    }
  }

  pub fn with_error(text: String) -> Self {
    CompleteStream {
      error_text: Some(text),
      ..Default::default()
    }
  }
}

struct StreamInner {
  sink: Option<UnboundedSender<Bytes>>,
  emitted: EmittedWindow,
  has_streamed_delta: bool,
  last_event_at: Instant,
  done: bool,
  closed: bool,
  keepalive: Option<JoinHandle<()>>,
  hard_timeout: Option<JoinHandle<()>>,
}

/// One streaming chat-completion request. All emission goes through the
/// inner mutex, which serialises writes per stream; the sink itself is an
/// unbounded channel feeding the HTTP response body, so nothing here ever
/// blocks on the downstream socket.
pub struct ActiveStream {
  request_id: String,
  stream_id: String,
  created: u64,
  model: String,
  stream_chunk_chars: i64,
  inner: Mutex<StreamInner>,
}

impl ActiveStream {
  pub fn new(
    request_id: String,
    stream_id: String,
    model: String,
    sink: UnboundedSender<Bytes>,
    stream_chunk_chars: i64,
  ) -> Self {
    let created = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or(0);
    ActiveStream {
      request_id,
      stream_id,
      created,
      model,
      stream_chunk_chars,
      inner: Mutex::new(StreamInner {
        sink: Some(sink),
        emitted: EmittedWindow::default(),
        has_streamed_delta: false,
        last_event_at: Instant::now(),
        done: false,
        closed: false,
        keepalive: None,
        hard_timeout: None,
      }),
    }
  }

  pub fn request_id(&self) -> &str {
    &self.request_id
  }

  pub fn stream_id(&self) -> &str {
    &self.stream_id
  }

  pub fn set_timers(&self, keepalive: Option<JoinHandle<()>>, hard_timeout: Option<JoinHandle<()>>) {
    let mut inner = self.inner.lock();
    inner.keepalive = keepalive;
    inner.hard_timeout = hard_timeout;
    // registration raced against an immediate completion; do not leak tasks
    if inner.done || inner.closed {
      cancel_timers(&mut inner);
    }
  }

  fn chunk_value(&self, delta: JsonValue, finish_reason: Option<&str>) -> JsonValue {
    json!({
      "id": self.stream_id,
      "object": "chat.completion.chunk",
      "created": self.created,
      "model": self.model,
      "choices": [{
        "index": 0,
        "delta": delta,
        "finish_reason": finish_reason,
      }],
    })
  }

  /// Emits one SSE comment line. Used for the initial `: connected` marker.
  pub fn emit_comment(&self, text: &str) {
    let mut inner = self.inner.lock();
    if inner.done || inner.closed {
      return;
    }
    write(&mut inner, Bytes::from(format!(": {}\n\n", text)));
  }

  /// The initial chunk announcing the assistant role.
  pub fn emit_role_chunk(&self) {
    let mut inner = self.inner.lock();
    if inner.done || inner.closed {
      return;
    }
    let value = self.chunk_value(json!({ "role": "assistant" }), None);
    write_data(&mut inner, &value);
  }

  /// Emits `content`, split into pieces of at most `stream_chunk_chars`
  /// characters (zero or negative disables splitting).
  fn emit_content(&self, inner: &mut StreamInner, content: &str) {
    if inner.done || inner.closed {
      return;
    }
    for piece in split_chunks(content, self.stream_chunk_chars) {
      let value = self.chunk_value(json!({ "content": piece }), None);
      write_data(inner, &value);
    }
  }

  /// Runs the coalescer over one upstream delta. Returns true when an
  /// increment was actually emitted.
  pub fn apply_delta(&self, text: &str) -> bool {
    let mut inner = self.inner.lock();
    inner.last_event_at = Instant::now();
    if inner.done || inner.closed {
      return false;
    }
    let Some(increment) = inner.emitted.apply(text) else {
      trace!("[stream] {} duplicate delta suppressed", self.stream_id);
      return false;
    };
    inner.has_streamed_delta = true;
    self.emit_content(&mut inner, &increment);
    true
  }

  /// Periodic SSE comment so idle proxies keep the socket open. Skipped
  /// while upstream events are flowing. Returns false once the stream is
  /// finished and the keepalive task should stop.
  pub fn emit_keepalive(&self, interval: Duration) -> bool {
    let mut inner = self.inner.lock();
    if inner.done || inner.closed {
      return false;
    }
    if inner.last_event_at.elapsed() < interval {
      return true;
    }
    write(&mut inner, Bytes::from(format!(": keepalive {}\n\n", epoch_millis())));
    true
  }

  /// The single terminating path. Idempotent: the first call wins, every
  /// later one is a no-op. Returns true when this call performed the
  /// completion, in which case the caller unregisters the stream.
  pub fn complete(&self, options: CompleteStream) -> bool {
    let mut inner = self.inner.lock();
    if inner.done || inner.closed {
      return false;
    }

    if let Some(error_text) = &options.error_text {
      self.emit_content(&mut inner, &format!("\n[bridge error] {}\n", error_text));
    }
    if let Some(final_text) = &options.final_text {
      // deltas already delivered this content; a late snapshot would
      // duplicate it client-side
      if !inner.has_streamed_delta {
        self.emit_content(&mut inner, final_text);
      }
    }

    inner.done = true;
    cancel_timers(&mut inner);

    let finish_reason = options.finish_reason.as_deref().unwrap_or("stop");
    let value = self.chunk_value(json!({}), Some(finish_reason));
    write_data(&mut inner, &value);
    write(&mut inner, Bytes::from_static(b"data: [DONE]\n\n"));
    inner.sink = None;
    true
  }

  /// The downstream socket is gone: stop all work, attempt no writes.
  pub fn mark_closed(&self) -> bool {
    let mut inner = self.inner.lock();
    if inner.done || inner.closed {
      return false;
    }
    inner.closed = true;
    cancel_timers(&mut inner);
    inner.sink = None;
    true
  }

  pub fn is_done(&self) -> bool {
    let inner = self.inner.lock();
    inner.done || inner.closed
  }
}

fn cancel_timers(inner: &mut StreamInner) {
  if let Some(keepalive) = inner.keepalive.take() {
    keepalive.abort();
  }
  if let Some(hard_timeout) = inner.hard_timeout.take() {
    hard_timeout.abort();
  }
}

// every transition to closed cancels both timers, same as complete()
// and mark_closed()
fn write(inner: &mut StreamInner, bytes: Bytes) {
  if let Some(sink) = &inner.sink {
    if sink.send(bytes).is_err() {
      inner.closed = true;
      inner.sink = None;
      cancel_timers(inner);
    }
  }
}

fn write_data(inner: &mut StreamInner, value: &JsonValue) {
  write(inner, Bytes::from(format!("data: {}\n\n", value)));
}

fn split_chunks(content: &str, max_chars: i64) -> Vec<&str> {
  if max_chars <= 0 || content.is_empty() {
    return vec![content];
  }
  let max_chars = max_chars as usize;
  let mut pieces = Vec::new();
  let mut start = 0;
  let mut count = 0;
  for (idx, _) in content.char_indices() {
    if count == max_chars {
      pieces.push(&content[start..idx]);
      start = idx;
      count = 0;
    }
    count += 1;
  }
  pieces.push(&content[start..]);
  pieces
}

fn epoch_millis() -> u128 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis())
    .unwrap_or(0)
}
