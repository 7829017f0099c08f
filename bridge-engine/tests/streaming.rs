use bridge_engine::{BridgeEngine, CompleteStream, EngineConfig};
use bridge_rpc::core::process::CodexConfig;
use bridge_rpc::core::rpc_loop::NotificationSink;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn setup_log() {
  static START: std::sync::Once = std::sync::Once::new();
  START.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_writer(std::io::stderr)
      .try_init();
  });
}

fn test_engine(chunk_chars: i64, keepalive_ms: u64, hard_ms: u64) -> Arc<BridgeEngine> {
  setup_log();
  BridgeEngine::new(EngineConfig {
    model_id: "codex-mcp".to_string(),
    codex: CodexConfig::default(),
    sse_keepalive: Duration::from_millis(keepalive_ms),
    hard_request_timeout: Duration::from_millis(hard_ms),
    stream_chunk_chars: chunk_chars,
  })
}

fn open_stream(
  engine: &Arc<BridgeEngine>,
  request_id: &str,
) -> UnboundedReceiver<Bytes> {
  let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
  let stream = engine.register_stream(request_id, &format!("chatcmpl-{}", request_id), tx);
  stream.emit_comment("connected 0");
  stream.emit_role_chunk();
  rx
}

fn delta_event(request_id: &str, event_type: &str, msg_extra: Value) -> Value {
  let mut msg = msg_extra;
  msg["type"] = json!(event_type);
  json!({ "_meta": { "requestId": request_id }, "msg": msg })
}

fn send(engine: &Arc<BridgeEngine>, params: Value) {
  engine.handle_notification("codex/event", Some(params));
}

/// Collects everything written to the stream until its sink closes.
async fn collect(mut rx: UnboundedReceiver<Bytes>) -> Vec<String> {
  let mut frames = Vec::new();
  loop {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
      Ok(Some(bytes)) => frames.push(String::from_utf8(bytes.to_vec()).unwrap()),
      Ok(None) => return frames,
      Err(_) => panic!("stream never closed; got {:?}", frames),
    }
  }
}

fn content_of(frames: &[String]) -> String {
  frames
    .iter()
    .filter_map(|frame| frame.strip_prefix("data: "))
    .filter(|payload| !payload.starts_with("[DONE]"))
    .filter_map(|payload| serde_json::from_str::<Value>(payload.trim()).ok())
    .filter_map(|chunk| {
      chunk["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string)
    })
    .collect()
}

fn done_count(frames: &[String]) -> usize {
  frames
    .iter()
    .filter(|frame| frame.as_str() == "data: [DONE]\n\n")
    .count()
}

fn finish_reasons(frames: &[String]) -> Vec<String> {
  frames
    .iter()
    .filter_map(|frame| frame.strip_prefix("data: "))
    .filter_map(|payload| serde_json::from_str::<Value>(payload.trim()).ok())
    .filter_map(|chunk| {
      chunk["choices"][0]["finish_reason"]
        .as_str()
        .map(str::to_string)
    })
    .collect()
}

#[tokio::test]
async fn duplicate_snapshot_and_overlap_coalesce_to_monotonic_content() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-1");

  send(&engine, delta_event("req-1", "content_delta", json!({ "delta": "Expl" })));
  send(&engine, delta_event("req-1", "output_text_delta", json!({ "delta": "Expl" })));
  send(&engine, delta_event("req-1", "output_text_delta", json!({ "text": "Exploring" })));
  send(&engine, delta_event("req-1", "output_text_delta", json!({ "delta": "ing Terminal" })));
  send(&engine, delta_event("req-1", "response.completed", json!({})));

  let frames = collect(rx).await;
  assert_eq!(content_of(&frames), "Exploring Terminal");
  assert_eq!(done_count(&frames), 1);
  assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
  assert_eq!(engine.status().active_streams, 0);
}

#[tokio::test]
async fn failure_correlates_through_learned_alias() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-2");
  // second stream so the sole-active fallback cannot mask broken aliasing
  let other_rx = open_stream(&engine, "req-other");

  send(
    &engine,
    json!({
      "_meta": { "requestId": "req-2" },
      "msg": { "type": "output_text_delta", "delta": "partial ", "response_id": "resp-42" },
    }),
  );
  send(
    &engine,
    json!({
      "msg": { "type": "response.failed", "message": "rate limited", "response_id": "resp-42" },
    }),
  );

  let frames = collect(rx).await;
  let content = content_of(&frames);
  assert_eq!(content, "partial \n[bridge error] rate limited\n");
  assert_eq!(content.matches("[bridge error]").count(), 1);
  assert_eq!(done_count(&frames), 1);
  assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");

  engine.complete_stream("req-other", CompleteStream::default());
  let other_frames = collect(other_rx).await;
  assert!(!content_of(&other_frames).contains("rate limited"));
}

#[tokio::test]
async fn incomplete_without_message_uses_the_default_diagnostic() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-3");

  send(&engine, delta_event("req-3", "response.incomplete", json!({})));

  let frames = collect(rx).await;
  assert_eq!(
    content_of(&frames),
    "\n[bridge error] upstream response incomplete\n"
  );
  assert_eq!(done_count(&frames), 1);
}

#[tokio::test]
async fn final_text_only_path_emits_the_tool_result() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-4");

  let result = json!({ "content": [{ "type": "text", "text": "FINAL" }] });
  engine.complete_stream(
    "req-4",
    CompleteStream::with_final_text(BridgeEngine::extract_result_text(&result)),
  );

  let frames = collect(rx).await;
  assert!(frames[0].starts_with(": connected"));
  let role: Value =
    serde_json::from_str(frames[1].strip_prefix("data: ").unwrap().trim()).unwrap();
  assert_eq!(role["choices"][0]["delta"]["role"], "assistant");
  assert_eq!(content_of(&frames), "FINAL");
  assert_eq!(finish_reasons(&frames), vec!["stop"]);
  assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
}

#[tokio::test]
async fn final_text_is_suppressed_after_streamed_deltas() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-5");

  send(&engine, delta_event("req-5", "output_text_delta", json!({ "delta": "hello " })));
  send(&engine, delta_event("req-5", "output_text_delta", json!({ "text": "world" })));
  send(&engine, delta_event("req-5", "response.completed", json!({})));
  engine.complete_stream(
    "req-5",
    CompleteStream::with_final_text("SHOULD_NOT_APPEAR".to_string()),
  );

  let frames = collect(rx).await;
  let content = content_of(&frames);
  assert_eq!(content, "hello world");
  assert!(!content.contains("SHOULD_NOT_APPEAR"));
  assert_eq!(done_count(&frames), 1);
}

#[tokio::test]
async fn hard_timeout_forces_completion() {
  let engine = test_engine(0, 0, 50);
  let rx = open_stream(&engine, "req-6");

  let frames = collect(rx).await;
  assert_eq!(
    content_of(&frames),
    "\n[bridge error] hard timeout after 50ms\n"
  );
  assert_eq!(done_count(&frames), 1);
  assert_eq!(engine.status().active_streams, 0);
}

#[tokio::test]
async fn complete_stream_is_idempotent() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-7");

  engine.complete_stream("req-7", CompleteStream::with_final_text("once".to_string()));
  engine.complete_stream("req-7", CompleteStream::with_final_text("twice".to_string()));
  engine.complete_stream("req-7", CompleteStream::with_error("thrice".to_string()));

  let frames = collect(rx).await;
  assert_eq!(content_of(&frames), "once");
  assert_eq!(done_count(&frames), 1);
  assert_eq!(finish_reasons(&frames).len(), 1);
}

#[tokio::test]
async fn duplicate_delivery_of_the_same_delta_emits_once() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-8");

  let event = delta_event("req-8", "output_text_delta", json!({ "delta": "same" }));
  send(&engine, event.clone());
  send(&engine, event);
  send(&engine, delta_event("req-8", "response.completed", json!({})));

  let frames = collect(rx).await;
  assert_eq!(content_of(&frames), "same");
}

#[tokio::test]
async fn unresolvable_events_are_dropped_when_streams_are_ambiguous() {
  let engine = test_engine(0, 0, 0);
  let rx_a = open_stream(&engine, "req-a");
  let rx_b = open_stream(&engine, "req-b");

  send(
    &engine,
    json!({ "msg": { "type": "output_text_delta", "delta": "orphan" } }),
  );

  engine.complete_stream("req-a", CompleteStream::default());
  engine.complete_stream("req-b", CompleteStream::default());
  assert!(!content_of(&collect(rx_a).await).contains("orphan"));
  assert!(!content_of(&collect(rx_b).await).contains("orphan"));
}

#[tokio::test]
async fn sole_active_stream_receives_uncorrelated_events() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-9");

  send(
    &engine,
    json!({ "msg": { "type": "output_text_delta", "delta": "found you" } }),
  );
  send(&engine, delta_event("req-9", "response.completed", json!({})));

  let frames = collect(rx).await;
  assert_eq!(content_of(&frames), "found you");
}

#[tokio::test]
async fn content_is_split_into_bounded_chunks() {
  let engine = test_engine(4, 0, 0);
  let rx = open_stream(&engine, "req-10");

  send(&engine, delta_event("req-10", "output_text_delta", json!({ "delta": "hello world" })));
  send(&engine, delta_event("req-10", "response.completed", json!({})));

  let frames = collect(rx).await;
  let pieces: Vec<String> = frames
    .iter()
    .filter_map(|frame| frame.strip_prefix("data: "))
    .filter_map(|payload| serde_json::from_str::<Value>(payload.trim()).ok())
    .filter_map(|chunk| {
      chunk["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string)
    })
    .collect();
  assert!(pieces.iter().all(|piece| piece.chars().count() <= 4));
  assert_eq!(pieces.concat(), "hello world");
}

#[tokio::test]
async fn keepalive_comments_flow_while_idle() {
  let engine = test_engine(0, 30, 0);
  let mut rx = open_stream(&engine, "req-11");

  tokio::time::sleep(Duration::from_millis(150)).await;
  engine.complete_stream("req-11", CompleteStream::default());

  let mut saw_keepalive = false;
  while let Ok(bytes) = rx.try_recv() {
    if String::from_utf8(bytes.to_vec())
      .unwrap()
      .starts_with(": keepalive ")
    {
      saw_keepalive = true;
    }
  }
  assert!(saw_keepalive);
}

#[tokio::test]
async fn child_exit_fails_every_stream_exactly_once() {
  let engine = test_engine(0, 0, 0);
  let rx_a = open_stream(&engine, "req-x");
  let rx_b = open_stream(&engine, "req-y");

  use bridge_rpc::supervisor::StreamFailer;
  engine.fail_all_streams("codex exited (code 1, signal none)");

  for rx in [rx_a, rx_b] {
    let frames = collect(rx).await;
    let content = content_of(&frames);
    assert_eq!(
      content,
      "\n[bridge error] codex exited (code 1, signal none)\n"
    );
    assert_eq!(done_count(&frames), 1);
    assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
  }
  assert_eq!(engine.status().active_streams, 0);
}

#[tokio::test]
async fn client_disconnect_frees_the_stream_silently() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-z");
  drop(rx);

  engine.on_client_disconnect("req-z");
  assert_eq!(engine.status().active_streams, 0);
  // late completion attempts are no-ops
  engine.complete_stream("req-z", CompleteStream::with_final_text("late".to_string()));
}

#[tokio::test]
async fn terminal_after_error_does_not_reopen_the_stream() {
  let engine = test_engine(0, 0, 0);
  let rx = open_stream(&engine, "req-12");

  send(
    &engine,
    delta_event(
      "req-12",
      "response.failed",
      json!({ "error": { "message": "kaput" } }),
    ),
  );
  send(&engine, delta_event("req-12", "response.completed", json!({})));

  let frames = collect(rx).await;
  assert_eq!(content_of(&frames), "\n[bridge error] kaput\n");
  assert_eq!(done_count(&frames), 1);
}
