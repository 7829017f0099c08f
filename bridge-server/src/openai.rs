use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const EMBEDDING_DIMENSIONS: usize = 16;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
  pub model: String,
  #[serde(default)]
  pub messages: Vec<ChatMessage>,
  #[serde(default)]
  pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
  pub role: String,
  #[serde(default)]
  pub content: MessageContent,
}

/// Chat message content arrives either as a plain string or as an array
/// of typed parts; both flatten to text.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
  #[default]
  Empty,
  Text(String),
  Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
pub struct ContentPart {
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub text: String,
}

impl MessageContent {
  pub fn as_text(&self) -> String {
    match self {
      MessageContent::Empty => String::new(),
      MessageContent::Text(text) => text.clone(),
      MessageContent::Parts(parts) => parts
        .iter()
        .filter(|part| part.kind == "text")
        .map(|part| part.text.as_str())
        .collect(),
    }
  }
}

/// Collapses a chat-messages array into the single prompt string the
/// upstream `codex` tool expects.
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
  messages
    .iter()
    .map(|message| format!("{}: {}", message.role, message.content.as_text()))
    .collect::<Vec<_>>()
    .join("\n\n")
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingsRequest {
  #[serde(default)]
  pub input: EmbeddingInput,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
  #[default]
  Empty,
  One(String),
  Many(Vec<String>),
}

impl EmbeddingInput {
  pub fn into_vec(self) -> Vec<String> {
    match self {
      EmbeddingInput::Empty => Vec::new(),
      EmbeddingInput::One(text) => vec![text],
      EmbeddingInput::Many(texts) => texts,
    }
  }
}

pub fn completion_body(model: &str, text: &str) -> JsonValue {
  json!({
    "id": format!("chatcmpl-{}", Uuid::new_v4().simple()),
    "object": "chat.completion",
    "created": epoch_seconds(),
    "model": model,
    "choices": [{
      "index": 0,
      "message": { "role": "assistant", "content": text },
      "finish_reason": "stop",
    }],
    "usage": { "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 },
  })
}

pub fn models_body(model: &str) -> JsonValue {
  json!({
    "object": "list",
    "data": [{
      "id": model,
      "object": "model",
      "created": epoch_seconds(),
      "owned_by": "codex-openai-bridge",
    }],
  })
}

pub fn embeddings_body(model: &str, inputs: &[String]) -> JsonValue {
  let data: Vec<JsonValue> = inputs
    .iter()
    .enumerate()
    .map(|(index, input)| {
      json!({
        "object": "embedding",
        "index": index,
        "embedding": deterministic_embedding(input),
      })
    })
    .collect();
  json!({
    "object": "list",
    "data": data,
    "model": model,
    "usage": { "prompt_tokens": 0, "total_tokens": 0 },
  })
}

pub fn error_body(kind: &str, message: &str) -> JsonValue {
  json!({ "error": { "message": message, "type": kind } })
}

/// The embeddings endpoint is a stub: same input, same vector, every
/// time. Values are derived from an FNV-1a seed run through an LCG.
fn deterministic_embedding(input: &str) -> Vec<f64> {
  let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
  for byte in input.as_bytes() {
    seed ^= u64::from(*byte);
    seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
  }
  let mut state = seed;
  (0..EMBEDDING_DIMENSIONS)
    .map(|_| {
      state = state
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
      ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    })
    .collect()
}

pub fn epoch_seconds() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

pub fn epoch_millis() -> u128 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis())
    .unwrap_or(0)
}
