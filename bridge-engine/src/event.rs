use serde_json::Value as JsonValue;

/// What a single upstream event notification means to a stream. One
/// notification may yield several of these, always in this order: a text
/// delta, then an error, then a terminal marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
  TextDelta(String),
  Error(String),
  Terminal,
}

/// Event types that are always text deltas, regardless of shape.
const KNOWN_DELTA_TYPES: &[&str] = &[
  "content_delta",
  "output_text_delta",
  "assistant_content_delta",
  "final_content_delta",
  "reasoning_content_delta",
  "agent_reasoning_delta",
  "text_delta",
  "response_output_text_delta",
  "response_reasoning_text_delta",
];

/// Canonicalises an upstream event-type string: lower-case, runs of `.`,
/// whitespace, `-`, or `_` become a single `_`.
///
/// `"response.output_text.delta"`, `"response output_text delta"`, and
/// `"Response-Output_Text-Delta"` all map to the same canonical type.
pub fn canonical_event_type(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut prev_underscore = false;
  for ch in raw.chars() {
    let is_sep = ch == '.' || ch == '-' || ch == '_' || ch.is_whitespace();
    if is_sep {
      if !prev_underscore {
        out.push('_');
        prev_underscore = true;
      }
    } else {
      for lowered in ch.to_lowercase() {
        out.push(lowered);
      }
      prev_underscore = false;
    }
  }
  out
}

fn is_text_delta(canonical: &str) -> bool {
  if KNOWN_DELTA_TYPES.contains(&canonical) {
    return true;
  }
  canonical.ends_with("_delta")
    && canonical
      .split('_')
      .any(|segment| segment == "text" || segment == "content")
}

fn is_terminal(canonical: &str) -> bool {
  matches!(
    canonical,
    "response_completed" | "response_incomplete" | "response_failed"
  ) || (canonical.starts_with("response_")
    && (canonical.ends_with("_completed")
      || canonical.ends_with("_incomplete")
      || canonical.ends_with("_failed")))
}

fn is_error_carrying(canonical: &str, msg: &JsonValue) -> bool {
  canonical.ends_with("_failed")
    || canonical.ends_with("_incomplete")
    || msg.get("error").map(|e| !e.is_null()).unwrap_or(false)
}

/// Extracts delta text from the shapes upstreams actually send: `delta`,
/// `text`, `part.text`, or a `parts` array. First non-empty result wins.
fn extract_delta_text(msg: &JsonValue) -> Option<String> {
  if let Some(delta) = msg.get("delta").and_then(|v| v.as_str()) {
    if !delta.is_empty() {
      return Some(delta.to_string());
    }
  }
  if let Some(text) = msg.get("text").and_then(|v| v.as_str()) {
    if !text.is_empty() {
      return Some(text.to_string());
    }
  }
  if let Some(text) = msg
    .get("part")
    .and_then(|p| p.get("text"))
    .and_then(|v| v.as_str())
  {
    if !text.is_empty() {
      return Some(text.to_string());
    }
  }
  if let Some(parts) = msg.get("parts").and_then(|v| v.as_array()) {
    let joined: String = parts
      .iter()
      .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
      .collect();
    if !joined.is_empty() {
      return Some(joined);
    }
  }
  None
}

fn extract_error_text(canonical: &str, msg: &JsonValue) -> Option<String> {
  if let Some(message) = msg
    .get("error")
    .and_then(|e| e.get("message"))
    .and_then(|m| m.as_str())
  {
    return Some(message.to_string());
  }
  if let Some(message) = msg.get("error").and_then(|e| e.as_str()) {
    return Some(message.to_string());
  }
  if let Some(message) = msg.get("message").and_then(|m| m.as_str()) {
    return Some(message.to_string());
  }
  if canonical.ends_with("_failed") {
    return Some("upstream response failed".to_string());
  }
  if canonical.ends_with("_incomplete") {
    return Some("upstream response incomplete".to_string());
  }
  None
}

/// Normalises one upstream `msg` payload into zero or more events.
pub fn normalize(msg: &JsonValue) -> Vec<NormalizedEvent> {
  let Some(raw_type) = msg.get("type").and_then(|t| t.as_str()) else {
    return Vec::new();
  };
  let canonical = canonical_event_type(raw_type);
  let mut events = Vec::new();

  if is_text_delta(&canonical) {
    if let Some(text) = extract_delta_text(msg) {
      events.push(NormalizedEvent::TextDelta(text));
    }
  }
  if is_error_carrying(&canonical, msg) {
    if let Some(text) = extract_error_text(&canonical, msg) {
      events.push(NormalizedEvent::Error(text));
    }
  }
  if is_terminal(&canonical) {
    events.push(NormalizedEvent::Terminal);
  }
  events
}
