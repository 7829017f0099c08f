use crate::error::ReadError;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

const PARSE_DIAGNOSTIC_CHARS: usize = 120;

/// A decoded line from the child's stdout. The presence of an `id`
/// identifies a response; a `method` without an `id` is a notification.
#[derive(Debug, Clone)]
pub enum RpcMessage {
  Response {
    id: String,
    result: Option<JsonValue>,
    error: Option<JsonValue>,
  },
  Notification {
    method: String,
    params: Option<JsonValue>,
  },
}

/// Line-oriented reader for the child's stdout. Only stdout is protocol;
/// any non-JSON line is a child bug and is dropped without wedging the
/// stream.
#[derive(Debug, Default)]
pub struct MessageReader(String);

impl MessageReader {
  /// Reads the next line from the stream and decodes it.
  ///
  /// Returns `Ok(None)` for lines that carry no message (empty lines,
  /// unparsable output). EOF is reported as [`ReadError::Disconnect`] so
  /// the supervisor can observe the child going away.
  pub async fn next<R: AsyncBufRead + Unpin>(
    &mut self,
    reader: &mut R,
  ) -> Result<Option<RpcMessage>, ReadError> {
    self.0.clear();
    let n = reader.read_line(&mut self.0).await?;
    if n == 0 {
      return Err(ReadError::Disconnect("stdout reached EOF".to_string()));
    }
    Ok(self.parse(&self.0))
  }

  /// Decodes a single line. Tolerates `\r\n` endings and skips empties.
  pub fn parse(&self, line: &str) -> Option<RpcMessage> {
    let line = line.trim_end_matches('\n').trim_end_matches('\r');
    if line.is_empty() {
      return None;
    }
    let value = match serde_json::from_str::<JsonValue>(line) {
      Ok(value) => value,
      Err(err) => {
        warn!(
          "[RPC] dropping non-JSON stdout line ({}): {}",
          err,
          truncate(line, PARSE_DIAGNOSTIC_CHARS)
        );
        return None;
      },
    };

    if let Some(id) = value.get("id") {
      let id = match id {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
      };
      return Some(RpcMessage::Response {
        id,
        result: value.get("result").cloned(),
        error: value.get("error").cloned(),
      });
    }

    match value.get("method").and_then(|m| m.as_str()) {
      Some(method) => Some(RpcMessage::Notification {
        method: method.to_string(),
        params: value.get("params").cloned(),
      }),
      None => {
        warn!(
          "[RPC] dropping message with neither id nor method: {}",
          truncate(line, PARSE_DIAGNOSTIC_CHARS)
        );
        None
      },
    }
  }
}

fn truncate(s: &str, max_chars: usize) -> &str {
  match s.char_indices().nth(max_chars) {
    Some((idx, _)) => &s[..idx],
    None => s,
  }
}
