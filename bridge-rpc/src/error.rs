use serde_json::Value as JsonValue;
use thiserror::Error;

/// Errors surfaced to callers of the RPC layer.
#[derive(Debug, Error)]
pub enum BridgeError {
  #[error("codex is not running")]
  UpstreamUnavailable,

  #[error("RPC timeout for {method}")]
  RpcTimeout { method: String },

  /// A JSON-RPC `error` object received from the child, surfaced verbatim.
  #[error("{0}")]
  Upstream(RemoteError),

  /// The child exited or could not be spawned while requests were in flight.
  #[error("{0}")]
  Disconnect(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Internal(#[from] anyhow::Error),
}

impl BridgeError {
  pub fn disconnect(message: impl Into<String>) -> Self {
    BridgeError::Disconnect(message.into())
  }
}

/// Errors produced while draining the child's stdout.
#[derive(Debug, Error)]
pub enum ReadError {
  #[error("stdout closed: {0}")]
  Disconnect(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// The upstream `error` member of a JSON-RPC response, kept as-is.
#[derive(Debug, Clone)]
pub struct RemoteError(pub JsonValue);

impl std::fmt::Display for RemoteError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.0.get("message").and_then(|m| m.as_str()) {
      Some(message) => write!(f, "{}", message),
      None => write!(f, "{}", self.0),
    }
  }
}
