use crate::core::parser::{MessageReader, RpcMessage};
use crate::core::rpc_peer::RawPeer;
use crate::error::ReadError;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::io::{AsyncRead, BufReader};
use tracing::trace;

/// Receives upstream notifications decoded by the read loop. Implemented by
/// the streaming engine; notifications have no `id` and are never answered.
pub trait NotificationSink: Send + Sync {
  fn handle_notification(&self, method: &str, params: Option<JsonValue>);
}

/// Drains the child's stdout until EOF or an IO error.
///
/// Responses go to the peer's pending table; notifications go to the sink.
/// Returns the terminal [`ReadError`] so the supervisor can log why the
/// stream ended before it reaps the child.
pub async fn read_loop<R: AsyncRead + Unpin>(
  stdout: R,
  peer: RawPeer,
  sink: Arc<dyn NotificationSink>,
) -> ReadError {
  let mut reader = BufReader::new(stdout);
  let mut messages = MessageReader::default();
  loop {
    match messages.next(&mut reader).await {
      Ok(None) => continue,
      Ok(Some(RpcMessage::Response { id, result, error })) => {
        peer.handle_response(&id, result, error);
      },
      Ok(Some(RpcMessage::Notification { method, params })) => {
        trace!("[RPC] notification {}", method);
        sink.handle_notification(&method, params);
      },
      Err(err) => return err,
    }
  }
}
