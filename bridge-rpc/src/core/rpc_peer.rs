use crate::error::{BridgeError, RemoteError};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, trace};

/// An in-flight request: the resolver plus the method name used for the
/// timeout diagnostic. Removed on response, error, timeout, or shutdown.
struct PendingRpc {
  method: String,
  tx: oneshot::Sender<Result<JsonValue, BridgeError>>,
}

pub struct RpcState {
  writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
  request_id_counter: AtomicU64,
  pending: Mutex<HashMap<String, PendingRpc>>,
  rpc_timeout: Duration,
}

/// Shared handle to the child's stdin plus the pending-request table.
///
/// Any number of requests may be outstanding; correlation is purely by id,
/// so the order responses come back in is irrelevant.
pub struct RawPeer(Arc<RpcState>);

impl RawPeer {
  pub fn new<W: AsyncWrite + Send + Unpin + 'static>(writer: W, rpc_timeout: Duration) -> Self {
    RawPeer(Arc::new(RpcState {
      writer: tokio::sync::Mutex::new(Box::new(writer)),
      request_id_counter: AtomicU64::new(0),
      pending: Mutex::new(HashMap::new()),
      rpc_timeout,
    }))
  }

  /// Serialises one JSON value, appends a newline, and writes it atomically.
  /// Callers assemble valid JSON-RPC envelopes; no schema validation here.
  async fn send(&self, value: &JsonValue) -> io::Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut writer = self.0.writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
  }

  pub async fn send_rpc_notification(&self, method: &str, params: JsonValue) {
    let msg = json!({ "jsonrpc": "2.0", "method": method, "params": params });
    if let Err(e) = self.send(&msg).await {
      error!("[RPC] send error on notification {}: {}", method, e);
    }
  }

  /// Sends a request with a freshly generated id and awaits the result.
  pub async fn rpc(&self, method: &str, params: JsonValue) -> Result<JsonValue, BridgeError> {
    let id = format!("rpc-{}", self.0.request_id_counter.fetch_add(1, Ordering::Relaxed));
    self.rpc_with_id(method, params, id).await
  }

  /// Same as [`rpc`](Self::rpc) but with a caller-supplied id. The streaming
  /// call reuses the per-request correlation id so a late response still
  /// resolves after notification-based termination already happened.
  pub async fn rpc_with_id(
    &self,
    method: &str,
    params: JsonValue,
    id: String,
  ) -> Result<JsonValue, BridgeError> {
    trace!("[RPC] call {} id={}", method, id);
    let (tx, rx) = oneshot::channel();
    {
      let mut pending = self.0.pending.lock();
      pending.insert(
        id.clone(),
        PendingRpc {
          method: method.to_string(),
          tx,
        },
      );
    }

    let msg = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
    if let Err(e) = self.send(&msg).await {
      self.0.pending.lock().remove(&id);
      return Err(BridgeError::Io(e));
    }

    match timeout(self.0.rpc_timeout, rx).await {
      Ok(Ok(result)) => result,
      Ok(Err(_)) => Err(BridgeError::disconnect("codex exited before responding")),
      Err(_) => {
        self.0.pending.lock().remove(&id);
        Err(BridgeError::RpcTimeout {
          method: method.to_string(),
        })
      },
    }
  }

  /// Dispatches a decoded response to its pending request. An unknown id is
  /// a late reply after timeout and is dropped.
  pub fn handle_response(&self, id: &str, result: Option<JsonValue>, error: Option<JsonValue>) {
    let handler = self.0.pending.lock().remove(id);
    match handler {
      Some(PendingRpc { tx, .. }) => {
        let outcome = match error {
          Some(error) => Err(BridgeError::Upstream(RemoteError(error))),
          None => Ok(result.unwrap_or(JsonValue::Null)),
        };
        let _ = tx.send(outcome);
      },
      None => debug!("[RPC] dropping response for unknown id {}", id),
    }
  }

  /// Fails every in-flight request with the given diagnostic. Called by the
  /// supervisor when the child exits or fails to spawn.
  pub fn fail_all(&self, message: &str) {
    let drained: Vec<PendingRpc> = {
      let mut pending = self.0.pending.lock();
      pending.drain().map(|(_, p)| p).collect()
    };
    for p in drained {
      trace!("[RPC] failing pending {} ({})", p.method, message);
      let _ = p.tx.send(Err(BridgeError::disconnect(message)));
    }
  }

  pub fn pending_count(&self) -> usize {
    self.0.pending.lock().len()
  }
}

impl Clone for RawPeer {
  fn clone(&self) -> Self {
    RawPeer(self.0.clone())
  }
}
