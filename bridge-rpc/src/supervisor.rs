use crate::core::process::{spawn_codex, CodexConfig};
use crate::core::rpc_loop::{read_loop, NotificationSink};
use crate::core::rpc_peer::RawPeer;
use crate::error::BridgeError;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info, trace, warn};

const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
const MAX_BACKOFF_MS: u64 = 8000;

/// Best-effort hook the supervisor uses to terminate every active stream
/// when the child goes away. Implemented by the streaming engine.
pub trait StreamFailer: Send + Sync {
  fn fail_all_streams(&self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunningState {
  ReadyToConnect,
  Connecting,
  Running { pid: u32 },
  UnexpectedStop,
}

pub type RunningStateReceiver = watch::Receiver<RunningState>;

#[derive(Debug, Clone, Serialize)]
pub struct CodexStatus {
  pub pid: Option<u32>,
  pub restarts: u64,
  pub uptime_secs: u64,
  pub pending_rpcs: usize,
  pub active_streams: usize,
}

/// Owns the codex child process: spawns it, wires it to the codec, and
/// restarts it on exit with bounded linear backoff. On each crash every
/// pending request and active stream is failed with a diagnostic message.
/// There is no max-restart bound; the supervisor keeps trying until the
/// host process stops.
pub struct CodexSupervisor {
  config: CodexConfig,
  peer: Mutex<Option<RawPeer>>,
  pid: Mutex<Option<u32>>,
  started_at: Mutex<Option<Instant>>,
  restarts: AtomicU64,
  shutdown: AtomicBool,
  running_state: watch::Sender<RunningState>,
  #[allow(dead_code)]
  // keep one receiver alive so sending a state never fails
  running_state_rx: RunningStateReceiver,
}

impl CodexSupervisor {
  pub fn new(config: CodexConfig) -> Self {
    let (running_state, running_state_rx) = watch::channel(RunningState::ReadyToConnect);
    CodexSupervisor {
      config,
      peer: Mutex::new(None),
      pid: Mutex::new(None),
      started_at: Mutex::new(None),
      restarts: AtomicU64::new(0),
      shutdown: AtomicBool::new(false),
      running_state,
      running_state_rx,
    }
  }

  /// Starts the spawn/restart loop. Spawn errors are treated identically to
  /// exits: fail everything, back off, try again.
  pub fn start(self: &Arc<Self>, sink: Arc<dyn NotificationSink>, failer: Arc<dyn StreamFailer>) {
    let supervisor = self.clone();
    tokio::spawn(async move {
      supervisor.run(sink, failer).await;
    });
  }

  async fn run(self: Arc<Self>, sink: Arc<dyn NotificationSink>, failer: Arc<dyn StreamFailer>) {
    loop {
      if self.shutdown.load(Ordering::Acquire) {
        return;
      }
      let _ = self.running_state.send(RunningState::Connecting);

      match spawn_codex(&self.config) {
        Ok(mut process) => {
          let peer = RawPeer::new(process.stdin, self.config.rpc_timeout);
          let pid = process.child.id();
          *self.peer.lock() = Some(peer.clone());
          *self.pid.lock() = pid;
          *self.started_at.lock() = Some(Instant::now());
          if let Some(pid) = pid {
            let _ = self.running_state.send(RunningState::Running { pid });
          }
          info!("[codex] started {} (pid {:?})", self.config.bin, pid);

          let reader = tokio::spawn(read_loop(process.stdout, peer.clone(), sink.clone()));
          // run the handshake concurrently so a child dying mid-initialize
          // cannot stall the restart loop for a whole rpc timeout
          let handshake = tokio::spawn({
            let supervisor = self.clone();
            let peer = peer.clone();
            async move { supervisor.handshake(&peer).await }
          });

          let status = process.child.wait().await;
          handshake.abort();
          reader.abort();
          if let Ok(read_err) = reader.await {
            trace!("[codex] read loop ended: {}", read_err);
          }

          let message = exit_message(status);
          *self.peer.lock() = None;
          *self.pid.lock() = None;
          *self.started_at.lock() = None;
          let _ = self.running_state.send(RunningState::UnexpectedStop);

          error!("[codex] {}", message);
          peer.fail_all(&message);
          failer.fail_all_streams(&message);
        },
        Err(err) => {
          let message = format!("codex spawn error: {}", err);
          error!("[codex] {}", message);
          let _ = self.running_state.send(RunningState::UnexpectedStop);
          failer.fail_all_streams(&message);
        },
      }

      if self.shutdown.load(Ordering::Acquire) {
        return;
      }
      let restarts = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
      let backoff = Duration::from_millis((1000 * restarts).min(MAX_BACKOFF_MS));
      info!("[codex] restart #{} in {:?}", restarts, backoff);
      sleep(backoff).await;
    }
  }

  /// MCP requires `initialize` + `notifications/initialized` before any
  /// tool call. A failed handshake is logged but does not abort the child;
  /// if the process is genuinely broken it will exit and be restarted.
  async fn handshake(&self, peer: &RawPeer) {
    let params = json!({
      "protocolVersion": MCP_PROTOCOL_VERSION,
      "capabilities": {},
      "clientInfo": {
        "name": "codex-openai-bridge",
        "version": env!("CARGO_PKG_VERSION"),
      },
    });
    match peer.rpc("initialize", params).await {
      Ok(result) => {
        trace!("[codex] initialize result: {}", result);
        peer.send_rpc_notification("notifications/initialized", json!({})).await;
      },
      Err(err) => warn!("[codex] initialize failed: {}", err),
    }
  }

  pub fn current_peer(&self) -> Result<RawPeer, BridgeError> {
    self.peer.lock().clone().ok_or(BridgeError::UpstreamUnavailable)
  }

  pub async fn rpc(&self, method: &str, params: JsonValue) -> Result<JsonValue, BridgeError> {
    self.current_peer()?.rpc(method, params).await
  }

  pub async fn rpc_with_id(
    &self,
    method: &str,
    params: JsonValue,
    id: String,
  ) -> Result<JsonValue, BridgeError> {
    self.current_peer()?.rpc_with_id(method, params, id).await
  }

  pub fn subscribe_running_state(&self) -> WatchStream<RunningState> {
    WatchStream::new(self.running_state.subscribe())
  }

  pub fn running_state(&self) -> RunningState {
    self.running_state.borrow().clone()
  }

  pub fn status(&self, active_streams: usize) -> CodexStatus {
    CodexStatus {
      pid: *self.pid.lock(),
      restarts: self.restarts.load(Ordering::SeqCst),
      uptime_secs: self
        .started_at
        .lock()
        .map(|t| t.elapsed().as_secs())
        .unwrap_or(0),
      pending_rpcs: self
        .peer
        .lock()
        .as_ref()
        .map(|p| p.pending_count())
        .unwrap_or(0),
      active_streams,
    }
  }

  /// Stops respawning. The current child (if any) is reaped on drop.
  pub fn shutdown(&self) {
    self.shutdown.store(true, Ordering::Release);
  }
}

fn exit_message(status: io::Result<ExitStatus>) -> String {
  match status {
    Ok(status) => {
      let code = status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
      let signal = exit_signal(&status)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string());
      format!("codex exited (code {}, signal {})", code, signal)
    },
    Err(err) => format!("codex exited (wait error: {})", err),
  }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
  use std::os::unix::process::ExitStatusExt;
  status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
  None
}
