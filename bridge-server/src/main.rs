use anyhow::Result;
use bridge_engine::BridgeEngine;
use bridge_server::config::Config;
use bridge_server::routes::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
  // stdout stays clean; diagnostics are stderr-only
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let config = Arc::new(Config::from_env());
  let engine = BridgeEngine::new(config.engine_config());
  engine.start();

  let state = AppState {
    engine: engine.clone(),
    config: config.clone(),
  };
  let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
  let listener = tokio::net::TcpListener::bind(addr).await?;
  info!(
    "codex-openai-bridge listening on {} (model {})",
    addr, config.model_id
  );

  axum::serve(listener, bridge_server::build_router(state))
    .with_graceful_shutdown(shutdown_signal(engine))
    .await?;
  Ok(())
}

async fn shutdown_signal(engine: Arc<BridgeEngine>) {
  if tokio::signal::ctrl_c().await.is_ok() {
    info!("shutting down");
  }
  engine.shutdown();
}
