use bridge_engine::EngineConfig;
use bridge_rpc::core::process::CodexConfig;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Environment-derived startup configuration. Parsed once and threaded
/// through constructors; nothing reads the environment after boot.
#[derive(Debug, Clone)]
pub struct Config {
  pub port: u16,
  pub model_id: String,
  pub codex_bin: String,
  /// `CODEX_PROFILE`; an empty value omits the `--profile` flag.
  pub codex_profile: Option<String>,
  pub rpc_timeout_ms: u64,
  pub sse_keepalive_ms: u64,
  pub stream_chunk_chars: i64,
  pub hard_request_timeout_ms: u64,
  /// Unset disables authentication entirely.
  pub api_key: Option<String>,
  pub api_key_header: String,
  pub require_bearer: bool,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      port: 8000,
      model_id: "codex-mcp".to_string(),
      codex_bin: "codex".to_string(),
      codex_profile: Some("clean".to_string()),
      rpc_timeout_ms: 120_000,
      sse_keepalive_ms: 15_000,
      stream_chunk_chars: 0,
      hard_request_timeout_ms: 600_000,
      api_key: None,
      api_key_header: "authorization".to_string(),
      require_bearer: true,
    }
  }
}

impl Config {
  pub fn from_env() -> Config {
    let mut config = Config::default();
    if let Some(port) = env_parse("PORT") {
      config.port = port;
    }
    if let Some(model_id) = env_var("MODEL_ID") {
      config.model_id = model_id;
    }
    if let Some(bin) = env_var("CODEX_BIN") {
      config.codex_bin = bin;
    }
    if let Ok(profile) = std::env::var("CODEX_PROFILE") {
      let profile = profile.trim().to_string();
      config.codex_profile = (!profile.is_empty()).then_some(profile);
    }
    if let Some(ms) = env_parse("RPC_TIMEOUT_MS") {
      config.rpc_timeout_ms = ms;
    }
    if let Some(ms) = env_parse("SSE_KEEPALIVE_MS") {
      config.sse_keepalive_ms = ms;
    }
    if let Some(chars) = env_parse("STREAM_CHUNK_CHARS") {
      config.stream_chunk_chars = chars;
    }
    if let Some(ms) = env_parse("HARD_REQUEST_TIMEOUT_MS") {
      config.hard_request_timeout_ms = ms;
    }
    config.api_key = env_var("API_KEY");
    if let Some(header) = env_var("API_KEY_HEADER") {
      config.api_key_header = header.to_ascii_lowercase();
    }
    config.require_bearer = match env_bool("REQUIRE_BEARER") {
      Some(value) => value,
      // bearer framing only makes sense on the standard header
      None => config.api_key_header == "authorization",
    };
    config
  }

  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      model_id: self.model_id.clone(),
      codex: CodexConfig {
        bin: self.codex_bin.clone(),
        profile: self.codex_profile.clone(),
        rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
      },
      sse_keepalive: Duration::from_millis(self.sse_keepalive_ms),
      hard_request_timeout: Duration::from_millis(self.hard_request_timeout_ms),
      stream_chunk_chars: self.stream_chunk_chars,
    }
  }
}

fn env_var(name: &str) -> Option<String> {
  std::env::var(name)
    .ok()
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
  let raw = env_var(name)?;
  match raw.parse() {
    Ok(value) => Some(value),
    Err(_) => {
      warn!("ignoring unparsable {}={}", name, raw);
      None
    },
  }
}

fn env_bool(name: &str) -> Option<bool> {
  let raw = env_var(name)?.to_ascii_lowercase();
  Some(matches!(raw.as_str(), "1" | "true" | "yes" | "on"))
}
