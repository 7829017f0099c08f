use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::info;

/// How the codex child is launched and how long a single RPC may take.
#[derive(Debug, Clone)]
pub struct CodexConfig {
  /// Binary name or path. Defaults to `codex`.
  pub bin: String,
  /// Value for `--profile`; `None` omits the flag.
  pub profile: Option<String>,
  pub rpc_timeout: Duration,
}

impl Default for CodexConfig {
  fn default() -> Self {
    CodexConfig {
      bin: "codex".to_string(),
      profile: Some("clean".to_string()),
      rpc_timeout: Duration::from_millis(120_000),
    }
  }
}

pub struct CodexProcess {
  pub child: Child,
  pub stdin: ChildStdin,
  pub stdout: ChildStdout,
}

/// Spawns `<bin> --disable rmcp_client [--profile <profile>] mcp-server`
/// with piped stdio. Stderr is forwarded line-by-line to the log; stdout is
/// protocol and is handed to the read loop untouched.
pub fn spawn_codex(config: &CodexConfig) -> io::Result<CodexProcess> {
  let mut cmd = Command::new(&config.bin);
  cmd.args(["--disable", "rmcp_client"]);
  if let Some(profile) = &config.profile {
    cmd.args(["--profile", profile]);
  }
  cmd.arg("mcp-server");
  cmd
    .stdin(Stdio::piped())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  let mut child = cmd.spawn()?;
  let stdin = child
    .stdin
    .take()
    .ok_or_else(|| io::Error::other("failed to capture codex stdin"))?;
  let stdout = child
    .stdout
    .take()
    .ok_or_else(|| io::Error::other("failed to capture codex stdout"))?;
  let stderr = child
    .stderr
    .take()
    .ok_or_else(|| io::Error::other("failed to capture codex stderr"))?;

  tokio::spawn(async move {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      info!("[codex] {}", line);
    }
  });

  Ok(CodexProcess {
    child,
    stdin,
    stdout,
  })
}
