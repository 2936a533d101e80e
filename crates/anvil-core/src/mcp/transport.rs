//! Stdio transport for provider processes.
//!
//! One JSON object per line in each direction. The provider's stderr is
//! drained into diagnostics and never treated as a bridge failure.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

pub struct StdioTransport {
    name: String,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Spawn a provider process with piped stdio.
    pub async fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Self> {
        tracing::info!(provider = name, command, ?args, "Spawning tool provider");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(working_dir)
            .kill_on_drop(true);

        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow!("command not found: {}. Is it installed and in PATH?", command)
            } else {
                anyhow!("failed to spawn {}: {}", command, e)
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;

        // Drain stderr for diagnostics; provider chatter must never surface
        // as a bridge failure.
        if let Some(stderr) = child.stderr.take() {
            let provider = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(provider = %provider, "stderr: {}", line);
                }
            });
        }

        Ok(Self {
            name: name.to_string(),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
        })
    }

    /// Send one newline-delimited JSON message.
    pub async fn send(&self, message: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        tracing::trace!(provider = %self.name, "sent: {}", message);
        Ok(())
    }

    /// Receive the next JSON line, skipping non-JSON noise.
    pub async fn receive(&self) -> Result<String> {
        let mut stdout = self.stdout.lock().await;

        loop {
            let mut line = String::new();
            let bytes = stdout.read_line(&mut line).await?;

            if bytes == 0 {
                let mut child = self.child.lock().await;
                return match child.try_wait() {
                    Ok(Some(status)) => Err(anyhow!("provider exited with {}", status)),
                    Ok(None) => Err(anyhow!("provider closed stdout unexpectedly")),
                    Err(e) => Err(anyhow!("error checking provider status: {}", e)),
                };
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('{') {
                tracing::trace!(provider = %self.name, "received: {}", line);
                return Ok(line.to_string());
            }

            tracing::debug!(provider = %self.name, "skipping non-JSON line: {}", line);
        }
    }

    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    /// Terminate the provider process.
    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::debug!(provider = %self.name, "kill failed: {}", e);
        }
        let _ = child.wait().await;
    }
}
