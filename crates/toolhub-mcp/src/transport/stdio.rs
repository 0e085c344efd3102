//! Subprocess transport: newline-delimited JSON over the child's stdio.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use toolhub_core::StdioConfig;

use super::{EventSink, Transport, TransportError, TransportEvent};

/// Host variables passed through to every server, as a login shell would.
#[cfg(unix)]
const INHERITED_ENV: &[&str] = &["HOME", "LOGNAME", "SHELL", "TERM", "USER"];

#[cfg(windows)]
const INHERITED_ENV: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

#[cfg(not(any(unix, windows)))]
const INHERITED_ENV: &[&str] = &[];

pub struct StdioTransport {
    name: String,
    config: StdioConfig,
    stdin: Mutex<Option<ChildStdin>>,
    opened: AtomicBool,
    shutdown: CancellationToken,
}

impl StdioTransport {
    pub fn new(name: impl Into<String>, config: StdioConfig) -> Self {
        Self {
            name: name.into(),
            config,
            stdin: Mutex::new(None),
            opened: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Child environment: a few host basics, then the configured env, then
    /// the host's search path so bare command names resolve.
    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for key in INHERITED_ENV {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
        cmd.envs(&self.config.env);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn open(&self, events: EventSink) -> Result<(), TransportError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::debug!(
            server_name = %self.name,
            command = %self.config.command,
            args = ?self.config.args,
            "Starting MCP stdio server"
        );

        let mut child = self
            .build_command()
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {e}", self.config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("Unable to retrieve stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("Unable to retrieve stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Spawn("Unable to retrieve stderr".to_string()))?;

        *self.stdin.lock().await = Some(stdin);

        let stdout_events = events.clone();
        let name = self.name.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(Value::Array(batch)) => {
                        for message in batch {
                            let _ = stdout_events.send(TransportEvent::Message(message));
                        }
                    }
                    Ok(message) => {
                        let _ = stdout_events.send(TransportEvent::Message(message));
                    }
                    Err(e) => {
                        tracing::debug!(server_name = %name, error = %e, "Ignoring non-JSON stdout line");
                    }
                }
            }
        });

        let stderr_events = events.clone();
        let drain = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    let _ = stderr_events.send(TransportEvent::Stderr(line));
                }
            }
        });

        let shutdown = self.shutdown.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    // Let buffered output drain so it precedes the close.
                    let _ = reader.await;
                    let _ = drain.await;
                    match status {
                        Ok(status) => tracing::info!(server_name = %name, %status, "MCP server process exited"),
                        Err(e) => tracing::warn!(server_name = %name, error = %e, "Failed to wait on MCP server process"),
                    }
                    let _ = events.send(TransportEvent::Closed);
                }
                () = shutdown.cancelled() => {
                    if let Err(e) = child.kill().await {
                        tracing::debug!(server_name = %name, error = %e, "MCP server process already gone");
                    }
                }
            }
        });

        Ok(())
    }

    async fn send(&self, message: Value) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::NotOpen)?;

        let mut line =
            serde_json::to_string(&message).map_err(|e| TransportError::Send(e.to_string()))?;
        line.push('\n');

        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        self.stdin.lock().await.take();
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn sh(script: &str) -> StdioTransport {
        StdioTransport::new(
            "test",
            StdioConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                env: BTreeMap::from([("GREETING".to_string(), "hello".to_string())]),
            },
        )
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_stdout_json_and_stderr_lines() {
        let transport = sh(r#"echo "$GREETING" >&2; echo '{"jsonrpc":"2.0","method":"x"}'"#);
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        let mut saw_stderr = false;
        let mut saw_message = false;
        loop {
            match next(&mut rx).await {
                TransportEvent::Stderr(line) => {
                    assert_eq!(line, "hello");
                    saw_stderr = true;
                }
                TransportEvent::Message(msg) => {
                    assert_eq!(msg["method"], "x");
                    saw_message = true;
                }
                TransportEvent::Closed => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(saw_message);
        assert!(saw_stderr);
    }

    #[tokio::test]
    async fn test_second_open_is_noop() {
        let transport = sh("cat");
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.open(tx.clone()).await.unwrap();
        transport.open(tx).await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_echo_round_trip_through_cat() {
        let transport = sh("cat");
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        transport
            .send(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
            .await
            .unwrap();
        match next(&mut rx).await {
            TransportEvent::Message(msg) => assert_eq!(msg["id"], 1),
            other => panic!("unexpected event {other:?}"),
        }
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let transport = StdioTransport::new(
            "missing",
            StdioConfig {
                command: "definitely-not-a-real-binary-4471".to_string(),
                args: vec![],
                env: BTreeMap::new(),
            },
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = transport.open(tx).await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_send_before_open() {
        let transport = sh("cat");
        let err = transport.send(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
    }
}
