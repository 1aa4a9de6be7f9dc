//! Integration tests for the callwire-rpc binary.
//!
//! These tests start `callwire-rpc serve` as a child process, read the port
//! it announces on stdout, and talk to it with both the library client and
//! the binary's own `call` subcommand.

use callwire_core::{
    CallwireError, ClientConfig, ClientSession, RemoteProxy, SessionState, TcpTransport,
};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

const TOKEN: &str = "integration-token";

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_callwire-rpc"))
}

struct RpcServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start the binary and wait for its `RPC_PORT=` line.
async fn start_rpc_server(extra: &[&str]) -> Result<RpcServerHandle, String> {
    let mut child = tokio::process::Command::new(binary())
        .args(extra)
        .arg("serve")
        .arg("--bind")
        .arg("127.0.0.1:0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn callwire-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("RPC_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid RPC_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read callwire-rpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port =
        discovered_port.ok_or_else(|| "RPC_PORT line not emitted by callwire-rpc".to_string())?;
    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(RpcServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

#[tokio::test]
async fn test_library_client_against_binary() {
    let server = start_rpc_server(&["--token", TOKEN]).await.unwrap();

    let session = ClientSession::new(
        Arc::new(TcpTransport::client(server.address())),
        ClientConfig::new().with_authorization_token(TOKEN),
    );
    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);

    let proxy = RemoteProxy::new(session.clone());
    let sum: i64 = proxy.call("Add", (20i64, 22i64)).await.unwrap();
    assert_eq!(sum, 42);
    let echoed: String = proxy.call("Echo", ("hello".to_string(),)).await.unwrap();
    assert_eq!(echoed, "hello");

    session.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_wrong_token_is_rejected_by_binary() {
    let server = start_rpc_server(&["--token", TOKEN]).await.unwrap();

    let session = ClientSession::new(
        Arc::new(TcpTransport::client(server.address())),
        ClientConfig::new().with_authorization_token("nope"),
    );
    let result = session.connect().await;
    assert!(matches!(result, Err(CallwireError::Unauthorized { .. })), "got {:?}", result);

    server.stop().await;
}

#[tokio::test]
async fn test_call_subcommand_prints_result() {
    let server = start_rpc_server(&["--msgpack", "--no-encryption"]).await.unwrap();

    let output = tokio::process::Command::new(binary())
        .args(["--msgpack", "--no-encryption", "call", "--connect"])
        .arg(server.address())
        .args(["--add", "2", "3"])
        .stderr(Stdio::null())
        .output()
        .await
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "5");

    server.stop().await;
}
