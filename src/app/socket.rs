//! Control socket of a running archive.
//!
//! Line-delimited JSON over a Unix socket in the store directory: one
//! request per line, one response line each.

use crate::archive::{Archiver, ArchiverStatus};
use crate::shutdown::ShutdownController;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

pub fn is_socket_available(path: &Path) -> bool {
    path.exists()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SocketRequest {
    Ping,
    Status,
    /// Finish queued work, then exit.
    Stop,
    /// Exit as soon as possible, dropping queued work.
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl SocketResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            status: None,
        }
    }

    pub fn ok_with_status(status: &ArchiverStatus) -> Self {
        match serde_json::to_value(status) {
            Ok(value) => Self {
                status: Some(value),
                ..Self::ok()
            },
            Err(e) => Self::err(&e.to_string()),
        }
    }

    pub fn err(msg: &str) -> Self {
        Self {
            ok: false,
            error: Some(msg.to_string()),
            status: None,
        }
    }
}

/// Whatever can report the state of a running archive.
pub trait StatusSource: Send + Sync {
    fn status(&self) -> ArchiverStatus;
}

impl StatusSource for Archiver {
    fn status(&self) -> ArchiverStatus {
        Archiver::status(self)
    }
}

pub async fn send_request(path: &Path, req: &SocketRequest) -> Result<SocketResponse> {
    let mut stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("No archive is listening on {}", path.display()))?;

    let json = serde_json::to_string(req)? + "\n";
    stream.write_all(json.as_bytes()).await?;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let resp: SocketResponse = serde_json::from_str(&line)
        .with_context(|| format!("Invalid response from socket: {}", line.trim()))?;
    Ok(resp)
}

/// Removes the socket file when the server goes away.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Serve requests until the task is dropped or aborted.
pub async fn run_server(
    path: PathBuf,
    source: Arc<dyn StatusSource>,
    shutdown: ShutdownController,
) -> Result<()> {
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)
        .with_context(|| format!("Failed to bind socket {}", path.display()))?;
    let _file = SocketFile(path.clone());
    log::info!("Socket server listening at {}", path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let source = Arc::clone(&source);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, source, shutdown).await {
                log::error!("Socket connection error: {}", e);
            }
        });
    }
}

fn respond(req: &str, source: &dyn StatusSource, shutdown: &ShutdownController) -> SocketResponse {
    match serde_json::from_str::<SocketRequest>(req) {
        Ok(SocketRequest::Ping) => SocketResponse::ok(),
        Ok(SocketRequest::Status) => SocketResponse::ok_with_status(&source.status()),
        Ok(SocketRequest::Stop) => {
            log::info!("Stop requested over socket");
            shutdown.trigger();
            SocketResponse::ok()
        }
        Ok(SocketRequest::Abort) => {
            log::warn!("Abort requested over socket");
            shutdown.abort();
            SocketResponse::ok()
        }
        Err(e) => SocketResponse::err(&format!("invalid request: {}", e)),
    }
}

async fn handle_connection(
    stream: UnixStream,
    source: Arc<dyn StatusSource>,
    shutdown: ShutdownController,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let resp = respond(line.trim(), &*source, &shutdown);
        let json = serde_json::to_string(&resp)? + "\n";
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
        line.clear();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl StatusSource for Idle {
        fn status(&self) -> ArchiverStatus {
            ArchiverStatus {
                shutting_down: false,
                aborted: false,
                subsystems: Vec::new(),
                refresh_cache_messages: 4,
                refresh_windows: 1,
                invalid_sticker_sets: 0,
                runs: Vec::new(),
            }
        }
    }

    #[test]
    fn requests_use_action_tags() {
        let json = serde_json::to_string(&SocketRequest::Status).expect("serialize");
        assert_eq!(json, r#"{"action":"status"}"#);
        let parsed: SocketRequest = serde_json::from_str(r#"{"action":"abort"}"#).expect("parse");
        assert_eq!(parsed, SocketRequest::Abort);
    }

    #[test]
    fn bad_requests_get_an_error_line() {
        let shutdown = ShutdownController::new();
        let resp = respond(r#"{"action":"send_text"}"#, &Idle, &shutdown);
        assert!(!resp.ok);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn status_and_stop_over_the_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.sock");
        let shutdown = ShutdownController::new();
        let server = tokio::spawn(run_server(path.clone(), Arc::new(Idle), shutdown.clone()));
        while !is_socket_available(&path) {
            tokio::task::yield_now().await;
        }

        let ping = send_request(&path, &SocketRequest::Ping).await.expect("ping");
        assert!(ping.ok);
        let status = send_request(&path, &SocketRequest::Status)
            .await
            .expect("status");
        let status = status.status.expect("status payload");
        assert_eq!(status["refresh_cache_messages"], 4);

        let stop = send_request(&path, &SocketRequest::Stop).await.expect("stop");
        assert!(stop.ok);
        assert!(shutdown.is_triggered());
        assert!(!shutdown.is_aborted());

        server.abort();
        let _ = server.await;
        assert!(!is_socket_available(&path));
    }
}
