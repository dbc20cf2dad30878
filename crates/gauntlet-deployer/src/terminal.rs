use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gauntlet_common::{now_ms, ClientFrame, ErrorKind, ServerFrame};
use gauntlet_kube::{ClusterGateway, TerminalSize};

/// Sessions idle longer than this are reaped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const DEFAULT_SHELL: &str = "/bin/bash";
const FALLBACK_SHELL: &str = "/bin/sh";

/// Control byte a TTY understands for a named signal.
fn signal_byte(name: &str) -> Option<u8> {
    match name {
        "SIGINT" | "INT" => Some(0x03),
        "SIGQUIT" | "QUIT" => Some(0x1c),
        "SIGTSTP" | "TSTP" => Some(0x1a),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub job_name: String,
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub shell: String,
    pub is_active: bool,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
}

struct SessionEntry {
    job_name: String,
    namespace: String,
    pod_name: String,
    container_name: String,
    shell: String,
    created_at_ms: u64,
    last_activity_ms: AtomicU64,
    /// One client per session; a second connect is refused.
    connected: AtomicBool,
    cancel: CancellationToken,
}

/// Registry plus bridge between client WebSockets and container exec
/// channels. Sessions live only in this process and die with it.
pub struct TerminalBroker {
    gateway: ClusterGateway,
    sessions: DashMap<String, Arc<SessionEntry>>,
    shutdown: CancellationToken,
}

impl TerminalBroker {
    pub fn new(gateway: ClusterGateway, shutdown: CancellationToken) -> Self {
        Self {
            gateway,
            sessions: DashMap::new(),
            shutdown,
        }
    }

    /// Resolve the job's pod and register a session. The exec channel is
    /// opened lazily when the client connects.
    pub async fn create_session(
        &self,
        job_name: &str,
        namespace: &str,
        pod_name: Option<&str>,
        container_name: Option<&str>,
        shell: Option<&str>,
    ) -> Result<SessionInfo, ErrorKind> {
        let pods = self.gateway.job_pods(namespace, job_name).await?;
        let pod = match pod_name {
            Some(requested) => pods
                .iter()
                .find(|p| p.name == requested)
                .ok_or_else(|| ErrorKind::NotFound(format!("pod {requested}")))?,
            None => pods
                .iter()
                .find(|p| p.phase == "Running")
                .or_else(|| pods.first())
                .ok_or_else(|| ErrorKind::NotFound(format!("no pods for job {job_name}")))?,
        };
        let container = match container_name {
            Some(c) => c.to_string(),
            None => pod
                .containers
                .first()
                .cloned()
                .ok_or_else(|| ErrorKind::NotFound(format!("no containers in pod {}", pod.name)))?,
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        let entry = Arc::new(SessionEntry {
            job_name: job_name.to_string(),
            namespace: namespace.to_string(),
            pod_name: pod.name.clone(),
            container_name: container,
            shell: shell.unwrap_or(DEFAULT_SHELL).to_string(),
            created_at_ms: now,
            last_activity_ms: AtomicU64::new(now),
            connected: AtomicBool::new(false),
            cancel: self.shutdown.child_token(),
        });
        self.sessions.insert(session_id.clone(), entry.clone());

        info!(session_id, job_name, pod = %entry.pod_name, "terminal session created");
        Ok(self.info(&session_id, &entry))
    }

    fn info(&self, session_id: &str, entry: &SessionEntry) -> SessionInfo {
        SessionInfo {
            session_id: session_id.to_string(),
            job_name: entry.job_name.clone(),
            namespace: entry.namespace.clone(),
            pod_name: entry.pod_name.clone(),
            container_name: entry.container_name.clone(),
            shell: entry.shell.clone(),
            is_active: entry.connected.load(Ordering::Relaxed),
            created_at_ms: entry.created_at_ms,
            last_activity_ms: entry.last_activity_ms.load(Ordering::Relaxed),
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions
            .get(session_id)
            .map(|e| self.info(session_id, &e))
    }

    pub fn list_sessions(&self, job_name: Option<&str>) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .filter(|e| job_name.map_or(true, |j| e.value().job_name == j))
            .map(|e| self.info(e.key(), e.value()))
            .collect()
    }

    /// Cancel the bridge (if attached) and drop the session.
    pub fn close_session(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                info!(session_id, "terminal session closed");
                true
            }
            None => false,
        }
    }

    pub fn close_job_sessions(&self, job_name: &str) -> usize {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().job_name == job_name)
            .map(|e| e.key().clone())
            .collect();
        for id in &ids {
            self.close_session(id);
        }
        ids.len()
    }

    /// Reap idle sessions every minute.
    pub async fn run_reaper(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
            }
            let now = now_ms();
            let stale: Vec<String> = self
                .sessions
                .iter()
                .filter(|e| {
                    now.saturating_sub(e.value().last_activity_ms.load(Ordering::Relaxed))
                        > IDLE_TIMEOUT.as_millis() as u64
                })
                .map(|e| e.key().clone())
                .collect();
            for id in stale {
                info!(session_id = %id, "reaping idle terminal session");
                self.close_session(&id);
            }
        }
    }

    /// Attach one client to the session and run the bridge until either
    /// side closes. A second client on the same session is refused.
    pub async fn attach(&self, session_id: &str, socket: WebSocket) {
        let entry = match self.sessions.get(session_id) {
            Some(e) => e.value().clone(),
            None => {
                refuse(socket, "unknown session").await;
                return;
            }
        };
        if entry.connected.swap(true, Ordering::SeqCst) {
            refuse(socket, "session already has a client").await;
            return;
        }

        let result = self.bridge(&entry, socket).await;
        entry.connected.store(false, Ordering::SeqCst);

        // The exec channel is gone either way; the session is done.
        self.sessions.remove(session_id);
        match result {
            Ok(()) => debug!(session_id, "terminal bridge finished"),
            Err(e) => warn!(session_id, error = %e, "terminal bridge failed"),
        }
    }

    async fn bridge(&self, entry: &SessionEntry, socket: WebSocket) -> Result<(), ErrorKind> {
        let (mut ws_tx, mut ws_rx) = socket.split();

        // Requested shell first, /bin/sh when the image lacks it.
        let exec = |shell: String| {
            self.gateway.exec(
                &entry.namespace,
                &entry.pod_name,
                Some(&entry.container_name),
                vec![shell],
                true,
            )
        };
        let mut attached = match exec(entry.shell.clone()).await {
            Ok(a) => a,
            Err(first_err) => {
                let fallback = if entry.shell != FALLBACK_SHELL {
                    exec(FALLBACK_SHELL.to_string()).await
                } else {
                    Err(first_err)
                };
                match fallback {
                    Ok(a) => a,
                    Err(e) => {
                        send_frame(
                            &mut ws_tx,
                            &ServerFrame::Error {
                                message: format!("exec failed: {e}"),
                            },
                        )
                        .await;
                        return Err(e);
                    }
                }
            }
        };

        let mut stdin = attached.stdin();
        let mut resize_tx = attached.terminal_size();
        let stdout = attached.stdout();

        // Pump container output into a channel (lattice's reader-task shape).
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(64);
        let reader_task = stdout.map(|mut reader| {
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if out_tx.send(buf[..n].to_vec()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            })
        });
        drop(out_tx);

        let cancel = entry.cancel.clone();
        let mut close_reason = "session ended".to_string();
        let mut close_code: u16 = 1000;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    close_reason = if self.shutdown.is_cancelled() {
                        "server shutdown".to_string()
                    } else {
                        "session closed".to_string()
                    };
                    break;
                }

                msg = ws_rx.next() => {
                    entry.last_activity_ms.store(now_ms(), Ordering::Relaxed);
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientFrame>(&text) {
                                Ok(ClientFrame::Input { data }) => {
                                    if let Some(w) = stdin.as_mut() {
                                        if w.write_all(data.as_bytes()).await.is_err() {
                                            break;
                                        }
                                        let _ = w.flush().await;
                                    }
                                }
                                Ok(ClientFrame::Resize { rows, cols }) => {
                                    if let Some(tx) = resize_tx.as_mut() {
                                        let _ = tx.send(TerminalSize { height: rows, width: cols }).await;
                                    }
                                }
                                Ok(ClientFrame::Signal { data }) => {
                                    if let (Some(byte), Some(w)) = (signal_byte(&data), stdin.as_mut()) {
                                        let _ = w.write_all(&[byte]).await;
                                        let _ = w.flush().await;
                                    }
                                }
                                Err(e) => {
                                    send_frame(&mut ws_tx, &ServerFrame::Error {
                                        message: format!("bad frame: {e}"),
                                    }).await;
                                }
                            }
                        }
                        // Binary frames are raw stdin bytes.
                        Some(Ok(Message::Binary(data))) => {
                            if let Some(w) = stdin.as_mut() {
                                if w.write_all(&data).await.is_err() {
                                    break;
                                }
                                let _ = w.flush().await;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            close_reason = "client disconnected".to_string();
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) => {
                            close_code = 1011;
                            close_reason = "client stream error".to_string();
                            break;
                        }
                    }
                }

                chunk = out_rx.recv() => {
                    match chunk {
                        Some(bytes) => {
                            let frame = ServerFrame::Output {
                                data: String::from_utf8_lossy(&bytes).into_owned(),
                            };
                            if !send_frame(&mut ws_tx, &frame).await {
                                break;
                            }
                        }
                        None => {
                            close_reason = "shell exited".to_string();
                            break;
                        }
                    }
                }
            }
        }

        if let Some(task) = reader_task {
            task.abort();
        }
        drop(stdin);

        send_frame(
            &mut ws_tx,
            &ServerFrame::Closed {
                reason: close_reason.clone(),
            },
        )
        .await;
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_code,
                reason: close_reason.into(),
            })))
            .await;
        Ok(())
    }
}

async fn send_frame(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => ws_tx.send(Message::Text(text)).await.is_ok(),
        Err(_) => false,
    }
}

async fn refuse(socket: WebSocket, reason: &str) {
    let (mut tx, _) = socket.split();
    send_frame(
        &mut tx,
        &ServerFrame::Error {
            message: reason.to_string(),
        },
    )
    .await;
    let _ = tx
        .send(Message::Close(Some(CloseFrame {
            code: 1011,
            reason: reason.to_string().into(),
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_bytes() {
        assert_eq!(signal_byte("SIGINT"), Some(0x03));
        assert_eq!(signal_byte("INT"), Some(0x03));
        assert_eq!(signal_byte("SIGQUIT"), Some(0x1c));
        assert_eq!(signal_byte("SIGKILL"), None);
    }
}
