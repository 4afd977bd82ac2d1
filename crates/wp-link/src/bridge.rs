//! Child-process bridge to the messaging library
//!
//! Every session gets its own bridge process, so a crash inside the library
//! only takes down that session. The process is started as
//! `<command> <args...> --auth-dir <dir>` and speaks newline-delimited JSON:
//!
//! ```text
//! stdin   {"id":1,"op":"request_pairing_code","phone":"14155550123"}
//!         {"id":2,"op":"send_text","jid":"14155550123@s.whatsapp.net","text":"..."}
//!         {"id":3,"op":"logout"}
//! stdout  {"id":1,"ok":true,"result":"ABCD1234"}
//!         {"id":2,"ok":false,"error":"not connected"}
//!         {"event":"connection","state":"close","statusCode":515}
//!         {"event":"qr","data":"2@..."}
//!         {"event":"creds","data":{...}}
//! ```
//!
//! stderr is treated as the library's log output.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use wp_core::{BridgeConfig, Error, PhoneNumber, Result};

use crate::client::{DisconnectReason, LinkClient, LinkConnection, LinkConnector, LinkEvent};

/// Buffered events between the reader task and the worker
const EVENT_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeReply>>>>;

/// Request sent to the bridge (without the correlation id)
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeOp<'a> {
    RequestPairingCode { phone: &'a str },
    SendText { jid: &'a str, text: &'a str },
    Logout,
}

impl BridgeOp<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::RequestPairingCode { .. } => "request_pairing_code",
            Self::SendText { .. } => "send_text",
            Self::Logout => "logout",
        }
    }
}

/// Reply to a request, matched by `id`
#[derive(Debug, Deserialize)]
struct BridgeReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: JsonValue,
    #[serde(default)]
    error: Option<String>,
}

/// Unsolicited event from the library
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    Connection {
        state: String,
        #[serde(default, rename = "statusCode")]
        status_code: Option<u16>,
    },
    Qr {
        data: String,
    },
    Creds {
        data: JsonValue,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeLine {
    Reply(BridgeReply),
    Event(BridgeEvent),
}

fn encode_request(id: u64, op: &BridgeOp<'_>) -> Result<String> {
    let mut value = serde_json::to_value(op)?;
    value["id"] = JsonValue::from(id);
    Ok(serde_json::to_string(&value)?)
}

fn parse_line(line: &str) -> Result<BridgeLine> {
    Ok(serde_json::from_str(line)?)
}

impl BridgeEvent {
    fn into_link_event(self) -> Option<LinkEvent> {
        match self {
            Self::Connection { state, status_code } => match state.as_str() {
                "connecting" => Some(LinkEvent::Connecting),
                "open" => Some(LinkEvent::Open),
                "close" => Some(LinkEvent::Close {
                    reason: DisconnectReason::from_status_code(status_code),
                }),
                other => {
                    debug!("Ignoring bridge connection state {:?}", other);
                    None
                }
            },
            Self::Qr { data } => Some(LinkEvent::Qr(data)),
            Self::Creds { data } => {
                let registered = data
                    .get("registered")
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false);
                Some(LinkEvent::CredsUpdate {
                    creds: data,
                    registered,
                })
            }
        }
    }
}

/// Spawns one bridge process per session
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    config: BridgeConfig,
}

impl BridgeConnector {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LinkConnector for BridgeConnector {
    async fn connect(&self, auth_dir: &Path) -> Result<LinkConnection> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg("--auth-dir")
            .arg(auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Link(format!(
                    "Failed to start bridge `{}`: {}",
                    self.config.command, e
                ))
            })?;

        let pid = child.id().unwrap_or_default();
        info!("Started bridge process {} for {}", pid, auth_dir.display());

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Link("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Link("bridge stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "wp_link::bridge::stderr", "[bridge {}] {}", pid, line);
                }
            });
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Bridge {} stdout error: {}", pid, e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                match parse_line(&line) {
                    Ok(BridgeLine::Reply(reply)) => {
                        let waiter = reader_pending.lock().await.remove(&reply.id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(reply);
                            }
                            None => debug!("Bridge reply for unknown request {}", reply.id),
                        }
                    }
                    Ok(BridgeLine::Event(event)) => {
                        if let Some(event) = event.into_link_event() {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => warn!("Unparseable bridge output {:?}: {}", line, e),
                }
            }

            // Dropping the senders fails every outstanding request
            reader_pending.lock().await.clear();
            debug!("Bridge {} output closed", pid);
        });

        let client = BridgeClient {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: self.config.request_timeout(),
            reader: reader.abort_handle(),
        };

        Ok(LinkConnection {
            client: Box::new(client),
            events: event_rx,
        })
    }
}

/// Client half of a running bridge process
struct BridgeClient {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: AbortHandle,
}

impl BridgeClient {
    async fn request(&self, op: BridgeOp<'_>) -> Result<JsonValue> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = encode_request(id, &op)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(Error::Link(format!(
                    "bridge exited during `{}`",
                    op.name()
                )));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Link(format!("bridge `{}` timed out", op.name())));
            }
        };

        if reply.ok {
            Ok(reply.result)
        } else {
            Err(Error::Link(format!(
                "{} failed: {}",
                op.name(),
                reply.error.unwrap_or_else(|| "unknown error".to_string())
            )))
        }
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::Link("bridge already shut down".into()))?;

        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl LinkClient for BridgeClient {
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<String> {
        let result = self
            .request(BridgeOp::RequestPairingCode {
                phone: phone.digits(),
            })
            .await?;

        match result {
            JsonValue::String(code) if !code.trim().is_empty() => Ok(code),
            other => Err(Error::Link(format!(
                "bridge returned no pairing code: {}",
                other
            ))),
        }
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<()> {
        self.request(BridgeOp::SendText { jid, text }).await?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.request(BridgeOp::Logout).await?;
        Ok(())
    }

    async fn shutdown(&self) {
        // Closing stdin lets a well-behaved bridge exit on its own
        self.stdin.lock().await.take();
        self.reader.abort();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
            Ok(Ok(status)) => debug!("Bridge exited with {}", status),
            _ => {
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill bridge: {}", e);
                }
            }
        }
    }
}
