//! Flat-session CDP connection — thin client over `tokio-tungstenite`.
//!
//! One WebSocket to the browser endpoint carries commands for every attached
//! target; responses are routed back by command id. Only the handful of CDP
//! methods this crate needs are ever sent.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use skipper_core::browser::BrowserError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Pending CDP command waiting for its response.
type PendingTx = oneshot::Sender<Result<Value, String>>;

struct CdpCommand {
    method: String,
    params: Value,
    /// Target session to address; `None` for browser-level commands.
    session_id: Option<String>,
    response_tx: PendingTx,
}

/// Shared connection to the browser's DevTools WebSocket.
pub(crate) struct CdpConnection {
    cmd_tx: mpsc::Sender<CdpCommand>,
    _handler: JoinHandle<()>,
}

impl CdpConnection {
    pub(crate) async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::Launch(format!("WebSocket connect: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<CdpCommand>(64);
        let handler = tokio::spawn(handler_loop(ws, cmd_rx));

        Ok(Self {
            cmd_tx,
            _handler: handler,
        })
    }

    /// Send one command and await its result.
    pub(crate) async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, BrowserError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CdpCommand {
                method: method.into(),
                params,
                session_id: session_id.map(str::to_owned),
                response_tx: tx,
            })
            .await
            .map_err(|_| BrowserError::Protocol("CDP handler closed".into()))?;

        let result = tokio::time::timeout(COMMAND_TIMEOUT, rx)
            .await
            .map_err(|_| BrowserError::Timeout {
                timeout: COMMAND_TIMEOUT,
                context: format!("CDP {method}"),
            })?
            .map_err(|_| BrowserError::Protocol("CDP response dropped".into()))?;

        result.map_err(BrowserError::Protocol)
    }
}

/// Build the wire envelope for one command.
fn command_envelope(id: u64, method: &str, params: &Value, session_id: Option<&str>) -> Value {
    let mut msg = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(sid) = session_id {
        msg["sessionId"] = Value::String(sid.to_owned());
    }
    msg
}

/// Receives commands, sends them over the WebSocket, and routes responses
/// back by id. CDP events (messages without an id) are ignored — every state
/// question this crate asks is a polled command.
async fn handler_loop(ws: WsStream, mut cmd_rx: mpsc::Receiver<CdpCommand>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id;
                next_id += 1;
                let msg = command_envelope(id, &cmd.method, &cmd.params, cmd.session_id.as_deref());
                let _ = pending.insert(id, cmd.response_tx);
                if ws_tx.send(Message::Text(msg.to_string().into())).await.is_err() {
                    debug!("CDP socket closed while sending");
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(val): Result<Value, _> = serde_json::from_str(&text) else {
                    continue;
                };
                if let Some(id) = val.get("id").and_then(Value::as_u64) {
                    if let Some(tx) = pending.remove(&id) {
                        if let Some(err) = val.get("error") {
                            let msg = err["message"].as_str().unwrap_or("CDP error");
                            let _ = tx.send(Err(msg.into()));
                        } else {
                            let _ = tx.send(Ok(val["result"].clone()));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_without_session() {
        let msg = command_envelope(7, "Target.getTargets", &json!({}), None);
        assert_eq!(msg["id"], 7);
        assert_eq!(msg["method"], "Target.getTargets");
        assert!(msg.get("sessionId").is_none());
    }

    #[test]
    fn envelope_with_session() {
        let msg = command_envelope(
            1,
            "Runtime.evaluate",
            &json!({"expression": "1+1"}),
            Some("SESSION1"),
        );
        assert_eq!(msg["sessionId"], "SESSION1");
        assert_eq!(msg["params"]["expression"], "1+1");
    }
}
