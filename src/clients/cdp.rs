// src/clients/cdp.rs

//! Minimal Chrome DevTools Protocol connection to one page target.
//!
//! Requests carry a sequential id and are answered through a oneshot
//! channel; events (no id) are only inspected for page loads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Error)]
pub enum CdpError {
    #[error("devtools socket error: {0}")]
    Socket(String),

    #[error("devtools connection closed")]
    Closed,

    #[error("{method} failed ({code}): {message}")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    Event {
        method: String,
    },
}

type Callbacks = Arc<Mutex<HashMap<u64, (String, oneshot::Sender<Result<Value, CdpError>>)>>>;

const LOAD_EVENT: &str = "Page.loadEventFired";

pub struct CdpConnection {
    last_id: AtomicU64,
    callbacks: Callbacks,
    outbound: mpsc::UnboundedSender<Message>,
    loads: watch::Receiver<u64>,
    tasks: Vec<JoinHandle<()>>,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        let (stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| CdpError::Socket(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(error = %e, "devtools writer stopped");
                    break;
                }
            }
        });

        let callbacks: Callbacks = Arc::new(Mutex::new(HashMap::new()));
        let (loads_tx, loads) = watch::channel(0u64);

        let pending = Arc::clone(&callbacks);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match serde_json::from_str::<Incoming>(&text) {
                    Ok(Incoming::Response { id, result, error }) => {
                        if let Some((method, reply)) = pending.lock().await.remove(&id) {
                            let outcome = match error {
                                Some(body) => Err(CdpError::Protocol {
                                    method,
                                    code: body.code,
                                    message: body.message,
                                }),
                                None => Ok(result.unwrap_or(Value::Null)),
                            };
                            let _ = reply.send(outcome);
                        }
                    }
                    Ok(Incoming::Event { method }) if method == LOAD_EVENT => {
                        loads_tx.send_modify(|count| *count += 1);
                    }
                    Ok(Incoming::Event { .. }) => {}
                    Err(e) => tracing::debug!(error = %e, "unparsed devtools frame"),
                }
            }
            // Dropping the senders wakes every caller still waiting.
            pending.lock().await.clear();
        });

        Ok(Self {
            last_id: AtomicU64::new(0),
            callbacks,
            outbound,
            loads,
            tasks: vec![writer, reader],
        })
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.callbacks
            .lock()
            .await
            .insert(id, (method.to_string(), tx));

        let request = json!({ "id": id, "method": method, "params": params }).to_string();
        if self.outbound.send(Message::Text(request.into())).is_err() {
            self.callbacks.lock().await.remove(&id);
            return Err(CdpError::Closed);
        }

        rx.await.map_err(|_| CdpError::Closed)?
    }

    /// Number of page loads seen so far.
    pub fn load_count(&self) -> u64 {
        *self.loads.borrow()
    }

    /// Resolves once a page load newer than `mark` has been seen.
    pub async fn wait_for_load_after(&self, mark: u64) -> Result<(), CdpError> {
        let mut loads = self.loads.clone();
        loads
            .wait_for(|count| *count > mark)
            .await
            .map(|_| ())
            .map_err(|_| CdpError::Closed)
    }

    pub fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Answers `Runtime.evaluate` with the expression echoed back, fails
    /// everything else, and announces a page load after `Page.navigate`.
    async fn fake_devtools() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                let id = request["id"].clone();
                let reply = match request["method"].as_str() {
                    Some("Runtime.evaluate") => json!({
                        "id": id,
                        "result": { "result": { "value": request["params"]["expression"] } }
                    }),
                    Some("Page.navigate") => {
                        ws.send(Message::Text(json!({"method": "Page.frameStartedLoading", "params": {}}).to_string().into()))
                            .await
                            .unwrap();
                        ws.send(Message::Text(json!({"method": LOAD_EVENT, "params": {"timestamp": 1.0}}).to_string().into()))
                            .await
                            .unwrap();
                        json!({ "id": id, "result": { "frameId": "F1" } })
                    }
                    _ => json!({ "id": id, "error": { "code": -32601, "message": "method not found" } }),
                };
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            }
        });
        format!("ws://{addr}/devtools/page/F1")
    }

    #[tokio::test]
    async fn responses_are_matched_to_their_requests() {
        let conn = CdpConnection::connect(&fake_devtools().await).await.unwrap();

        let (a, b) = tokio::join!(
            conn.call("Runtime.evaluate", json!({ "expression": "1 + 1" })),
            conn.call("Runtime.evaluate", json!({ "expression": "document.title" })),
        );

        assert_eq!(a.unwrap()["result"]["value"], "1 + 1");
        assert_eq!(b.unwrap()["result"]["value"], "document.title");
    }

    #[tokio::test]
    async fn protocol_errors_name_the_method() {
        let conn = CdpConnection::connect(&fake_devtools().await).await.unwrap();

        let err = conn.call("Page.bogus", json!({})).await.unwrap_err();
        match err {
            CdpError::Protocol { method, code, .. } => {
                assert_eq!(method, "Page.bogus");
                assert_eq!(code, -32601);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn load_events_advance_the_counter() {
        let conn = CdpConnection::connect(&fake_devtools().await).await.unwrap();
        let mark = conn.load_count();

        conn.call("Page.navigate", json!({ "url": "about:blank" })).await.unwrap();
        conn.wait_for_load_after(mark).await.unwrap();

        assert_eq!(conn.load_count(), mark + 1);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_socket_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = CdpConnection::connect(&format!("ws://{addr}/")).await.err().unwrap();
        assert!(matches!(err, CdpError::Socket(_)));
    }
}
