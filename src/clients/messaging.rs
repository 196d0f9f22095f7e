// src/clients/messaging.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const JID_SUFFIX: &str = "@s.whatsapp.net";
const DEFAULT_COUNTRY_CODE: &str = "91";
const LOGGED_OUT: &str = "loggedOut";

// =============================================================================
//  ADDRESSING & MESSAGES
// =============================================================================

/// Recipient address on the messaging network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Jid(String);

impl Jid {
    /// Derives the address from a phone number as typed in the ledger.
    ///
    /// Ten digits get the Indian country code, longer numbers are taken as
    /// already international, anything shorter is rejected.
    pub fn from_phone(raw: &str) -> Option<Jid> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        match digits.len() {
            10 => Some(Jid(format!("{DEFAULT_COUNTRY_CODE}{digits}{JID_SUFFIX}"))),
            n if n > 10 => Some(Jid(format!("{digits}{JID_SUFFIX}"))),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlButton {
    pub display_text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub footer: String,
    pub button: UrlButton,
}

impl OutgoingMessage {
    // Template-button message shape understood by the gateway
    fn to_wire(&self) -> serde_json::Value {
        json!({
            "text": self.text,
            "footer": self.footer,
            "templateButtons": [{
                "index": 1,
                "urlButton": {
                    "displayText": self.button.display_text,
                    "url": self.button.url,
                }
            }]
        })
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("WhatsApp bot is not connected or ready.")]
    NotReady,

    #[error("connection dropped before the message was written")]
    Dropped,

    #[error("gateway transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait MessagingChannel: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn send(&self, to: &Jid, message: &OutgoingMessage) -> Result<(), ChannelError>;
}

// =============================================================================
//  GATEWAY SESSION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    LoggedOut,
    ShutDown,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub gateway_url: String,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum GatewayEvent {
    Qr { code: String },
    Open,
    Close {
        #[serde(default)]
        reason: Option<String>,
    },
}

struct OutboundFrame {
    payload: String,
    written: oneshot::Sender<Result<(), ChannelError>>,
}

enum Disconnect {
    LoggedOut,
    Lost(String),
    Shutdown,
}

/// Long-lived connection to the messaging gateway.
///
/// The session reconnects on its own after an unexpected close and stops
/// for good when the gateway reports that the account logged out.
pub struct ChannelSession {
    config: ChannelConfig,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    outbound: Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelSession {
    pub fn new(config: ChannelConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Closed);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            state,
            shutdown,
            outbound: Mutex::new(None),
            supervisor: Mutex::new(None),
        })
    }

    /// Spawns the connect/reconnect loop.
    pub async fn connect(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move { session.supervise().await });
        *self.supervisor.lock().await = Some(handle);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub async fn wait_for(&self, target: ConnectionState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }

    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.supervisor.lock().await.take() {
            let _ = handle.await;
        }
        self.state.send_replace(ConnectionState::ShutDown);
        tracing::info!("Messaging session shut down.");
    }

    async fn supervise(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.state.send_replace(ConnectionState::Connecting);
            tracing::info!(url = %self.config.gateway_url, "Connecting to messaging gateway...");

            let outcome = match connect_async(self.config.gateway_url.as_str()).await {
                Ok((stream, _)) => self.drive(stream, &mut shutdown_rx).await,
                Err(e) => Disconnect::Lost(e.to_string()),
            };

            *self.outbound.lock().await = None;

            match outcome {
                Disconnect::Shutdown => break,
                Disconnect::LoggedOut => {
                    self.state.send_replace(ConnectionState::LoggedOut);
                    tracing::error!("❌ Disconnected permanently. The account was logged out.");
                    break;
                }
                Disconnect::Lost(reason) => {
                    self.state.send_replace(ConnectionState::Closed);
                    tracing::warn!(%reason, "Connection closed. Reconnecting: true");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }

    async fn drive<S>(&self, stream: S, shutdown_rx: &mut watch::Receiver<bool>) -> Disconnect
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
        *self.outbound.lock().await = Some(tx);

        loop {
            tokio::select! {
                Some(frame) = rx.recv() => {
                    let result = sink
                        .send(Message::Text(frame.payload.into()))
                        .await
                        .map_err(|e| ChannelError::Transport(e.to_string()));
                    let _ = frame.written.send(result);
                }
                incoming = source.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(disconnect) = self.handle_event(&text) {
                                return disconnect;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            return Disconnect::Lost(format!("socket closed: {reason}"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Disconnect::Lost(e.to_string()),
                        None => return Disconnect::Lost("gateway hung up".into()),
                    }
                }
                _ = shutdown_rx.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Disconnect::Shutdown;
                }
            }
        }
    }

    fn handle_event(&self, raw: &str) -> Option<Disconnect> {
        let event: GatewayEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unknown gateway frame");
                return None;
            }
        };

        match event {
            GatewayEvent::Qr { code } => {
                tracing::info!("QR code received, please scan it with WhatsApp on the phone:");
                match render_qr(&code) {
                    Some(art) => println!("{art}"),
                    None => tracing::warn!("Could not render the pairing QR code"),
                }
                None
            }
            GatewayEvent::Open => {
                self.state.send_replace(ConnectionState::Open);
                tracing::info!("✅ WhatsApp connection opened successfully! Ready to send receipts.");
                None
            }
            GatewayEvent::Close { reason } => match reason.as_deref() {
                Some(LOGGED_OUT) => Some(Disconnect::LoggedOut),
                other => Some(Disconnect::Lost(other.unwrap_or("unknown").to_string())),
            },
        }
    }
}

fn render_qr(code: &str) -> Option<String> {
    let qr = QrCode::new(code.as_bytes()).ok()?;
    Some(
        qr.render::<char>()
            .quiet_zone(false)
            .module_dimensions(2, 1)
            .build(),
    )
}

#[async_trait]
impl MessagingChannel for ChannelSession {
    fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    async fn send(&self, to: &Jid, message: &OutgoingMessage) -> Result<(), ChannelError> {
        if !self.is_ready() {
            return Err(ChannelError::NotReady);
        }

        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(ChannelError::NotReady)?;

        let payload = json!({
            "type": "send",
            "jid": to.as_str(),
            "message": message.to_wire(),
        })
        .to_string();

        let (written, done) = oneshot::channel();
        sender
            .send(OutboundFrame { payload, written })
            .map_err(|_| ChannelError::Dropped)?;
        done.await.map_err(|_| ChannelError::Dropped)?
    }
}
