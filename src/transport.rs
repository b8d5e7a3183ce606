//! Transport layer abstraction over a duplex binary WebSocket.

use crate::error::{Result, RoonError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

/// One frame received from the peer.
///
/// The Core sends binary frames; text is accepted and parsed as the
/// UTF-8 bytes of the same MOO/1 encoding.
#[derive(Debug, Clone)]
pub enum TransportMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl TransportMessage {
    /// The MOO/1 bytes of this frame.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            TransportMessage::Text(s) => s.into_bytes(),
            TransportMessage::Binary(b) => b,
        }
    }
}

/// A duplex, message-oriented transport.
///
/// Implementations must be usable from two concurrent contexts: one task
/// calling `send` while another calls `receive`. `close` is idempotent
/// and causes any outstanding `receive` to fail.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one frame to the peer.
    async fn send(&self, data: Vec<u8>) -> Result<()>;

    /// Block until one frame is available.
    async fn receive(&self) -> Result<TransportMessage>;

    /// Close the transport.
    async fn close(&self, code: u16, reason: Option<String>) -> Result<()>;
}

/// Produces a fresh transport per connection attempt.
///
/// Reconnection gets a clean transport each cycle, and tests substitute
/// an in-memory implementation here.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Transport>>;
}

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketFactory, WebSocketTransport};

#[cfg(feature = "websocket")]
mod websocket {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;

    enum Outgoing {
        Frame(Vec<u8>),
        Close(u16, Option<String>),
    }

    /// WebSocket transport backed by `tokio-tungstenite`.
    ///
    /// The socket is split and pumped through channels so `send` and
    /// `receive` can run from independent tasks.
    pub struct WebSocketTransport {
        out_tx: mpsc::UnboundedSender<Outgoing>,
        in_rx: Mutex<mpsc::UnboundedReceiver<TransportMessage>>,
        closed: AtomicBool,
        close_notify: Notify,
    }

    impl WebSocketTransport {
        /// Dial `url` and start the pump tasks.
        pub async fn connect(url: &str) -> Result<Self> {
            let (ws, _) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| RoonError::ConnectionFailed(e.to_string()))?;
            let (mut sink, mut stream) = ws.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportMessage>();

            tokio::spawn(async move {
                while let Some(out) = out_rx.recv().await {
                    let result = match out {
                        Outgoing::Frame(data) => sink.send(Message::Binary(data)).await,
                        Outgoing::Close(code, reason) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.unwrap_or_default().into(),
                            };
                            let _ = sink.send(Message::Close(Some(frame))).await;
                            break;
                        }
                    };
                    if let Err(e) = result {
                        tracing::debug!("websocket send error: {e}");
                        break;
                    }
                }
            });

            tokio::spawn(async move {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(Message::Binary(data)) => {
                            if in_tx.send(TransportMessage::Binary(data)).is_err() {
                                break;
                            }
                        }
                        Ok(Message::Text(text)) => {
                            if in_tx.send(TransportMessage::Text(text)).is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        // ws-level ping/pong control frames are not MOO traffic
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!("websocket receive error: {e}");
                            break;
                        }
                    }
                }
            });

            Ok(Self {
                out_tx,
                in_rx: Mutex::new(in_rx),
                closed: AtomicBool::new(false),
                close_notify: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl Transport for WebSocketTransport {
        async fn send(&self, data: Vec<u8>) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(RoonError::closed_locally("transport closed"));
            }
            self.out_tx
                .send(Outgoing::Frame(data))
                .map_err(|_| RoonError::closed_locally("transport closed"))
        }

        async fn receive(&self) -> Result<TransportMessage> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(RoonError::closed_locally("transport closed"));
            }
            let mut rx = self.in_rx.lock().await;
            tokio::select! {
                msg = rx.recv() => msg.ok_or_else(|| RoonError::closed_locally("transport closed")),
                _ = self.close_notify.notified() => {
                    Err(RoonError::closed_locally("transport closed"))
                }
            }
        }

        async fn close(&self, code: u16, reason: Option<String>) -> Result<()> {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let _ = self.out_tx.send(Outgoing::Close(code, reason));
            self.close_notify.notify_one();
            Ok(())
        }
    }

    /// Factory for WebSocket transports at a fixed Core endpoint.
    pub struct WebSocketFactory {
        url: String,
    }

    impl WebSocketFactory {
        /// Validate and remember a `ws://host:port/api` endpoint.
        pub fn new(url: impl Into<String>) -> Result<Self> {
            let url = url.into();
            let parsed =
                url::Url::parse(&url).map_err(|e| RoonError::InvalidUrl(format!("{url}: {e}")))?;
            if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                return Err(RoonError::InvalidUrl(format!(
                    "{url}: scheme must be ws or wss"
                )));
            }
            if parsed.host_str().is_none() {
                return Err(RoonError::InvalidUrl(format!("{url}: missing host")));
            }
            Ok(Self { url })
        }

        /// Endpoint for a Core at `host:port` (default API path).
        pub fn for_core(host: &str, port: u16) -> Result<Self> {
            Self::new(format!("ws://{host}:{port}/api"))
        }
    }

    #[async_trait]
    impl TransportFactory for WebSocketFactory {
        async fn connect(&self) -> Result<Arc<dyn Transport>> {
            let transport: Arc<dyn Transport> =
                Arc::new(WebSocketTransport::connect(&self.url).await?);
            Ok(transport)
        }
    }

}
