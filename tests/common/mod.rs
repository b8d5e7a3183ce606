//! Shared test harness: an in-memory transport and a scriptable Core.
#![allow(dead_code)]

use async_trait::async_trait;
use roon_client::error::{Result, RoonError};
use roon_client::protocol::{MooMessageBuilder, MooParser};
use roon_client::transport::{Transport, TransportFactory, TransportMessage};
use roon_client::{ConnectionConfig, MooMessage, ReconnectConfig, RegistrationRecord};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

fn closed() -> RoonError {
    RoonError::ConnectionClosed {
        code: None,
        reason: Some("fake transport closed".into()),
    }
}

/// In-memory duplex transport. The paired [`CoreHandle`] plays the Core.
pub struct FakeTransport {
    to_core: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    from_core: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportMessage>>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl FakeTransport {
    pub fn pair() -> (Arc<FakeTransport>, CoreHandle) {
        let (to_core_tx, to_core_rx) = mpsc::unbounded_channel();
        let (from_core_tx, from_core_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(FakeTransport {
            to_core: Mutex::new(Some(to_core_tx)),
            from_core: tokio::sync::Mutex::new(from_core_rx),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        });
        let core = CoreHandle {
            from_client: to_core_rx,
            to_client: Some(from_core_tx),
        };
        (transport, core)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, data: Vec<u8>) -> Result<()> {
        let sender = self
            .to_core
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(closed)?;
        sender.send(data).map_err(|_| closed())
    }

    async fn receive(&self) -> Result<TransportMessage> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed());
        }
        let mut rx = self.from_core.lock().await;
        tokio::select! {
            message = rx.recv() => message.ok_or_else(closed),
            _ = self.close_notify.notified() => Err(closed()),
        }
    }

    async fn close(&self, _code: u16, _reason: Option<String>) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.to_core.lock().unwrap().take();
            self.close_notify.notify_one();
        }
        Ok(())
    }
}

/// Hands out queued transports, one per connect attempt.
#[derive(Clone)]
pub struct FakeFactory {
    queue: Arc<Mutex<VecDeque<Arc<FakeTransport>>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn push(&self, transport: Arc<FakeTransport>) {
        self.queue.lock().unwrap().push_back(transport);
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        match self.queue.lock().unwrap().pop_front() {
            Some(transport) => {
                let transport: Arc<dyn Transport> = transport;
                Ok(transport)
            }
            None => Err(RoonError::ConnectionFailed("no transport available".into())),
        }
    }
}

/// The Core's side of a fake transport.
pub struct CoreHandle {
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
    to_client: Option<mpsc::UnboundedSender<TransportMessage>>,
}

impl CoreHandle {
    /// Next message the client sent, decoded.
    pub async fn recv_message(&mut self) -> MooMessage {
        let bytes = self
            .from_client
            .recv()
            .await
            .expect("client side of fake transport closed");
        let mut parser = MooParser::new();
        parser
            .feed(&bytes)
            .expect("client sent an undecodable frame")
            .expect("client sent a partial frame")
    }

    /// Next message the client sent, or `None` if it closed first.
    pub async fn try_recv_message(&mut self) -> Option<MooMessage> {
        let bytes = self.from_client.recv().await?;
        let mut parser = MooParser::new();
        Some(parser.feed(&bytes).ok().flatten()?)
    }

    fn send(&self, bytes: Vec<u8>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(TransportMessage::Binary(bytes));
        }
    }

    pub fn send_complete(&self, request_id: i64, name: &str, body: Option<Value>) {
        let bytes = MooMessageBuilder::complete(request_id, name)
            .maybe_body(body)
            .build()
            .unwrap();
        self.send(bytes);
    }

    pub fn send_continue(&self, request_id: i64, name: &str, body: Option<Value>) {
        let bytes = MooMessageBuilder::continue_msg(request_id, name)
            .maybe_body(body)
            .build()
            .unwrap();
        self.send(bytes);
    }

    /// A Core-initiated request (its id space is its own).
    pub fn send_request(&self, request_id: i64, path: &str, body: Option<Value>) {
        let bytes = MooMessageBuilder::request(request_id, path)
            .maybe_body(body)
            .build()
            .unwrap();
        self.send(bytes);
    }

    /// Deliver raw bytes (garbled frames and the like).
    pub fn send_raw(&self, bytes: Vec<u8>) {
        self.send(bytes);
    }

    /// Deliver a text frame.
    pub fn send_text(&self, text: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(TransportMessage::Text(text.to_string()));
        }
    }

    /// Drop the Core side, which the client observes as a transport
    /// failure.
    pub fn close(&mut self) {
        self.to_client = None;
        self.from_client.close();
    }

    /// Answer the two-step registry handshake and return the register
    /// body the client sent.
    pub async fn serve_registration(
        &mut self,
        core_id: &str,
        display_name: &str,
        token: &str,
    ) -> Value {
        let info = self.recv_message().await;
        assert_eq!(info.name, "com.roonlabs.registry:1/info");
        self.send_complete(
            info.request_id,
            "Success",
            Some(json!({ "core_id": core_id })),
        );

        let register = self.recv_message().await;
        assert_eq!(register.name, "com.roonlabs.registry:1/register");
        let body = register.body_json().cloned().unwrap_or(Value::Null);
        self.send_complete(
            register.request_id,
            "Registered",
            Some(json!({
                "core_id": core_id,
                "display_name": display_name,
                "display_version": "1.8.0",
                "token": token,
                "provided_services": [],
            })),
        );
        body
    }
}

/// Registration identity used across tests.
pub fn test_registration() -> RegistrationRecord {
    RegistrationRecord::new(
        "com.example.test",
        "Test Extension",
        "0.1.0",
        "Example",
        "dev@example.com",
    )
}

/// Connection config with reconnect slowed down so it stays out of the
/// way unless a test asks for it.
pub fn test_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::new(test_registration());
    config.reconnect = ReconnectConfig {
        base_delay: Duration::from_secs(30),
        multiplier: 2.0,
        max_delay: Duration::from_secs(30),
        max_jitter: 0.0,
        max_attempts: None,
    };
    config
}
