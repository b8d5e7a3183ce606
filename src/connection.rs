//! The connection engine: request correlation, registration, keepalive,
//! subscriptions, and reconnect.

use crate::error::{Result, RoonError};
use crate::message::{MooMessage, MooVerb, RoonResponse};
use crate::protocol::{MooMessageBuilder, MooParser};
use crate::reconnect::{ReconnectConfig, Reconnector};
use crate::registry::{services, CoreInfo, RegisteredCore, RegistrationRecord};
use crate::subscription::{EventStream, Subscription};
use crate::token_store::TokenStore;
use crate::transport::{Transport, TransportFactory};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const REGISTRY_INFO: &str = "com.roonlabs.registry:1/info";
const REGISTRY_REGISTER: &str = "com.roonlabs.registry:1/register";

/// Pings observed during a pending register before the state moves to
/// `AwaitingAuthorization`.
const AUTH_PING_THRESHOLD: u32 = 2;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Extension identity used in the registration handshake.
    pub registration: RegistrationRecord,
    /// Timeout for ordinary request/response calls.
    pub request_timeout: Duration,
    /// Timeout for the register call; the Core may hold the reply until
    /// the user approves the extension in its UI.
    pub registration_timeout: Duration,
    /// Maximum silence between inbound frames before the watchdog
    /// forces a reconnect. The Core pings roughly every five seconds.
    pub keepalive: Duration,
    /// Backoff policy for reconnection.
    pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    pub fn new(registration: RegistrationRecord) -> Self {
        Self {
            registration,
            request_timeout: Duration::from_secs(30),
            registration_timeout: Duration::from_secs(300),
            keepalive: Duration::from_secs(15),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registering,
    /// The register call is pending on user approval in the Roon UI.
    AwaitingAuthorization,
    Connected {
        core_id: String,
        core_name: String,
    },
    Reconnecting {
        attempt: u32,
    },
    Failed {
        message: String,
    },
}

impl ConnectionState {
    fn accepts_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected
                | ConnectionState::Failed { .. }
                | ConnectionState::Reconnecting { .. }
        )
    }
}

struct SubscriptionEntry {
    sender: mpsc::UnboundedSender<RoonResponse>,
    unsubscribe_path: Option<String>,
    subscription_key: Option<Value>,
}

struct Shared {
    config: ConnectionConfig,
    factory: Box<dyn TransportFactory>,
    tokens: Arc<dyn TokenStore>,
    state: Mutex<ConnectionState>,
    state_sender: Mutex<Option<mpsc::UnboundedSender<ConnectionState>>>,
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<RoonResponse>>>>,
    subscriptions: Mutex<HashMap<i64, SubscriptionEntry>>,
    next_id: AtomicI64,
    send_sender: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    /// Unix millis of the last inbound frame. SystemTime so the elapsed
    /// measurement includes time spent in machine sleep.
    last_rx_millis: AtomicU64,
    registering: AtomicBool,
    pings_while_registering: AtomicU32,
    reconnector: Mutex<Reconnector>,
    /// Bumped on every connection attempt and on disconnect. Tasks from
    /// a superseded attempt compare epochs and stand down instead of
    /// touching state that now belongs to a newer attempt.
    epoch: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    connect_serial: tokio::sync::Mutex<()>,
}

/// Recover from a poisoned lock; all guarded state stays consistent
/// under panic because lock scopes contain only map/field updates.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A connection to a Roon Core.
///
/// Cheap to clone; all clones share the same connection state.
#[derive(Clone)]
pub struct RoonConnection {
    shared: Arc<Shared>,
}

impl RoonConnection {
    /// Create a connection using any transport factory.
    pub fn new(
        config: ConnectionConfig,
        factory: impl TransportFactory + 'static,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let reconnector = Reconnector::new(config.reconnect.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                factory: Box::new(factory),
                tokens,
                state: Mutex::new(ConnectionState::Disconnected),
                state_sender: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                send_sender: Mutex::new(None),
                transport: Mutex::new(None),
                last_rx_millis: AtomicU64::new(0),
                registering: AtomicBool::new(false),
                pings_while_registering: AtomicU32::new(0),
                reconnector: Mutex::new(reconnector),
                epoch: AtomicU64::new(0),
                tasks: Mutex::new(Vec::new()),
                reconnect_task: Mutex::new(None),
                connect_serial: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Create a connection to `ws://host:port/api`.
    #[cfg(feature = "websocket")]
    pub fn with_url(
        url: &str,
        config: ConnectionConfig,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let factory = crate::transport::WebSocketFactory::new(url)?;
        Ok(Self::new(config, factory, tokens))
    }

    /// Establish the transport and run the registration handshake.
    ///
    /// A no-op unless the state is `Disconnected`, `Failed`, or
    /// `Reconnecting`. On failure everything is torn down and the state
    /// becomes `Failed`.
    pub async fn connect(&self) -> Result<()> {
        if !self.shared.state().accepts_connect() {
            return Ok(());
        }
        // A manual connect takes over from any reconnect cycle.
        if let Some(task) = lock(&self.shared.reconnect_task).take() {
            task.abort();
        }
        match self.shared.connect_once().await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.shared.state() != ConnectionState::Disconnected {
                    self.shared.teardown_attempt().await;
                    self.shared.set_state(ConnectionState::Failed {
                        message: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Tear everything down and return to `Disconnected`.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        if let Some(task) = lock(&shared.reconnect_task).take() {
            task.abort();
        }
        shared.teardown_attempt().await;
        shared.next_id.store(1, Ordering::SeqCst);
        lock(&shared.reconnector).reset();
        shared.set_state(ConnectionState::Disconnected);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// A stream of state transitions, starting with the current state.
    ///
    /// Each call replaces the previous stream; the superseded stream is
    /// finished so its consumer terminates instead of hanging.
    pub fn state_stream(&self) -> EventStream<ConnectionState> {
        let shared = &self.shared;
        let (tx, rx) = mpsc::unbounded_channel();
        // Snapshot and install under the state lock so no transition
        // lands between the snapshot and the swap.
        let state = lock(&shared.state);
        let _ = tx.send(state.clone());
        *lock(&shared.state_sender) = Some(tx);
        drop(state);
        EventStream::new(rx)
    }

    /// Issue a request and await its response with the default timeout.
    pub async fn send(&self, path: &str, body: Option<Value>) -> Result<RoonResponse> {
        self.shared
            .request(path, body, self.shared.config.request_timeout, true)
            .await
    }

    /// Issue a request with an explicit timeout.
    pub async fn send_with_timeout(
        &self,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<RoonResponse> {
        self.shared.request(path, body, timeout, true).await
    }

    /// Open a server-push stream.
    ///
    /// Dropping the returned stream releases the id and fires the
    /// matching unsubscribe method without waiting for a reply.
    pub async fn subscribe(&self, path: &str, body: Option<Value>) -> Result<Subscription> {
        self.shared.open_subscription(path, body)
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        lock(&self.state).clone()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        if *state == next {
            return;
        }
        tracing::debug!(from = ?*state, to = ?next, "connection state");
        *state = next.clone();
        let mut sender = lock(&self.state_sender);
        if let Some(tx) = sender.as_ref() {
            if tx.send(next).is_err() {
                *sender = None;
            }
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn touch(&self) {
        self.last_rx_millis.store(now_millis(), Ordering::SeqCst);
    }

    fn send_bytes(&self, data: Vec<u8>) -> Result<()> {
        let sender = lock(&self.send_sender)
            .clone()
            .ok_or_else(|| RoonError::closed_locally("not connected"))?;
        sender
            .send(data)
            .map_err(|_| RoonError::closed_locally("transport closed"))
    }

    /// Exactly-once correlated request/response.
    ///
    /// The completion sink is registered in the pending map before the
    /// bytes are handed to the send pump, so a response that arrives
    /// while the send is still in flight cannot be lost. Every
    /// completion path claims the id by removing it from the map; only
    /// the first claimant resumes the caller.
    async fn request(
        &self,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
        require_connected: bool,
    ) -> Result<RoonResponse> {
        if require_connected && !matches!(self.state(), ConnectionState::Connected { .. }) {
            return Err(RoonError::closed_locally("not connected"));
        }

        let id = self.next_id();
        let bytes = MooMessageBuilder::request(id, path).maybe_body(body).build()?;

        let (tx, mut rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if self.send_bytes(bytes).is_err() {
            // Claim the id back; if it is already gone a concurrent
            // teardown resolved the caller first.
            if lock(&self.pending).remove(&id).is_some() {
                return Err(RoonError::closed_locally("send failed"));
            }
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RoonError::closed_locally("connection closed")),
            Err(_) => {
                if lock(&self.pending).remove(&id).is_some() {
                    Err(RoonError::Timeout)
                } else {
                    // The dispatcher claimed the id before the timeout
                    // could; its response is in (or about to be in) the
                    // oneshot.
                    match rx.await {
                        Ok(result) => result,
                        Err(_) => Err(RoonError::closed_locally("connection closed")),
                    }
                }
            }
        }
    }

    fn open_subscription(self: &Arc<Self>, path: &str, body: Option<Value>) -> Result<Subscription> {
        if !matches!(self.state(), ConnectionState::Connected { .. }) {
            return Err(RoonError::closed_locally("not connected"));
        }

        let id = self.next_id();
        let unsubscribe_path = unsubscribe_path_for(path);
        let subscription_key = body
            .as_ref()
            .and_then(|b| b.get("subscription_key"))
            .cloned();

        let bytes = MooMessageBuilder::request(id, path).maybe_body(body).build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscriptions).insert(
            id,
            SubscriptionEntry {
                sender: tx,
                unsubscribe_path,
                subscription_key,
            },
        );

        if self.send_bytes(bytes).is_err() {
            lock(&self.subscriptions).remove(&id);
            return Err(RoonError::closed_locally("transport closed"));
        }

        let shared = Arc::clone(self);
        Ok(Subscription::new(
            id,
            rx,
            Box::new(move || shared.cancel_subscription(id)),
        ))
    }

    /// Consumer-side cancellation: release the id and fire the matching
    /// unsubscribe request without waiting for a reply.
    fn cancel_subscription(&self, id: i64) {
        let Some(entry) = lock(&self.subscriptions).remove(&id) else {
            // Already finished by the remote or by teardown.
            return;
        };
        let Some(path) = entry.unsubscribe_path else {
            return;
        };
        let body = entry
            .subscription_key
            .map(|key| json!({ "subscription_key": key }));
        let unsubscribe = MooMessageBuilder::request(self.next_id(), path).maybe_body(body);
        match unsubscribe.build() {
            Ok(bytes) => {
                let _ = self.send_bytes(bytes);
            }
            Err(e) => tracing::debug!("failed to encode unsubscribe: {e}"),
        }
    }

    async fn connect_once(self: &Arc<Self>) -> Result<()> {
        let _serial = self.connect_serial.lock().await;
        self.teardown_attempt().await;

        self.set_state(ConnectionState::Connecting);
        let transport = match self.factory.connect().await {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("transport connect failed: {e}");
                return Err(e);
            }
        };
        *lock(&self.transport) = Some(Arc::clone(&transport));

        let epoch = self.epoch.load(Ordering::SeqCst);
        self.touch();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        *lock(&self.send_sender) = Some(send_tx);

        let pump_transport = Arc::clone(&transport);
        let pump = tokio::spawn(async move {
            while let Some(data) = send_rx.recv().await {
                if let Err(e) = pump_transport.send(data).await {
                    tracing::debug!("transport send failed: {e}");
                    let _ = pump_transport.close(1006, Some("send failed".into())).await;
                    break;
                }
            }
        });

        let recv_shared = Arc::clone(self);
        let recv_transport = Arc::clone(&transport);
        let receive = tokio::spawn(async move {
            receive_loop(recv_shared, recv_transport, epoch).await;
        });

        let watchdog_shared = Arc::clone(self);
        let watchdog_transport = Arc::clone(&transport);
        let watchdog = tokio::spawn(async move {
            watchdog_loop(watchdog_shared, watchdog_transport, epoch).await;
        });

        *lock(&self.tasks) = vec![pump, receive, watchdog];

        self.register_with_core().await
    }

    /// The two-step registry handshake.
    async fn register_with_core(&self) -> Result<()> {
        self.set_state(ConnectionState::Registering);
        self.pings_while_registering.store(0, Ordering::SeqCst);
        self.registering.store(true, Ordering::SeqCst);

        let result = self.register_inner().await;
        self.registering.store(false, Ordering::SeqCst);
        result
    }

    async fn register_inner(&self) -> Result<()> {
        let info = self
            .request(REGISTRY_INFO, None, self.config.request_timeout, false)
            .await?;
        if !info.is_success() {
            return Err(RoonError::RegistrationFailed(info.error_message()));
        }
        let core = CoreInfo::from_body(info.body.as_ref())?;
        tracing::debug!(core_id = %core.core_id, "registering with core");

        let token = self.tokens.token(&core.core_id);
        let body = self.config.registration.register_body(token.as_deref());
        let reply = self
            .request(
                REGISTRY_REGISTER,
                Some(body),
                self.config.registration_timeout,
                false,
            )
            .await?;
        if reply.name != "Registered" {
            return Err(RoonError::RegistrationFailed(reply.error_message()));
        }

        let registered = RegisteredCore::from_body(reply.body.as_ref())?;
        if let Some(token) = &registered.token {
            self.tokens.save_token(&registered.core_id, token);
        }
        lock(&self.reconnector).reset();
        self.set_state(ConnectionState::Connected {
            core_id: registered.core_id,
            core_name: registered.display_name,
        });
        Ok(())
    }

    /// Supersede and dismantle the current attempt: stale tasks stand
    /// down, the transport closes, callers and subscribers are released.
    async fn teardown_attempt(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        *lock(&self.send_sender) = None;
        let transport = lock(&self.transport).take();
        if let Some(transport) = transport {
            let _ = transport.close(1000, None).await;
        }
        self.fail_all_pending();
        self.finish_all_subscriptions();
    }

    fn fail_all_pending(&self) {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        for (id, tx) in drained {
            tracing::trace!("failing pending request {id}: connection closed");
            let _ = tx.send(Err(RoonError::closed_locally("connection closed")));
        }
    }

    /// Dropping the senders finishes every consumer stream; a sink left
    /// unfinished would hang its consumer forever.
    fn finish_all_subscriptions(&self) {
        lock(&self.subscriptions).clear();
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                let delay = lock(&shared.reconnector).next_delay();
                let Some(delay) = delay else {
                    shared.set_state(ConnectionState::Failed {
                        message: RoonError::MaxReconnectAttemptsExceeded.to_string(),
                    });
                    return;
                };
                let attempt = lock(&shared.reconnector).attempt();
                tracing::debug!(attempt, ?delay, "scheduling reconnect");
                tokio::time::sleep(delay).await;

                shared.set_state(ConnectionState::Reconnecting { attempt });
                let stale = lock(&shared.transport).take();
                if let Some(stale) = stale {
                    let _ = stale.close(1001, Some("reconnecting".into())).await;
                }
                match shared.connect_once().await {
                    Ok(()) => return,
                    Err(e) => {
                        if shared.state() == ConnectionState::Disconnected {
                            return;
                        }
                        tracing::debug!("reconnect attempt {attempt} failed: {e}");
                    }
                }
            }
        });
        *lock(&self.reconnect_task) = Some(task);
    }

    fn dispatch(self: &Arc<Self>, msg: MooMessage) {
        match msg.verb {
            MooVerb::Request => self.handle_inbound_request(msg),
            MooVerb::Continue | MooVerb::Complete => self.route_response(msg),
        }
    }

    /// Inbound service: the Core issues requests in its own id space.
    /// Ping is the only method we provide.
    fn handle_inbound_request(&self, msg: MooMessage) {
        let id = msg.request_id;
        match msg.service_method() {
            Some((services::PING, "ping")) => {
                crate::logging::frame_trace(|| format!("ping from core (id {id})"));
                if self.registering.load(Ordering::SeqCst) {
                    let seen = self.pings_while_registering.fetch_add(1, Ordering::SeqCst) + 1;
                    if seen >= AUTH_PING_THRESHOLD
                        && self.state() == ConnectionState::Registering
                    {
                        // The Core is alive but holding the register
                        // reply: it is waiting on the user. The pending
                        // register call stays armed.
                        self.set_state(ConnectionState::AwaitingAuthorization);
                    }
                }
                self.reply(MooMessageBuilder::complete(id, "Success"));
            }
            _ => {
                tracing::warn!("unhandled inbound request: {}", msg.name);
                self.reply(
                    MooMessageBuilder::complete(id, "InvalidRequest")
                        .body_json(json!({ "error": format!("unknown request: {}", msg.name) })),
                );
            }
        }
    }

    fn reply(&self, builder: MooMessageBuilder) {
        match builder.build() {
            Ok(bytes) => {
                let _ = self.send_bytes(bytes);
            }
            Err(e) => tracing::debug!("failed to encode reply: {e}"),
        }
    }

    /// Route a CONTINUE/COMPLETE frame to its pending caller or its
    /// subscription channel. The pending map removal is the atomic
    /// claim: whichever path removes the entry resumes the caller, and
    /// nothing else can.
    fn route_response(&self, msg: MooMessage) {
        let id = msg.request_id;
        let response = RoonResponse::from_message(msg);
        crate::logging::frame_trace(|| format!("response {} for id {id}", response.name));

        if let Some(tx) = lock(&self.pending).remove(&id) {
            let _ = tx.send(Ok(response));
            return;
        }

        let mut subscriptions = lock(&self.subscriptions);
        if response.is_final {
            if let Some(entry) = subscriptions.remove(&id) {
                drop(subscriptions);
                // Yield the terminating frame, then the dropped sender
                // finishes the stream.
                let _ = entry.sender.send(response);
            }
        } else if let Some(entry) = subscriptions.get(&id) {
            if entry.sender.send(response).is_err() {
                subscriptions.remove(&id);
            }
        } else {
            tracing::trace!("response for unknown request id {id}");
        }
    }
}

async fn receive_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>, epoch: u64) {
    let mut parser = MooParser::new();

    loop {
        match transport.receive().await {
            Ok(frame) => {
                shared.touch();
                let data = frame.into_bytes();
                let mut chunk: &[u8] = &data;
                loop {
                    match parser.feed(chunk) {
                        Ok(Some(msg)) => {
                            chunk = &[];
                            shared.dispatch(msg);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // A garbled frame is dropped; only a
                            // transport failure ends the connection.
                            tracing::warn!("dropping undecodable frame: {e}");
                            parser.clear();
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!("receive loop ending: {e}");
                break;
            }
        }
    }

    if shared.epoch.load(Ordering::SeqCst) != epoch {
        return;
    }

    let was_connected = matches!(shared.state(), ConnectionState::Connected { .. });
    shared.fail_all_pending();
    shared.finish_all_subscriptions();

    if was_connected {
        shared.set_state(ConnectionState::Reconnecting { attempt: 1 });
        shared.spawn_reconnect();
    }
}

/// Enforces the maximum silence between inbound frames. Elapsed time is
/// measured against `SystemTime` so a laptop waking from sleep observes
/// the full gap and reconnects instead of trusting a dead socket.
async fn watchdog_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>, epoch: u64) {
    let keepalive = shared.config.keepalive;

    loop {
        let last = shared.last_rx_millis.load(Ordering::SeqCst);
        let elapsed = Duration::from_millis(now_millis().saturating_sub(last));
        if elapsed >= keepalive {
            if shared.epoch.load(Ordering::SeqCst) == epoch {
                tracing::warn!(
                    "no frames for {elapsed:?} (keepalive {keepalive:?}), forcing reconnect"
                );
                let _ = transport.close(1001, Some("keepalive timeout".into())).await;
            }
            return;
        }
        tokio::time::sleep(keepalive - elapsed).await;
        if shared.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
    }
}

/// `service/subscribe_x` pairs with `service/unsubscribe_x`.
fn unsubscribe_path_for(path: &str) -> Option<String> {
    let (service, method) = path.split_once('/')?;
    method
        .strip_prefix("subscribe_")
        .map(|suffix| format!("{service}/unsubscribe_{suffix}"))
}
