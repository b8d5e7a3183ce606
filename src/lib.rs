//! # roon-client
//!
//! A Rust client for the Roon music-system control protocol: MOO/1, an
//! HTTP-like bidirectional message protocol carried over a WebSocket.
//!
//! ## Overview
//!
//! The crate covers the full client lifecycle against a Roon Core:
//! - UDP discovery of Cores on the local network (SOOD)
//! - The registration handshake, with token-remembered re-registration
//! - Exactly-once request/response correlation with timeouts
//! - Server-pushed subscription streams (zones, outputs, play queue)
//! - A keepalive watchdog and bounded exponential-backoff reconnect
//! - Typed command services (transport, browse) and HTTP image fetching
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roon_client::{
//!     ConnectionConfig, MemoryTokenStore, RegistrationRecord, RoonConnection,
//!     TransportService, ZoneEvent,
//! };
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> roon_client::Result<()> {
//!     let registration = RegistrationRecord::new(
//!         "com.example.remote",
//!         "Example Remote",
//!         "1.0.0",
//!         "Example",
//!         "dev@example.com",
//!     );
//!     let tokens = Arc::new(MemoryTokenStore::new());
//!     let connection = RoonConnection::with_url(
//!         "ws://192.168.1.100:9100/api",
//!         ConnectionConfig::new(registration),
//!         tokens,
//!     )?;
//!     connection.connect().await?;
//!
//!     let transport = TransportService::new(connection.clone());
//!     let mut zones = transport.subscribe_zones().await?;
//!     while let Some(event) = zones.next().await {
//!         if let ZoneEvent::Subscribed { zones } = event {
//!             if let Some(zone) = zones.first() {
//!                 transport.select_zone(&zone.zone_id);
//!                 transport.play().await?;
//!             }
//!             break;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Discovery
//!
//! ```rust,no_run
//! use roon_client::discovery::{discover, DiscoveryConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DiscoveryConfig {
//!         timeout: Duration::from_secs(5),
//!         stop_on_first: true,
//!         ..DiscoveryConfig::default()
//!     };
//!     if let Ok(cores) = discover(config).await {
//!         for core in cores {
//!             println!("{}:{} {:?}", core.host, core.port, core.display_name);
//!         }
//!     }
//! }
//! ```
//!
//! ## Watching connection state
//!
//! ```rust,no_run
//! # use roon_client::{ConnectionConfig, MemoryTokenStore, RegistrationRecord, RoonConnection};
//! # use futures::StreamExt;
//! # use std::sync::Arc;
//! # async fn watch(connection: RoonConnection) {
//! let mut states = connection.state_stream();
//! while let Some(state) = states.next().await {
//!     println!("connection: {state:?}");
//! }
//! # }
//! ```
//!
//! ## Protocol
//!
//! MOO/1 frames are a text header plus an optional body:
//!
//! ```text
//! MOO/1 <VERB> <NAME>
//! Request-Id: <int>
//! Content-Type: application/json
//! Content-Length: <bytes>
//!
//! <body>
//! ```
//!
//! **Verbs:**
//! - `REQUEST`: a request; `NAME` is a `service/method` path
//! - `CONTINUE`: a streaming response, more follow
//! - `COMPLETE`: the final response for a request id
//!
//! Both sides issue requests: the Core calls back into the client (ping
//! keepalives), with its own independent id space.
//!
//! ## Features
//!
//! - `websocket` (default): the `tokio-tungstenite` transport

pub mod connection;
pub mod discovery;
pub mod error;
pub mod image;
pub mod logging;
pub mod message;
pub mod model;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod services;
pub mod subscription;
pub mod token_store;
pub mod transport;

pub use connection::{ConnectionConfig, ConnectionState, RoonConnection};
pub use discovery::{DiscoveredCore, DiscoveryConfig};
pub use error::{DiscoveryError, ImageError, Result, RoonError};
pub use image::{ImageClient, ImageData, ImageFormat, ImageOptions, ImageScale};
pub use logging::{set_verbose_logging, verbose_logging};
pub use message::{MooBody, MooMessage, MooVerb, RoonResponse};
pub use model::{
    BrowseItem, BrowseList, BrowseResult, Line, LoadResult, LoopSetting, NowPlaying, Output,
    PlaybackState, QueueItem, SourceControl, Volume, Zone, ZoneSeek, ZoneSettings,
};
pub use protocol::{MooMessageBuilder, MooParser};
pub use reconnect::{ReconnectConfig, Reconnector};
pub use registry::RegistrationRecord;
pub use services::{
    BrowseOpts, BrowseService, LoadOpts, OutputEvent, QueueEvent, TransportService, ZoneEvent,
};
pub use subscription::{EventStream, Subscription};
pub use token_store::{MemoryTokenStore, TokenStore};
pub use transport::{Transport, TransportFactory, TransportMessage};
