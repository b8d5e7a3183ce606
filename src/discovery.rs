//! SOOD discovery: locate Roon Cores on the local network.
//!
//! SOOD is a small UDP probe protocol, independent of the MOO channel.
//! A query is broadcast/multicast to port 9003 and each Core answers
//! with a property frame naming itself and its HTTP/WebSocket port.

use crate::error::DiscoveryError;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;

const SOOD_MAGIC: &[u8; 4] = b"SOOD";
const SOOD_VERSION: u8 = 0x02;
const KIND_QUERY: u8 = b'Q';
const KIND_RESPONSE: u8 = b'X';

const SOOD_PORT: u16 = 9003;
const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 90, 90);
const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

/// Port a Core serves HTTP and WebSocket on when it does not advertise
/// one.
const DEFAULT_HTTP_PORT: u16 = 9100;

type Result<T> = std::result::Result<T, DiscoveryError>;

/// Discovery parameters.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Total time to listen for responses.
    pub timeout: Duration,
    /// Interval between repeated query sends.
    pub query_interval: Duration,
    /// Return as soon as the first Core answers.
    pub stop_on_first: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            query_interval: Duration::from_secs(2),
            stop_on_first: false,
        }
    }
}

/// A Core that answered a SOOD query.
#[derive(Debug, Clone)]
pub struct DiscoveredCore {
    pub host: String,
    /// HTTP/WebSocket port to connect to.
    pub port: u16,
    pub core_id: Option<String>,
    pub display_name: Option<String>,
    /// Transaction id of the query this response answered.
    pub transaction_id: String,
    pub discovered_at: SystemTime,
}

/// A parsed SOOD frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SoodFrame {
    pub kind: u8,
    pub properties: Vec<(String, Option<String>)>,
}

impl SoodFrame {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }
}

/// Encode a frame: `"SOOD" 0x02 <kind>` followed by properties, each as
/// a 1-byte name length, the name, a 2-byte big-endian value length
/// (0xFFFF = null, 0x0000 = empty), and the value bytes.
pub(crate) fn encode_frame(kind: u8, properties: &[(&str, Option<&str>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SOOD_MAGIC);
    out.push(SOOD_VERSION);
    out.push(kind);
    for (name, value) in properties {
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        match value {
            None => out.extend_from_slice(&0xFFFFu16.to_be_bytes()),
            Some(value) => {
                out.extend_from_slice(&(value.len() as u16).to_be_bytes());
                out.extend_from_slice(value.as_bytes());
            }
        }
    }
    out
}

pub(crate) fn parse_frame(data: &[u8]) -> Result<SoodFrame> {
    if data.len() < 6 {
        return Err(DiscoveryError::Parse("frame too short".into()));
    }
    if &data[..4] != SOOD_MAGIC {
        return Err(DiscoveryError::Parse("missing sood magic".into()));
    }
    if data[4] != SOOD_VERSION {
        return Err(DiscoveryError::Parse(format!(
            "unsupported sood version {}",
            data[4]
        )));
    }
    let kind = data[5];

    let mut properties = Vec::new();
    let mut pos = 6;
    while pos < data.len() {
        let name_len = data[pos] as usize;
        pos += 1;
        if name_len == 0 || pos + name_len + 2 > data.len() {
            return Err(DiscoveryError::Parse("truncated property name".into()));
        }
        let name = std::str::from_utf8(&data[pos..pos + name_len])
            .map_err(|_| DiscoveryError::Parse("non-utf8 property name".into()))?
            .to_string();
        pos += name_len;

        let value_len = u16::from_be_bytes([data[pos], data[pos + 1]]);
        pos += 2;
        let value = match value_len {
            0xFFFF => None,
            0 => Some(String::new()),
            len => {
                let len = len as usize;
                if pos + len > data.len() {
                    return Err(DiscoveryError::Parse("truncated property value".into()));
                }
                let value = std::str::from_utf8(&data[pos..pos + len])
                    .map_err(|_| DiscoveryError::Parse("non-utf8 property value".into()))?
                    .to_string();
                pos += len;
                Some(value)
            }
        };
        properties.push((name, value));
    }

    Ok(SoodFrame { kind, properties })
}

fn core_from_response(frame: &SoodFrame, src: SocketAddr, transaction_id: &str) -> DiscoveredCore {
    // `_replyaddr`/`_replyport` override the datagram source the same
    // way: explicit reply properties win, then the advertised http
    // port, then the default.
    let host = frame
        .property("_replyaddr")
        .map(str::to_string)
        .unwrap_or_else(|| src.ip().to_string());
    let port = frame
        .property("_replyport")
        .and_then(|p| p.parse::<u16>().ok())
        .or_else(|| {
            frame
                .property("http_port")
                .and_then(|p| p.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_HTTP_PORT);
    DiscoveredCore {
        host,
        port,
        core_id: frame.property("_corid").map(str::to_string),
        display_name: frame.property("_displayname").map(str::to_string),
        transaction_id: transaction_id.to_string(),
        discovered_at: SystemTime::now(),
    }
}

/// Probe the local network for Cores.
///
/// Queries are re-sent every `query_interval` until `timeout` elapses
/// (or the first response when `stop_on_first` is set). Results are
/// deduplicated by `(host, port)`. Finishing with no responses is
/// `NoCoresFound`; a window that closes before a single query could be
/// delivered is `Timeout`.
pub async fn discover(config: DiscoveryConfig) -> Result<Vec<DiscoveredCore>> {
    let targets: Vec<SocketAddr> = vec![
        (MULTICAST_GROUP, SOOD_PORT).into(),
        (BROADCAST_ADDR, SOOD_PORT).into(),
    ];
    discover_with_targets(config, &targets).await
}

/// Discovery against explicit query targets; `discover` uses the
/// standard multicast and broadcast addresses.
pub async fn discover_with_targets(
    config: DiscoveryConfig,
    targets: &[SocketAddr],
) -> Result<Vec<DiscoveredCore>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| DiscoveryError::NetworkUnavailable(format!("udp bind failed: {e}")))?;
    socket
        .set_broadcast(true)
        .map_err(|e| DiscoveryError::Socket(format!("set broadcast failed: {e}")))?;
    // Multicast join is best-effort; broadcast still covers most LANs.
    if let Err(e) = socket.join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED) {
        tracing::debug!("multicast join failed: {e}");
    }

    let transaction_id = uuid::Uuid::new_v4().to_string();
    let query = encode_frame(KIND_QUERY, &[("_tid", Some(&transaction_id))]);

    let mut found = Vec::new();
    let mut seen: HashSet<(String, u16)> = HashSet::new();
    let mut buf = [0u8; 2048];
    let mut queries_sent = false;

    let mut resend = tokio::time::interval(config.query_interval);
    let deadline = tokio::time::sleep(config.timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => break,
            _ = resend.tick() => {
                let mut delivered = false;
                for target in targets {
                    match socket.send_to(&query, target).await {
                        Ok(_) => delivered = true,
                        Err(e) => tracing::debug!("sood query to {target} failed: {e}"),
                    }
                }
                if !delivered {
                    return Err(DiscoveryError::NetworkUnavailable(
                        "no query target reachable".into(),
                    ));
                }
                queries_sent = true;
            }
            received = socket.recv_from(&mut buf) => {
                let (len, src) = received
                    .map_err(|e| DiscoveryError::Socket(format!("udp receive failed: {e}")))?;
                let frame = match parse_frame(&buf[..len]) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::trace!("ignoring bad sood frame from {src}: {e}");
                        continue;
                    }
                };
                if frame.kind != KIND_RESPONSE {
                    continue;
                }
                // A response tagged with a different transaction answers
                // someone else's query.
                if let Some(tid) = frame.property("_tid") {
                    if tid != transaction_id {
                        continue;
                    }
                }
                let core = core_from_response(&frame, src, &transaction_id);
                if seen.insert((core.host.clone(), core.port)) {
                    tracing::debug!(host = %core.host, port = core.port, "discovered core");
                    found.push(core);
                    if config.stop_on_first {
                        return Ok(found);
                    }
                }
            }
        }
    }

    if found.is_empty() {
        // A window too short to even send a query is a timeout, not an
        // empty network.
        if queries_sent {
            Err(DiscoveryError::NoCoresFound)
        } else {
            Err(DiscoveryError::Timeout)
        }
    } else {
        Ok(found)
    }
}
