//! Error types for the Roon client.

use std::fmt;

/// Result type alias for connection and service operations.
pub type Result<T> = std::result::Result<T, RoonError>;

/// Errors produced by the MOO/1 codec, the connection engine, and the
/// command services.
#[derive(Debug, thiserror::Error)]
pub enum RoonError {
    /// The frame is not a well-formed MOO/1 message.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// The frame has no Request-Id header.
    #[error("missing request id")]
    MissingRequestId,

    /// The Request-Id header is not an integer.
    #[error("invalid request id: {0}")]
    InvalidRequestId(String),

    /// The first line carries an unknown verb.
    #[error("invalid verb: {0}")]
    InvalidVerb(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint is not a usable ws:// URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The transport could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection is closed or was closed while the operation was
    /// outstanding.
    #[error("connection closed{}", closed_suffix(.code, .reason))]
    ConnectionClosed {
        code: Option<u16>,
        reason: Option<String>,
    },

    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The Core rejected the registration or sent an unparseable reply.
    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    /// The reconnector ran out of attempts.
    #[error("maximum reconnect attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// A zone-scoped command was issued with no zone selected.
    #[error("no zone selected")]
    NoZoneSelected,

    /// The Core rejected a command.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// A browse call failed.
    #[error("browse failed: {0}")]
    BrowseFailed(String),

    /// A load call failed.
    #[error("load failed: {0}")]
    LoadFailed(String),
}

impl RoonError {
    /// Create an invalid-format error.
    pub fn invalid_format(msg: impl fmt::Display) -> Self {
        RoonError::InvalidFormat(msg.to_string())
    }

    /// A locally-detected closed connection (no close frame observed).
    pub(crate) fn closed_locally(reason: impl Into<String>) -> Self {
        RoonError::ConnectionClosed {
            code: None,
            reason: Some(reason.into()),
        }
    }
}

fn closed_suffix(code: &Option<u16>, reason: &Option<String>) -> String {
    match (code, reason) {
        (Some(c), Some(r)) => format!(" (code {c}: {r})"),
        (Some(c), None) => format!(" (code {c})"),
        (None, Some(r)) => format!(" ({r})"),
        (None, None) => String::new(),
    }
}

/// Errors produced by SOOD discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Discovery finished without finding any Core.
    #[error("no cores found")]
    NoCoresFound,

    /// Discovery timed out before completing a probe cycle.
    #[error("discovery timed out")]
    Timeout,

    /// UDP socket setup or I/O failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// A SOOD frame could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// No usable network interface.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
}

/// Errors produced by the HTTP image client.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// The image key is empty or malformed.
    #[error("invalid image key")]
    InvalidImageKey,

    /// A scale mode was requested without both width and height.
    #[error("scale requires width and height")]
    MissingScaleDimensions,

    /// Network-level failure while fetching.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with something that is not an image.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Non-success HTTP status.
    #[error("http error: status {status}")]
    Http { status: u16 },
}
