//! Message types for the MOO/1 protocol.

use crate::error::{Result, RoonError};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// MOO/1 protocol verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MooVerb {
    /// Initial request message.
    Request,
    /// Streaming response; more follow.
    Continue,
    /// Final response; terminates the request.
    Complete,
}

impl MooVerb {
    /// Wire representation of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            MooVerb::Request => "REQUEST",
            MooVerb::Continue => "CONTINUE",
            MooVerb::Complete => "COMPLETE",
        }
    }
}

impl FromStr for MooVerb {
    type Err = RoonError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "REQUEST" => Ok(MooVerb::Request),
            "CONTINUE" => Ok(MooVerb::Continue),
            "COMPLETE" => Ok(MooVerb::Complete),
            _ => Err(RoonError::InvalidVerb(s.to_string())),
        }
    }
}

impl fmt::Display for MooVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body content of a MOO/1 message.
#[derive(Debug, Clone)]
pub enum MooBody {
    /// Parsed application/json body.
    Json(serde_json::Value),
    /// Raw bytes of any other content type.
    Binary(Bytes),
}

impl MooBody {
    /// Get the body as JSON if it is one.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            MooBody::Json(v) => Some(v),
            MooBody::Binary(_) => None,
        }
    }

    /// Content-Type emitted for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            MooBody::Json(_) => "application/json",
            MooBody::Binary(_) => "application/octet-stream",
        }
    }
}

/// A decoded MOO/1 message.
///
/// For REQUEST frames `name` is a slash-delimited service path
/// (`com.roonlabs.transport:2/control`); for CONTINUE/COMPLETE frames it
/// is a status token (`Success`, `Changed`, ...).
#[derive(Debug, Clone)]
pub struct MooMessage {
    pub verb: MooVerb,
    /// Signed on the wire; the client only ever issues non-negative ids.
    pub request_id: i64,
    pub name: String,
    /// Headers other than Request-Id / Content-Type / Content-Length.
    pub headers: HashMap<String, String>,
    pub content_type: Option<String>,
    pub body: Option<MooBody>,
}

impl MooMessage {
    pub fn request(request_id: i64, name: impl Into<String>) -> Self {
        Self::new(MooVerb::Request, request_id, name)
    }

    pub fn continue_msg(request_id: i64, name: impl Into<String>) -> Self {
        Self::new(MooVerb::Continue, request_id, name)
    }

    pub fn complete(request_id: i64, name: impl Into<String>) -> Self {
        Self::new(MooVerb::Complete, request_id, name)
    }

    fn new(verb: MooVerb, request_id: i64, name: impl Into<String>) -> Self {
        Self {
            verb,
            request_id,
            name: name.into(),
            headers: HashMap::new(),
            content_type: None,
            body: None,
        }
    }

    /// Set the body to a JSON value.
    pub fn with_json_body(mut self, value: serde_json::Value) -> Self {
        self.body = Some(MooBody::Json(value));
        self
    }

    /// Get the JSON body if present.
    pub fn body_json(&self) -> Option<&serde_json::Value> {
        self.body.as_ref().and_then(|b| b.as_json())
    }

    /// Split a REQUEST name into service and method.
    /// `com.roonlabs.ping:1/ping` yields `("com.roonlabs.ping:1", "ping")`.
    pub fn service_method(&self) -> Option<(&str, &str)> {
        self.name.split_once('/')
    }
}

/// Names the Core uses for non-error responses.
const SUCCESS_NAMES: &[&str] = &["Success", "Registered", "Subscribed", "Changed", "Unsubscribed"];

/// A response delivered to a caller or a subscription stream.
///
/// This is the caller-facing view of a CONTINUE/COMPLETE frame: the
/// status name, the parsed JSON body, and whether the frame terminated
/// the request.
#[derive(Debug, Clone)]
pub struct RoonResponse {
    pub name: String,
    pub body: Option<serde_json::Value>,
    /// True for COMPLETE frames.
    pub is_final: bool,
}

impl RoonResponse {
    pub(crate) fn from_message(msg: MooMessage) -> Self {
        let is_final = msg.verb == MooVerb::Complete;
        Self {
            name: msg.name,
            body: msg.body.and_then(|b| match b {
                MooBody::Json(v) => Some(v),
                MooBody::Binary(_) => None,
            }),
            is_final,
        }
    }

    /// Whether the response name is one of the well-known successes.
    pub fn is_success(&self) -> bool {
        SUCCESS_NAMES.contains(&self.name.as_str())
    }

    /// Error message for a non-success response: `body.error` if present,
    /// else the response name itself.
    pub fn error_message(&self) -> String {
        self.body
            .as_ref()
            .and_then(|b| b.get("error"))
            .and_then(|e| e.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.name.clone())
    }

    /// Deserialize the body into a typed value.
    pub fn body_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        let body = self
            .body
            .clone()
            .unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(body)?)
    }
}
