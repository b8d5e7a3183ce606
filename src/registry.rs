//! Registration records and registry response parsing.

use crate::error::{Result, RoonError};
use serde_json::{json, Value};

/// Well-known service ids used in registration.
pub mod services {
    pub const TRANSPORT: &str = "com.roonlabs.transport:2";
    pub const BROWSE: &str = "com.roonlabs.browse:1";
    pub const IMAGE: &str = "com.roonlabs.image:1";
    pub const PING: &str = "com.roonlabs.ping:1";
}

/// The extension identity sent in the register request.
#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    pub extension_id: String,
    pub display_name: String,
    pub display_version: String,
    pub publisher: String,
    pub email: String,
    pub website: Option<String>,
    pub required_services: Vec<String>,
    pub optional_services: Vec<String>,
    pub provided_services: Vec<String>,
}

impl RegistrationRecord {
    /// A record with the standard service sets: transport and browse
    /// required, ping provided.
    pub fn new(
        extension_id: impl Into<String>,
        display_name: impl Into<String>,
        display_version: impl Into<String>,
        publisher: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            display_name: display_name.into(),
            display_version: display_version.into(),
            publisher: publisher.into(),
            email: email.into(),
            website: None,
            required_services: vec![
                services::TRANSPORT.to_string(),
                services::BROWSE.to_string(),
            ],
            optional_services: vec![services::IMAGE.to_string()],
            provided_services: vec![services::PING.to_string()],
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    /// Body for `com.roonlabs.registry:1/register`, carrying `token`
    /// when one is remembered for this Core.
    pub fn register_body(&self, token: Option<&str>) -> Value {
        let mut body = json!({
            "extension_id": self.extension_id,
            "display_name": self.display_name,
            "display_version": self.display_version,
            "publisher": self.publisher,
            "email": self.email,
            "required_services": self.required_services,
            "optional_services": self.optional_services,
            "provided_services": self.provided_services,
        });
        if let Some(website) = &self.website {
            body["website"] = json!(website);
        }
        if let Some(token) = token {
            body["token"] = json!(token);
        }
        body
    }
}

/// Parsed `registry:1/info` response body.
#[derive(Debug, Clone)]
pub struct CoreInfo {
    pub core_id: String,
    pub display_name: Option<String>,
    pub display_version: Option<String>,
}

impl CoreInfo {
    pub(crate) fn from_body(body: Option<&Value>) -> Result<Self> {
        let body = body.ok_or_else(|| RoonError::RegistrationFailed("info reply had no body".into()))?;
        let core_id = string_field(body, "core_id")
            .ok_or_else(|| RoonError::RegistrationFailed("info reply missing core_id".into()))?;
        Ok(Self {
            core_id,
            display_name: string_field(body, "display_name"),
            display_version: string_field(body, "display_version"),
        })
    }
}

/// Parsed `Registered` response body.
#[derive(Debug, Clone)]
pub struct RegisteredCore {
    pub core_id: String,
    pub display_name: String,
    pub display_version: Option<String>,
    pub token: Option<String>,
    pub provided_services: Vec<String>,
}

impl RegisteredCore {
    pub(crate) fn from_body(body: Option<&Value>) -> Result<Self> {
        let body = body
            .ok_or_else(|| RoonError::RegistrationFailed("register reply had no body".into()))?;
        let core_id = string_field(body, "core_id")
            .ok_or_else(|| RoonError::RegistrationFailed("register reply missing core_id".into()))?;
        let provided_services = body
            .get("provided_services")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            core_id,
            display_name: string_field(body, "display_name").unwrap_or_default(),
            display_version: string_field(body, "display_version"),
            token: string_field(body, "token"),
            provided_services,
        })
    }
}

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}
