//! Vendor response adapters.
//!
//! Each backend family streams its own JSON shape. [`VendorKind`] selects the
//! pure mapping from one decoded object to a [`NormalizedSignal`], the
//! non-streaming response conversion, and the request body layout.
mod generic_agent;
mod langflow;
mod n8n;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::{BotEndpoint, BotPayload, StreamRequest};
use crate::signal::NormalizedSignal;

pub use generic_agent::{DEFAULT_INPUT_KEY, DEFAULT_OUTPUT_KEY};

/// Run type every bot backend receives for relay-originated calls.
pub const RUN_TYPE: &str = "internal_bot";

/// Closed set of supported bot backend families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorKind {
    /// `{event, data}` objects (`add_message`, `token`, `error`, `end`).
    Langflow,
    /// `{type, content}` objects (`begin`, `item`, `error`, `end`).
    N8n,
    /// Flat objects keyed by configurable input/output field names.
    GenericAgent,
}

impl VendorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Langflow => "langflow",
            Self::N8n => "n8n",
            Self::GenericAgent => "generic_agent",
        }
    }

    /// Maps one decoded stream object to a signal. Never fails; shapes the
    /// adapter does not recognize become [`NormalizedSignal::Ignore`].
    pub fn decode(&self, value: &Value, settings: &AdapterSettings) -> NormalizedSignal {
        match self {
            Self::Langflow => langflow::decode(value),
            Self::N8n => n8n::decode(value),
            Self::GenericAgent => generic_agent::decode(value, settings),
        }
    }

    /// Extracts the reply text from a non-streaming response body.
    pub fn convert_response(&self, value: &Value, settings: &AdapterSettings) -> Option<String> {
        match self {
            Self::Langflow => langflow::convert_response(value),
            Self::N8n => n8n::convert_response(value),
            Self::GenericAgent => generic_agent::convert_response(value, settings),
        }
    }

    /// Builds the `POST <base>?stream=<bool>` request for this vendor.
    pub fn build_request(
        &self,
        endpoint: &BotEndpoint,
        payload: &BotPayload,
        stream: bool,
    ) -> StreamRequest {
        let mut body = payload.rest_data.clone();
        body.insert("session_id".into(), Value::from(payload.session_id.as_str()));
        body.insert("run_type".into(), Value::from(RUN_TYPE));
        body.insert("uid".into(), Value::from(payload.uid.as_str()));
        body.insert(
            "tweaks".into(),
            serde_json::json!({ "one_time_token": payload.one_time_token }),
        );
        match self {
            Self::Langflow => langflow::extend_body(&mut body, payload),
            Self::N8n => n8n::extend_body(&mut body, payload),
            Self::GenericAgent => generic_agent::extend_body(&mut body, payload, &endpoint.settings),
        }

        let mut headers = Vec::new();
        if let Some(api_key) = endpoint.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            headers.push(match self {
                Self::Langflow => ("x-api-key".to_string(), api_key.to_string()),
                Self::N8n | Self::GenericAgent => {
                    ("Authorization".to_string(), format!("Bearer {api_key}"))
                }
            });
        }
        headers.extend(endpoint.headers.iter().cloned());

        StreamRequest {
            url: endpoint.url(stream),
            headers,
            body: Value::Object(body),
            settings: endpoint.settings.clone(),
        }
    }
}

impl fmt::Display for VendorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VendorKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "langflow" => Ok(Self::Langflow),
            "n8n" => Ok(Self::N8n),
            "generic_agent" | "generic-agent" | "agent" => Ok(Self::GenericAgent),
            other => Err(format!("unknown vendor: {other}")),
        }
    }
}

/// Per-endpoint adapter settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// Key holding the user's message. Defaults to [`DEFAULT_INPUT_KEY`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_key: Option<String>,
    /// Key holding the reply text. Defaults to [`DEFAULT_OUTPUT_KEY`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

impl AdapterSettings {
    pub fn input_key(&self) -> &str {
        non_empty(self.input_key.as_deref()).unwrap_or(DEFAULT_INPUT_KEY)
    }

    pub fn output_key(&self) -> &str {
        non_empty(self.output_key.as_deref()).unwrap_or(DEFAULT_OUTPUT_KEY)
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Best-effort human-readable message from an error payload.
pub(crate) fn describe_error(payload: &Value) -> String {
    let text = match payload {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["message", "error", "text", "detail"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Object(_) => Some(describe_error(v)),
                _ => None,
            })
            .or_else(|| Some(payload.to_string())),
        other => Some(other.to_string()),
    };
    text.filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "unknown vendor error".to_string())
}
