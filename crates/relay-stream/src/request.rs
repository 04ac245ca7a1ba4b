use serde::{Deserialize, Serialize};

use crate::vendors::AdapterSettings;

/// One outbound request to a bot backend.
///
/// Built once by [`VendorKind::build_request`](crate::VendorKind::build_request)
/// and moved into the session that sends it.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
    pub settings: AdapterSettings,
}

/// Where and how to reach one bot backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotEndpoint {
    /// Run endpoint, without the `stream` query parameter.
    pub base_url: String,
    /// Optional API key, sent in the vendor's preferred header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Key remapping for generic agent backends.
    #[serde(default)]
    pub settings: AdapterSettings,
}

impl BotEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn settings(mut self, settings: AdapterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub(crate) fn url(&self, stream: bool) -> String {
        let base = self.base_url.trim_end_matches('/');
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}stream={stream}")
    }
}

/// Message content and call context for one bot invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BotPayload {
    /// The end user's message text.
    pub message: String,
    /// Conversation identifier forwarded to the vendor.
    pub session_id: String,
    /// Identifier of the calling user.
    pub uid: String,
    /// Single-use token the bot presents when calling back into the app.
    pub one_time_token: String,
    /// Free-form fields merged into the request body.
    #[serde(default)]
    pub rest_data: serde_json::Map<String, serde_json::Value>,
}

impl BotPayload {
    pub fn new(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn one_time_token(mut self, token: impl Into<String>) -> Self {
        self.one_time_token = token.into();
        self
    }

    pub fn rest(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.rest_data.insert(key.into(), value);
        self
    }
}
