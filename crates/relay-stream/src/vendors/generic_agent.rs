use serde_json::{Map, Value};

use super::{AdapterSettings, describe_error};
use crate::request::BotPayload;
use crate::signal::NormalizedSignal;

/// Key holding the user's message when no override is configured.
pub const DEFAULT_INPUT_KEY: &str = "input";
/// Key holding the reply text when no override is configured.
pub const DEFAULT_OUTPUT_KEY: &str = "output";

pub(super) fn decode(value: &Value, settings: &AdapterSettings) -> NormalizedSignal {
    if !value.is_object() {
        return NormalizedSignal::Ignore;
    }
    if let Some(error) = value.get("error").filter(|v| !v.is_null()) {
        return NormalizedSignal::StreamError(describe_error(error));
    }
    // Text wins over an end marker in the same object; the transport end
    // still closes the session.
    if let Some(text) = value.get(settings.output_key()).and_then(Value::as_str) {
        return NormalizedSignal::text(text);
    }
    let ended = value.get("event").and_then(Value::as_str) == Some("end")
        || value.get("done").and_then(Value::as_bool) == Some(true);
    if ended {
        return NormalizedSignal::EndOfStream;
    }
    NormalizedSignal::Ignore
}

pub(super) fn convert_response(value: &Value, settings: &AdapterSettings) -> Option<String> {
    value
        .get(settings.output_key())
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

pub(super) fn extend_body(
    body: &mut Map<String, Value>,
    payload: &BotPayload,
    settings: &AdapterSettings,
) {
    body.insert(
        settings.input_key().to_string(),
        Value::from(payload.message.as_str()),
    );
}
