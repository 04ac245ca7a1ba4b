use serde_json::{Map, Value};

use super::describe_error;
use crate::request::BotPayload;
use crate::signal::NormalizedSignal;

pub(super) fn decode(value: &Value) -> NormalizedSignal {
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return NormalizedSignal::Ignore;
    };
    match kind {
        "item" => match value.get("content").and_then(Value::as_str) {
            Some(text) => NormalizedSignal::text(text),
            None => NormalizedSignal::Ignore,
        },
        "error" => {
            let payload = value
                .get("content")
                .filter(|v| !v.is_null())
                .or_else(|| value.get("message"))
                .unwrap_or(&Value::Null);
            NormalizedSignal::StreamError(describe_error(payload))
        }
        "end" => NormalizedSignal::EndOfStream,
        _ => NormalizedSignal::Ignore,
    }
}

pub(super) fn convert_response(value: &Value) -> Option<String> {
    let item = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    item.get("output")
        .or_else(|| item.get("text"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

pub(super) fn extend_body(body: &mut Map<String, Value>, payload: &BotPayload) {
    body.insert("input_value".into(), Value::from(payload.message.as_str()));
    body.insert("chatInput".into(), Value::from(payload.message.as_str()));
    body.insert("sessionId".into(), Value::from(payload.session_id.as_str()));
    body.insert("action".into(), Value::from("sendMessage"));
}
