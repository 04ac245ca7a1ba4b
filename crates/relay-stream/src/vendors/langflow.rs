use serde_json::{Map, Value};

use super::describe_error;
use crate::request::BotPayload;
use crate::signal::NormalizedSignal;

const USER_SENDER: &str = "user";

pub(super) fn decode(value: &Value) -> NormalizedSignal {
    let Some(event) = value.get("event").and_then(Value::as_str) else {
        return NormalizedSignal::Ignore;
    };
    let data = value.get("data").unwrap_or(&Value::Null);
    match event {
        "add_message" => {
            if is_user_authored(data) {
                return NormalizedSignal::Ignore;
            }
            match data.get("text").and_then(Value::as_str) {
                Some(text) => NormalizedSignal::text(text),
                None => NormalizedSignal::Ignore,
            }
        }
        "token" => match token_text(data) {
            Some(text) => NormalizedSignal::text(text),
            None => NormalizedSignal::Ignore,
        },
        "error" => NormalizedSignal::StreamError(describe_error(data)),
        "end" => NormalizedSignal::EndOfStream,
        _ => NormalizedSignal::Ignore,
    }
}

fn is_user_authored(data: &Value) -> bool {
    ["sender", "sender_name"].iter().any(|key| {
        data.get(*key)
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case(USER_SENDER))
    })
}

// Token events carry the text in `chunk`; some builds send it as a string `token`.
fn token_text(data: &Value) -> Option<&str> {
    data.get("token")
        .and_then(Value::as_str)
        .or_else(|| data.get("chunk").and_then(Value::as_str))
}

pub(super) fn convert_response(value: &Value) -> Option<String> {
    let first_output = value
        .get("outputs")?
        .get(0)?
        .get("outputs")?
        .get(0)?;

    let candidates = [
        first_output.pointer("/results/message/text"),
        first_output.pointer("/results/message/data/text"),
        first_output.pointer("/outputs/message/message"),
        first_output.pointer("/artifacts/message"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(ToOwned::to_owned))
}

pub(super) fn extend_body(body: &mut Map<String, Value>, payload: &BotPayload) {
    body.insert("input_value".into(), Value::from(payload.message.as_str()));
    body.insert("input_type".into(), Value::from("chat"));
    body.insert("output_type".into(), Value::from("chat"));
    body.insert("session".into(), Value::from(payload.session_id.as_str()));
}
