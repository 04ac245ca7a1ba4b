//! Chunk decoder for blank-line separated JSON streams.
//!
//! Vendors stream one JSON object per `\n\n` separated segment, but the
//! transport is free to cut the body anywhere. Segments that do not parse yet
//! are kept in [`DecoderState`] and retried with the next segment.

use serde_json::Value;

const SEGMENT_SEPARATOR: &str = "\n\n";

/// Pending fragments for one stream. Owned by a single session.
#[derive(Debug, Default)]
pub struct DecoderState {
    pending: Vec<String>,
    utf8_carry: Vec<u8>,
}

impl DecoderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no fragment is waiting for completion.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.utf8_carry.is_empty()
    }

    fn pending_text(&self) -> String {
        self.pending.concat()
    }
}

/// Decodes one text chunk into the complete JSON objects it finishes.
pub fn decode_chunk(state: &mut DecoderState, chunk: &str) -> Vec<Value> {
    let mut decoded = Vec::new();
    if chunk.trim().is_empty() {
        return decoded;
    }

    for segment in chunk.split(SEGMENT_SEPARATOR) {
        if segment.trim().is_empty() {
            continue;
        }
        if !segment.trim_end().ends_with('}') {
            state.pending.push(segment.to_string());
            continue;
        }

        let mut candidate = state.pending_text();
        candidate.push_str(segment);
        match serde_json::from_str::<Value>(&candidate) {
            Ok(value) => {
                state.pending.clear();
                decoded.push(value);
            }
            // A `}` inside a nested object, not the end of the message.
            Err(_) => state.pending.push(segment.to_string()),
        }
    }
    decoded
}

/// Decodes raw transport bytes, holding back an incomplete trailing UTF-8
/// sequence until the next call.
pub fn decode_bytes(state: &mut DecoderState, bytes: &[u8]) -> Vec<Value> {
    let mut data = std::mem::take(&mut state.utf8_carry);
    data.extend_from_slice(bytes);

    let complete = match std::str::from_utf8(&data) {
        Ok(_) => data.len(),
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(_) => data.len(),
    };
    state.utf8_carry = data.split_off(complete);

    let text = String::from_utf8_lossy(&data);
    decode_chunk(state, &text)
}

/// Makes one last attempt at the buffered fragments when the stream ends.
///
/// Whatever does not parse is dropped. The state is empty afterwards.
pub fn flush(state: &mut DecoderState) -> Option<Value> {
    let carry = std::mem::take(&mut state.utf8_carry);
    if !carry.is_empty() {
        state.pending.push(String::from_utf8_lossy(&carry).into_owned());
    }
    if state.pending.is_empty() {
        return None;
    }
    let candidate = state.pending_text();
    state.pending.clear();
    if candidate.trim().is_empty() {
        return None;
    }
    serde_json::from_str::<Value>(&candidate).ok()
}
