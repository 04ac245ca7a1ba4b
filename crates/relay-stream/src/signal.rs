/// Vendor-agnostic classification of one decoded stream object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedSignal {
    /// Assistant-authored text, either a delta or the full text so far.
    TextChunk(String),
    /// The vendor finished the response.
    EndOfStream,
    /// The vendor reported a failure inside the stream.
    StreamError(String),
    /// Nothing for the relay to do (echoes, metadata, unknown events).
    Ignore,
}

impl NormalizedSignal {
    pub(crate) fn text(text: &str) -> Self {
        if text.is_empty() {
            Self::Ignore
        } else {
            Self::TextChunk(text.to_string())
        }
    }
}
