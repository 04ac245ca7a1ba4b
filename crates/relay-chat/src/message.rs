/// Reply text accumulated from one stream session.
///
/// Vendors either send pure deltas or resend the full text so far. A chunk
/// that starts with everything accumulated is treated as a resend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunningMessage {
    accumulated_text: String,
    last_emitted_text: String,
}

impl RunningMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one text chunk in and returns the delta to broadcast, or `None`
    /// when nothing new was added.
    pub fn apply_chunk(&mut self, chunk: &str) -> Option<String> {
        let delta = if !self.accumulated_text.is_empty()
            && chunk.starts_with(self.accumulated_text.as_str())
        {
            let delta = chunk[self.accumulated_text.len()..].to_string();
            self.accumulated_text = chunk.to_string();
            delta
        } else {
            self.accumulated_text.push_str(chunk);
            chunk.to_string()
        };

        if delta.is_empty() || self.accumulated_text == self.last_emitted_text {
            return None;
        }
        self.last_emitted_text.clone_from(&self.accumulated_text);
        Some(delta)
    }

    pub fn text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn has_text(&self) -> bool {
        !self.accumulated_text.is_empty()
    }

    pub fn into_text(self) -> String {
        self.accumulated_text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_deltas_are_appended() {
        let mut message = RunningMessage::new();
        assert_eq!(message.apply_chunk("Hel").as_deref(), Some("Hel"));
        assert_eq!(message.apply_chunk("lo").as_deref(), Some("lo"));
        assert_eq!(message.text(), "Hello");
    }

    #[test]
    fn cumulative_resend_broadcasts_only_the_suffix() {
        let mut message = RunningMessage::new();
        assert_eq!(message.apply_chunk("Hello").as_deref(), Some("Hello"));
        assert_eq!(message.apply_chunk("Hello world").as_deref(), Some(" world"));
        assert_eq!(message.text(), "Hello world");
    }

    #[test]
    fn identical_resend_is_suppressed() {
        let mut message = RunningMessage::new();
        message.apply_chunk("Done.");
        assert_eq!(message.apply_chunk("Done."), None);
        assert_eq!(message.text(), "Done.");
    }

    #[test]
    fn empty_chunk_changes_nothing() {
        let mut message = RunningMessage::new();
        assert_eq!(message.apply_chunk(""), None);
        assert!(!message.has_text());
    }
}
