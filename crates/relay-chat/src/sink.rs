use serde::{Deserialize, Serialize};

use crate::registry::TaskKey;

/// Identifier of a chat message owned by the sink.
pub type MessageId = uuid::Uuid;

/// Final state recorded for a relayed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Success,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("message not found: {0}")]
    NotFound(MessageId),
    #[error("sink error: {0}")]
    Other(String),
}

/// Persistence and broadcast side of the relay (chat message store plus
/// subscriber push).
#[async_trait::async_trait]
pub trait ChatSink: Send + Sync {
    /// Creates the empty message that streamed text is attached to.
    async fn create_placeholder(&self, task: &TaskKey) -> Result<MessageId, SinkError>;

    /// Pushes newly appended text to subscribers.
    async fn push_delta(&self, message: MessageId, delta: &str) -> Result<(), SinkError>;

    /// Stores the final text and status.
    async fn persist(
        &self,
        message: MessageId,
        text: &str,
        status: MessageStatus,
    ) -> Result<(), SinkError>;

    /// Deletes a placeholder that never received a reply.
    async fn remove(&self, message: MessageId) -> Result<(), SinkError>;
}
