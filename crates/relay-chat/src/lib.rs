//! Chat-side relay: forwards bot replies into chat messages.
//!
//! [`RelayOrchestrator`] drives a [`relay_stream::StreamSession`] per task,
//! collapses cumulative vendor chunks into deltas for subscribers, and stores
//! the final text through a [`ChatSink`]. At most one task per [`TaskKey`] runs
//! at a time; starting a new one cancels the old.

/// Accumulated text of a streaming reply.
pub mod message;
/// Process-wide logging setup.
pub mod observability;
/// Relay flows for streaming and non-streaming bot requests.
pub mod orchestrator;
/// Active task cancellation slots.
pub mod registry;
/// Message store and broadcast seam.
pub mod sink;

pub use message::RunningMessage;
pub use observability::init_observability;
pub use orchestrator::{RelayOrchestrator, RelayOutcome};
pub use registry::{TaskKey, TaskRegistry};
pub use sink::{ChatSink, MessageId, MessageStatus, SinkError};
