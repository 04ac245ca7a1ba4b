//! Relay orchestrator: turns bot responses into chat message updates.

use std::sync::Arc;

use relay_stream::{
    BotEndpoint, BotPayload, CancelToken, Handlers, RelayConfig, RelayError, SessionOutcome,
    StreamRequest, StreamSession, StreamTransport, TransportError, VendorKind,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::RunningMessage;
use crate::registry::{TaskKey, TaskRegistry};
use crate::sink::{ChatSink, MessageId, MessageStatus};

const EMPTY_REPLY: &str = "bot returned an empty response";

/// Final result of one relayed task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The reply was persisted with [`MessageStatus::Success`].
    Completed { text: String },
    /// The task was cancelled. `text` holds whatever was received (and
    /// persisted as aborted) before cancellation.
    Aborted { text: String },
    /// Nothing usable was produced; any placeholder was removed.
    Failed { message: String },
}

enum SessionEvent {
    Text(String),
    End,
    Error(String),
}

/// Drives bot requests for chat tasks, one active request per task key.
pub struct RelayOrchestrator {
    transport: Arc<dyn StreamTransport>,
    registry: TaskRegistry,
    sink: Arc<dyn ChatSink>,
    config: RelayConfig,
}

impl RelayOrchestrator {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        registry: TaskRegistry,
        sink: Arc<dyn ChatSink>,
        config: RelayConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            sink,
            config,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Cancels the running task for `key`, if any.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        self.registry.cancel(key)
    }

    /// Streams the bot reply for `key` into a chat message.
    ///
    /// Any earlier task with the same key is cancelled first. The key stays
    /// cancellable until the final message state is stored.
    pub async fn relay_stream(
        &self,
        key: TaskKey,
        vendor: VendorKind,
        endpoint: &BotEndpoint,
        payload: &BotPayload,
    ) -> RelayOutcome {
        let cancel = self.registry.register(key.clone());
        let outcome = self
            .relay_stream_inner(&key, vendor, endpoint, payload, &cancel)
            .await;
        self.registry.release(&key, &cancel);
        outcome
    }

    async fn relay_stream_inner(
        &self,
        key: &TaskKey,
        vendor: VendorKind,
        endpoint: &BotEndpoint,
        payload: &BotPayload,
        cancel: &CancelToken,
    ) -> RelayOutcome {
        let message_id = match self.sink.create_placeholder(key).await {
            Ok(id) => id,
            Err(err) => {
                return RelayOutcome::Failed {
                    message: format!("failed to create message: {err}"),
                };
            }
        };
        if cancel.is_cancelled() {
            self.discard(key, message_id).await;
            return aborted_without_reply(key);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = vendor.build_request(endpoint, payload, true);
        let session = StreamSession::new(Arc::clone(&self.transport), vendor, request)
            .retry_policy(self.config.retry_policy())
            .handlers(session_handlers(tx, key.clone()));
        info!(task = %key, session_id = %session.id(), %vendor, "relaying bot stream");

        let mut running = RunningMessage::new();
        let mut vendor_error: Option<String> = None;
        let consume = async {
            while let Some(event) = rx.recv().await {
                match event {
                    SessionEvent::Text(chunk) => {
                        let Some(delta) = running.apply_chunk(&chunk) else {
                            continue;
                        };
                        debug!(task = %key, delta_len = delta.len(), "broadcasting delta");
                        if let Err(err) = self.sink.push_delta(message_id, &delta).await {
                            warn!(task = %key, error = %err, "failed to push stream delta");
                        }
                    }
                    SessionEvent::End => {}
                    SessionEvent::Error(message) => vendor_error = Some(message),
                }
            }
        };
        let (started, ()) = tokio::join!(session.start(cancel.clone()), consume);

        match started {
            Err(err) => {
                self.discard(key, message_id).await;
                RelayOutcome::Failed {
                    message: err.message(),
                }
            }
            Ok(SessionOutcome::Failed) => {
                self.discard(key, message_id).await;
                RelayOutcome::Failed {
                    message: vendor_error.unwrap_or_else(|| "bot stream failed".to_string()),
                }
            }
            Ok(SessionOutcome::Completed | SessionOutcome::Cancelled) => {
                self.finish_stream(key, message_id, running, cancel).await
            }
        }
    }

    /// Requests a complete (non-streaming) reply for `key` and stores it.
    pub async fn relay_once(
        &self,
        key: TaskKey,
        vendor: VendorKind,
        endpoint: &BotEndpoint,
        payload: &BotPayload,
    ) -> RelayOutcome {
        let cancel = self.registry.register(key.clone());
        let outcome = self.relay_once_inner(&key, vendor, endpoint, payload, &cancel).await;
        self.registry.release(&key, &cancel);
        outcome
    }

    async fn relay_once_inner(
        &self,
        key: &TaskKey,
        vendor: VendorKind,
        endpoint: &BotEndpoint,
        payload: &BotPayload,
        cancel: &CancelToken,
    ) -> RelayOutcome {
        let request = vendor.build_request(endpoint, payload, false);
        let value = match self.fetch_with_retry(key, vendor, &request, cancel).await {
            Ok(Some(value)) => value,
            Ok(None) => return aborted_without_reply(key),
            Err(err) => {
                return RelayOutcome::Failed {
                    message: err.message(),
                };
            }
        };
        if cancel.is_cancelled() {
            return aborted_without_reply(key);
        }

        let Some(text) = vendor
            .convert_response(&value, &request.settings)
            .filter(|t| !t.is_empty())
        else {
            let err = RelayError::protocol(vendor, EMPTY_REPLY);
            warn!(task = %key, error = %err, "bot response had no text");
            return RelayOutcome::Failed {
                message: err.message(),
            };
        };

        let message_id = match self.sink.create_placeholder(key).await {
            Ok(id) => id,
            Err(err) => {
                return RelayOutcome::Failed {
                    message: format!("failed to create message: {err}"),
                };
            }
        };
        if cancel.is_cancelled() {
            self.discard(key, message_id).await;
            return aborted_without_reply(key);
        }
        if let Err(err) = self
            .sink
            .persist(message_id, &text, MessageStatus::Success)
            .await
        {
            warn!(task = %key, error = %err, "failed to persist bot reply");
        }
        RelayOutcome::Completed { text }
    }

    /// Returns `Ok(None)` when cancelled before a response arrived.
    async fn fetch_with_retry(
        &self,
        key: &TaskKey,
        vendor: VendorKind,
        request: &StreamRequest,
        cancel: &CancelToken,
    ) -> Result<Option<serde_json::Value>, RelayError> {
        let policy = self.config.retry_policy();
        let mut attempts_used = 0;
        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                fetched = self.transport.fetch_json(request) => fetched,
            };
            let err: TransportError = match fetched {
                Ok(value) => return Ok(Some(value)),
                Err(err) => err,
            };
            if !err.is_connection_failure() || !policy.can_retry(attempts_used) {
                return Err(RelayError::Unavailable {
                    vendor,
                    attempts: attempts_used + 1,
                    last_error: err,
                });
            }
            let backoff = policy.backoff_duration(attempts_used);
            attempts_used += 1;
            warn!(
                task = %key,
                attempts_used,
                max_attempts = policy.total_attempts(),
                error = %err,
                "bot request failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    async fn finish_stream(
        &self,
        key: &TaskKey,
        message_id: MessageId,
        running: RunningMessage,
        cancel: &CancelToken,
    ) -> RelayOutcome {
        let cancelled = cancel.is_cancelled();
        if !running.has_text() {
            self.discard(key, message_id).await;
            return if cancelled {
                aborted_without_reply(key)
            } else {
                RelayOutcome::Failed {
                    message: EMPTY_REPLY.to_string(),
                }
            };
        }

        let status = if cancelled {
            MessageStatus::Aborted
        } else {
            MessageStatus::Success
        };
        let text = running.into_text();
        if let Err(err) = self.sink.persist(message_id, &text, status).await {
            warn!(task = %key, error = %err, "failed to persist bot reply");
        }
        info!(task = %key, ?status, text_len = text.len(), "bot reply stored");
        match status {
            MessageStatus::Aborted => RelayOutcome::Aborted { text },
            _ => RelayOutcome::Completed { text },
        }
    }

    async fn discard(&self, key: &TaskKey, message_id: MessageId) {
        if let Err(err) = self.sink.remove(message_id).await {
            warn!(task = %key, error = %err, "failed to remove placeholder message");
        }
    }
}

fn session_handlers(tx: mpsc::UnboundedSender<SessionEvent>, key: TaskKey) -> Handlers {
    let text_tx = tx.clone();
    let end_tx = tx.clone();
    let error_tx = tx;
    Handlers::new()
        .on_message(move |text| {
            let _ = text_tx.send(SessionEvent::Text(text.to_string()));
        })
        .on_end(move || {
            let _ = end_tx.send(SessionEvent::End);
        })
        .on_error(move |err| {
            let _ = error_tx.send(SessionEvent::Error(err.message()));
        })
        .on_finish(move || debug!(task = %key, "bot stream session closed"))
}

fn aborted_without_reply(key: &TaskKey) -> RelayOutcome {
    debug!(task = %key, "task cancelled before any reply");
    RelayOutcome::Aborted {
        text: String::new(),
    }
}
