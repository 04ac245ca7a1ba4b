//! Stream session: one streaming request to a bot backend, from connect to
//! finalize.
//!
//! ```text
//! Idle -> Connecting -> (Retrying -> Connecting)* -> Streaming -> Finalized
//! ```
//!
//! `Finalized` is terminal. Cancellation moves any earlier state straight to
//! `Finalized` without reporting an error.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt as _;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::decoder::{self, DecoderState};
use crate::errors::{RelayError, TransportError};
use crate::request::StreamRequest;
use crate::retry::RetryPolicy;
use crate::signal::NormalizedSignal;
use crate::transport::{ChunkStream, StreamTransport, TransportEvent};
use crate::vendors::VendorKind;

type MessageFn = Box<dyn FnMut(&str) + Send>;
type EndFn = Box<dyn FnMut() + Send>;
type ErrorFn = Box<dyn FnMut(&RelayError) + Send>;
type FinishFn = Box<dyn FnOnce() + Send>;

/// Callbacks attached to a session before it starts.
///
/// Each setter replaces any earlier callback for the same event.
#[derive(Default)]
pub struct Handlers {
    on_message: Option<MessageFn>,
    on_end: Option<EndFn>,
    on_error: Option<ErrorFn>,
    on_finish: Option<FinishFn>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with every text chunk, in arrival order.
    pub fn on_message(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Called once when the stream completes or is cancelled mid-stream.
    pub fn on_end(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }

    /// Called once when the vendor or the connection fails mid-stream.
    pub fn on_error(mut self, f: impl FnMut(&RelayError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Lifecycle hook called exactly once when `start` returns, on every path.
    pub fn on_finish(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_end", &self.on_end.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

/// Lifecycle state of a [`StreamSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting { attempt: u32 },
    Retrying { attempts_used: u32 },
    Streaming,
    Finalized,
}

/// How a session that got past the connection phase ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The vendor or the transport signalled the end; `on_end` fired.
    Completed,
    /// A vendor or transport error ended the stream; `on_error` fired.
    Failed,
    /// The cancel token fired. `on_error` never fires for this path.
    Cancelled,
}

enum Ending {
    Completed,
    Failed(RelayError),
    Cancelled,
}

/// One streaming exchange with a bot backend.
pub struct StreamSession {
    id: uuid::Uuid,
    transport: Arc<dyn StreamTransport>,
    vendor: VendorKind,
    request: StreamRequest,
    policy: RetryPolicy,
    handlers: Handlers,
    state: SessionState,
    decoder: DecoderState,
    attempts_used: u32,
}

impl StreamSession {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        vendor: VendorKind,
        request: StreamRequest,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            transport,
            vendor,
            request,
            policy: RetryPolicy::none(),
            handlers: Handlers::default(),
            state: SessionState::Idle,
            decoder: DecoderState::new(),
            attempts_used: 0,
        }
    }

    /// Sets the connection retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attaches the session callbacks.
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connects (with bounded retries) and drives the stream to completion.
    ///
    /// Returns `Err(RelayError::Unavailable)` when every connection attempt
    /// failed; `on_error` is not called in that case. Failures after
    /// streaming began are reported through `on_error` and return
    /// `Ok(SessionOutcome::Failed)`.
    pub async fn start(mut self, cancel: CancelToken) -> Result<SessionOutcome, RelayError> {
        info!(session_id = %self.id, vendor = %self.vendor, url = %self.request.url, "starting bot stream");
        let result = self.run(&cancel).await;
        match &result {
            Ok(outcome) => {
                info!(session_id = %self.id, vendor = %self.vendor, ?outcome, "bot stream finished")
            }
            Err(err) => {
                warn!(session_id = %self.id, vendor = %self.vendor, error = %err, "bot stream unavailable")
            }
        }
        if let Some(on_finish) = self.handlers.on_finish.take() {
            on_finish();
        }
        result
    }

    async fn run(&mut self, cancel: &CancelToken) -> Result<SessionOutcome, RelayError> {
        if cancel.is_cancelled() {
            self.transition(SessionState::Finalized);
            return Ok(SessionOutcome::Cancelled);
        }
        let Some(stream) = self.connect(cancel).await? else {
            self.transition(SessionState::Finalized);
            return Ok(SessionOutcome::Cancelled);
        };
        self.transition(SessionState::Streaming);
        Ok(self.pump(stream, cancel).await)
    }

    /// Returns `Ok(None)` when cancelled while connecting.
    async fn connect(&mut self, cancel: &CancelToken) -> Result<Option<ChunkStream>, RelayError> {
        loop {
            self.transition(SessionState::Connecting {
                attempt: self.attempts_used + 1,
            });
            let transport = Arc::clone(&self.transport);
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                opened = transport.open(&self.request) => Some(opened),
            };
            let err = match opened {
                None => return Ok(None),
                Some(Ok(stream)) => return Ok(Some(stream)),
                Some(Err(err)) => err,
            };

            if !is_retryable(&err) || !self.policy.can_retry(self.attempts_used) {
                self.transition(SessionState::Finalized);
                return Err(RelayError::Unavailable {
                    vendor: self.vendor,
                    attempts: self.attempts_used + 1,
                    last_error: err,
                });
            }

            let backoff = self.policy.backoff_duration(self.attempts_used);
            self.attempts_used += 1;
            warn!(
                session_id = %self.id,
                vendor = %self.vendor,
                attempts_used = self.attempts_used,
                max_attempts = self.policy.total_attempts(),
                ?backoff,
                error = %err,
                "bot stream connection failed, retrying"
            );
            self.transition(SessionState::Retrying {
                attempts_used: self.attempts_used,
            });
            if !backoff.is_zero() {
                let slept = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    _ = tokio::time::sleep(backoff) => true,
                };
                if !slept {
                    return Ok(None);
                }
            }
        }
    }

    async fn pump(&mut self, mut stream: ChunkStream, cancel: &CancelToken) -> SessionOutcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = stream.next() => Some(event),
            };
            let ending = match next {
                None => Some(Ending::Cancelled),
                Some(Some(TransportEvent::Data(bytes))) => self.handle_data(&bytes, cancel),
                Some(Some(TransportEvent::End | TransportEvent::Close) | None) => {
                    Some(Ending::Completed)
                }
                Some(Some(TransportEvent::Error(err))) => {
                    Some(Ending::Failed(RelayError::transport(self.vendor, err)))
                }
            };
            if let Some(ending) = ending {
                return self.finalize(ending).unwrap_or(SessionOutcome::Completed);
            }
        }
    }

    fn handle_data(&mut self, bytes: &[u8], cancel: &CancelToken) -> Option<Ending> {
        let values = decoder::decode_bytes(&mut self.decoder, bytes);
        debug!(session_id = %self.id, bytes = bytes.len(), objects = values.len(), "bot stream chunk");
        for value in values {
            if cancel.is_cancelled() {
                return Some(Ending::Cancelled);
            }
            if let Some(ending) = self.dispatch(&value) {
                return Some(ending);
            }
        }
        None
    }

    fn dispatch(&mut self, value: &Value) -> Option<Ending> {
        match self.vendor.decode(value, &self.request.settings) {
            NormalizedSignal::TextChunk(text) => {
                if let Some(on_message) = self.handlers.on_message.as_mut() {
                    on_message(&text);
                }
                None
            }
            NormalizedSignal::EndOfStream => Some(Ending::Completed),
            NormalizedSignal::StreamError(message) => {
                Some(Ending::Failed(RelayError::vendor(self.vendor, message)))
            }
            NormalizedSignal::Ignore => None,
        }
    }

    /// Runs the terminal callbacks. Returns `None` if already finalized.
    fn finalize(&mut self, ending: Ending) -> Option<SessionOutcome> {
        if self.state == SessionState::Finalized {
            return None;
        }

        let ending = match ending {
            Ending::Completed => self.flush_pending().unwrap_or(Ending::Completed),
            other => other,
        };
        self.transition(SessionState::Finalized);

        match ending {
            Ending::Completed => {
                self.fire_end();
                Some(SessionOutcome::Completed)
            }
            Ending::Cancelled => {
                self.fire_end();
                Some(SessionOutcome::Cancelled)
            }
            Ending::Failed(err) => {
                debug!(session_id = %self.id, error = %err, "bot stream failed");
                if let Some(on_error) = self.handlers.on_error.as_mut() {
                    on_error(&err);
                }
                Some(SessionOutcome::Failed)
            }
        }
    }

    // Best-effort last message from fragments still buffered at the end.
    fn flush_pending(&mut self) -> Option<Ending> {
        let value = decoder::flush(&mut self.decoder)?;
        match self.dispatch(&value) {
            Some(Ending::Failed(err)) => Some(Ending::Failed(err)),
            _ => None,
        }
    }

    fn fire_end(&mut self) {
        if let Some(on_end) = self.handlers.on_end.as_mut() {
            on_end();
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("vendor", &self.vendor)
            .field("state", &self.state)
            .field("attempts_used", &self.attempts_used)
            .finish()
    }
}

fn is_retryable(err: &TransportError) -> bool {
    err.is_connection_failure()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BotEndpoint, BotPayload};
    use bytes::Bytes;
    use futures::stream;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Script {
        Events(Vec<TransportEvent>),
        EventsThenPending(Vec<TransportEvent>),
    }

    struct FakeTransport {
        opens: AtomicUsize,
        failures_before_success: usize,
        script: Script,
    }

    impl FakeTransport {
        fn new(script: Script) -> Self {
            Self {
                opens: AtomicUsize::new(0),
                failures_before_success: 0,
                script,
            }
        }

        fn failing(failures: usize, script: Script) -> Self {
            Self {
                failures_before_success: failures,
                ..Self::new(script)
            }
        }
    }

    #[async_trait::async_trait]
    impl StreamTransport for FakeTransport {
        async fn open(&self, _request: &StreamRequest) -> Result<ChunkStream, TransportError> {
            let call = self.opens.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(TransportError::Connect("connection refused".into()));
            }
            let events: ChunkStream = match &self.script {
                Script::Events(events) => Box::pin(stream::iter(events.clone())),
                Script::EventsThenPending(events) => {
                    Box::pin(stream::iter(events.clone()).chain(stream::pending()))
                }
            };
            Ok(events)
        }

        async fn fetch_json(&self, _request: &StreamRequest) -> Result<Value, TransportError> {
            unreachable!("not used by stream sessions")
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        messages: Arc<Mutex<Vec<String>>>,
        errors: Arc<Mutex<Vec<RelayError>>>,
        ends: Arc<AtomicUsize>,
        finishes: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn handlers(&self) -> Handlers {
            let messages = Arc::clone(&self.messages);
            let errors = Arc::clone(&self.errors);
            let ends = Arc::clone(&self.ends);
            let finishes = Arc::clone(&self.finishes);
            Handlers::new()
                .on_message(move |text| messages.lock().unwrap().push(text.to_string()))
                .on_end(move || {
                    ends.fetch_add(1, Ordering::SeqCst);
                })
                .on_error(move |err| errors.lock().unwrap().push(err.clone()))
                .on_finish(move || {
                    finishes.fetch_add(1, Ordering::SeqCst);
                })
        }

        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }

        fn errors(&self) -> Vec<RelayError> {
            self.errors.lock().unwrap().clone()
        }

        fn ends(&self) -> usize {
            self.ends.load(Ordering::SeqCst)
        }

        fn finishes(&self) -> usize {
            self.finishes.load(Ordering::SeqCst)
        }
    }

    fn data(text: &str) -> TransportEvent {
        TransportEvent::Data(Bytes::from(text.to_string()))
    }

    fn request() -> StreamRequest {
        VendorKind::Langflow.build_request(
            &BotEndpoint::new("http://bot/run"),
            &BotPayload::new("hi", "chat"),
            true,
        )
    }

    fn session(transport: &Arc<FakeTransport>, recorder: &Recorder) -> StreamSession {
        let transport: Arc<dyn StreamTransport> = transport.clone();
        StreamSession::new(transport, VendorKind::Langflow, request())
            .handlers(recorder.handlers())
    }

    #[tokio::test]
    async fn token_stream_emits_messages_then_one_end() {
        let transport = Arc::new(FakeTransport::new(Script::Events(vec![
            data("{\"event\":\"token\",\"data\":{\"token\":true,\"chunk\":\"Hel\"}}\n\n"),
            data("{\"event\":\"token\",\"data\":{\"token\":true,\"chunk\":\"lo\"}}\n\n"),
            data("{\"event\":\"end\",\"data\":{}}\n\n"),
            TransportEvent::End,
            TransportEvent::Close,
        ])));
        let recorder = Recorder::default();

        let outcome = session(&transport, &recorder)
            .start(CancelToken::new())
            .await
            .expect("start");

        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(recorder.messages(), vec!["Hel", "lo"]);
        assert_eq!(recorder.messages().concat(), "Hello");
        assert_eq!(recorder.ends(), 1);
        assert!(recorder.errors().is_empty());
        assert_eq!(recorder.finishes(), 1);
    }

    #[tokio::test]
    async fn object_split_across_chunks_ends_once() {
        let transport = Arc::new(FakeTransport::new(Script::EventsThenPending(vec![
            data("{\"event\":\"end\","),
            data("\"data\":{}}\n\n"),
        ])));
        let recorder = Recorder::default();

        let outcome = session(&transport, &recorder)
            .start(CancelToken::new())
            .await
            .expect("start");

        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(recorder.ends(), 1);
        assert!(recorder.messages().is_empty());
    }

    #[tokio::test]
    async fn vendor_error_stops_processing() {
        let transport = Arc::new(FakeTransport::new(Script::Events(vec![
            data(
                "{\"event\":\"error\",\"data\":{\"message\":\"boom\"}}\n\n{\"event\":\"token\",\"data\":{\"chunk\":\"late\"}}\n\n",
            ),
            data("{\"event\":\"token\",\"data\":{\"chunk\":\"later\"}}\n\n"),
            TransportEvent::End,
        ])));
        let recorder = Recorder::default();

        let outcome = session(&transport, &recorder)
            .start(CancelToken::new())
            .await
            .expect("start");

        assert_eq!(outcome, SessionOutcome::Failed);
        let errors = recorder.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("boom"));
        assert!(matches!(errors[0], RelayError::Vendor { .. }));
        assert!(recorder.messages().is_empty());
        assert_eq!(recorder.ends(), 0);
        assert_eq!(recorder.finishes(), 1);
    }

    #[tokio::test]
    async fn permanent_connection_failure_uses_exact_attempt_budget() {
        let transport = Arc::new(FakeTransport::failing(
            usize::MAX,
            Script::Events(Vec::new()),
        ));
        let recorder = Recorder::default();

        let err = session(&transport, &recorder)
            .retry_policy(RetryPolicy::immediate(5))
            .start(CancelToken::new())
            .await
            .expect_err("should be unavailable");

        assert_eq!(transport.opens.load(Ordering::SeqCst), 6);
        assert_eq!(err.attempts(), Some(6));
        assert!(recorder.messages().is_empty());
        assert!(recorder.errors().is_empty());
        assert_eq!(recorder.ends(), 0);
        assert_eq!(recorder.finishes(), 1);
    }

    #[tokio::test]
    async fn retries_until_connection_succeeds() {
        let transport = Arc::new(FakeTransport::failing(
            2,
            Script::Events(vec![
                data("{\"event\":\"token\",\"data\":{\"chunk\":\"ok\"}}\n\n"),
                TransportEvent::End,
            ]),
        ));
        let recorder = Recorder::default();

        let outcome = session(&transport, &recorder)
            .retry_policy(RetryPolicy::immediate(5))
            .start(CancelToken::new())
            .await
            .expect("start");

        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.messages(), vec!["ok"]);
    }

    #[tokio::test]
    async fn mid_stream_transport_error_is_not_retried() {
        let transport = Arc::new(FakeTransport::new(Script::Events(vec![
            data("{\"event\":\"token\",\"data\":{\"chunk\":\"par\"}}\n\n"),
            TransportEvent::Error(TransportError::Read("connection reset".into())),
            TransportEvent::Close,
        ])));
        let recorder = Recorder::default();

        let outcome = session(&transport, &recorder)
            .retry_policy(RetryPolicy::immediate(5))
            .start(CancelToken::new())
            .await
            .expect("start");

        assert_eq!(outcome, SessionOutcome::Failed);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.messages(), vec!["par"]);
        let errors = recorder.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RelayError::Transport { .. }));
        assert_eq!(recorder.ends(), 0);
    }

    #[tokio::test]
    async fn pre_cancelled_session_never_connects() {
        let transport = Arc::new(FakeTransport::new(Script::Events(vec![TransportEvent::End])));
        let recorder = Recorder::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = session(&transport, &recorder)
            .start(cancel)
            .await
            .expect("start");

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
        assert!(recorder.messages().is_empty());
        assert!(recorder.errors().is_empty());
        assert_eq!(recorder.ends(), 0);
        assert_eq!(recorder.finishes(), 1);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_skips_remaining_chunks() {
        let transport = Arc::new(FakeTransport::new(Script::EventsThenPending(vec![data(
            "{\"event\":\"token\",\"data\":{\"chunk\":\"first\"}}\n\n{\"event\":\"token\",\"data\":{\"chunk\":\"second\"}}\n\n",
        )])));
        let recorder = Recorder::default();
        let cancel = CancelToken::new();
        let messages = Arc::clone(&recorder.messages);
        let cancel_from_callback = cancel.clone();
        let handlers = recorder.handlers().on_message(move |text| {
            messages.lock().unwrap().push(text.to_string());
            cancel_from_callback.cancel();
        });
        let transport_dyn: Arc<dyn StreamTransport> = transport.clone();

        let outcome = StreamSession::new(transport_dyn, VendorKind::Langflow, request())
            .handlers(handlers)
            .start(cancel)
            .await
            .expect("start");

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(recorder.messages(), vec!["first"]);
        assert!(recorder.errors().is_empty());
        assert_eq!(recorder.ends(), 1);
        assert_eq!(recorder.finishes(), 1);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_chunks() {
        let transport = Arc::new(FakeTransport::new(Script::EventsThenPending(Vec::new())));
        let recorder = Recorder::default();
        let cancel = CancelToken::new();
        let task = tokio::spawn(session(&transport, &recorder).start(cancel.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cancel.cancel();
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("session finished")
            .expect("join")
            .expect("start");

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert!(recorder.errors().is_empty());
        assert_eq!(recorder.finishes(), 1);
    }

    #[tokio::test]
    async fn end_followed_by_close_finalizes_once() {
        let transport = Arc::new(FakeTransport::new(Script::Events(vec![
            data("{\"event\":\"token\",\"data\":{\"chunk\":\"x\"}}\n\n"),
            TransportEvent::End,
            TransportEvent::Close,
        ])));
        let recorder = Recorder::default();

        session(&transport, &recorder)
            .start(CancelToken::new())
            .await
            .expect("start");

        assert_eq!(recorder.ends(), 1);
        assert!(recorder.errors().is_empty());
    }

    #[test]
    fn finalize_is_guarded_against_reentry() {
        let transport: Arc<dyn StreamTransport> =
            Arc::new(FakeTransport::new(Script::Events(Vec::new())));
        let recorder = Recorder::default();
        let mut session = StreamSession::new(transport, VendorKind::Langflow, request())
            .handlers(recorder.handlers());

        assert_eq!(session.finalize(Ending::Completed), Some(SessionOutcome::Completed));
        assert_eq!(session.finalize(Ending::Completed), None);
        assert_eq!(
            session.finalize(Ending::Failed(RelayError::vendor(VendorKind::Langflow, "late"))),
            None
        );
        assert_eq!(session.state(), SessionState::Finalized);
        assert_eq!(recorder.ends(), 1);
        assert!(recorder.errors().is_empty());
    }

    #[tokio::test]
    async fn stream_closing_without_end_event_completes() {
        let transport = Arc::new(FakeTransport::new(Script::Events(vec![data(
            "{\"event\":\"token\",\"data\":{\"chunk\":\"tail\"}}",
        )])));
        let recorder = Recorder::default();

        let outcome = session(&transport, &recorder)
            .start(CancelToken::new())
            .await
            .expect("start");

        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(recorder.messages(), vec!["tail"]);
        assert_eq!(recorder.ends(), 1);
    }

    #[test]
    fn only_connection_failures_are_retryable() {
        assert!(is_retryable(&TransportError::Connect("x".into())));
        assert!(!is_retryable(&TransportError::Read("x".into())));
    }
}
