use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::config::RelayConfig;
use crate::errors::{RelayError, TransportError};
use crate::request::StreamRequest;

/// Notifications delivered by an open response body, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A raw piece of the body.
    Data(Bytes),
    /// The body finished normally.
    End,
    /// Reading the body failed.
    Error(TransportError),
    /// The connection closed. May follow `End` or `Error`.
    Close,
}

/// Event stream of one open response.
pub type ChunkStream = Pin<Box<dyn futures::Stream<Item = TransportEvent> + Send + 'static>>;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static>>;

/// Outbound HTTP seam used by stream sessions and the relay orchestrator.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    /// Sends the request and returns its body as an event stream once
    /// response headers arrived with a success status.
    async fn open(&self, request: &StreamRequest) -> Result<ChunkStream, TransportError>;

    /// Sends the request and parses the full body as JSON.
    async fn fetch_json(&self, request: &StreamRequest)
    -> Result<serde_json::Value, TransportError>;
}

/// [`StreamTransport`] backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Builds a transport using the configured request timeout.
    ///
    /// The timeout bounds connecting and waiting for response headers; a
    /// streaming body may take longer.
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout: config.request_timeout,
        })
    }

    async fn send(&self, request: &StreamRequest) -> Result<reqwest::Response, TransportError> {
        let mut http_req = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            http_req = http_req.header(name.as_str(), value.as_str());
        }

        let response = tokio::time::timeout(self.timeout, http_req.send())
            .await
            .map_err(|_| {
                TransportError::Connect(format!("no response within {:?}", self.timeout))
            })?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ChunkStream, TransportError> {
        debug!(url = %request.url, "opening bot stream");
        let response = self.send(request).await?;
        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(Box::pin(transport_events(bytes_stream)))
    }

    async fn fetch_json(
        &self,
        request: &StreamRequest,
    ) -> Result<serde_json::Value, TransportError> {
        debug!(url = %request.url, "requesting bot response");
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Reading,
    Closing,
    Done,
}

fn transport_events(bytes_stream: ByteStream) -> impl futures::Stream<Item = TransportEvent> + Send {
    stream::unfold(
        (bytes_stream, Phase::Reading),
        |(mut bytes_stream, phase)| async move {
            match phase {
                Phase::Reading => match bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        Some((TransportEvent::Data(chunk), (bytes_stream, Phase::Reading)))
                    }
                    Some(Err(e)) => Some((
                        TransportEvent::Error(TransportError::Read(e.to_string())),
                        (bytes_stream, Phase::Closing),
                    )),
                    None => Some((TransportEvent::End, (bytes_stream, Phase::Closing))),
                },
                Phase::Closing => Some((TransportEvent::Close, (bytes_stream, Phase::Done))),
                Phase::Done => None,
            }
        },
    )
}
