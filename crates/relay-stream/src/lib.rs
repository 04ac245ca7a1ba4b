//! Streaming relay between the application and pluggable bot backends.
//!
//! A [`StreamSession`] opens one streaming HTTP request, decodes the
//! blank-line separated JSON body, maps every object through the selected
//! [`VendorKind`] adapter and reports normalized events to its [`Handlers`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relay_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RelayError> {
//! let config = RelayConfig::from_env()?;
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let request = VendorKind::Langflow.build_request(
//!     &BotEndpoint::new("http://localhost:7860/api/v1/run/my-flow"),
//!     &BotPayload::new("Summarize this card", "chat-42").uid("user-7"),
//!     true,
//! );
//!
//! let outcome = StreamSession::new(transport, VendorKind::Langflow, request)
//!     .retry_policy(config.retry_policy())
//!     .handlers(Handlers::new().on_message(|text| print!("{text}")))
//!     .start(CancelToken::new())
//!     .await?;
//! println!("\n{outcome:?}");
//! # Ok(())
//! # }
//! ```

/// Cooperative cancellation token.
pub mod cancel;
/// Relay configuration loaded from the environment.
pub mod config;
/// Blank-line separated JSON chunk decoder.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Common imports for typical usage.
pub mod prelude;
/// Outbound request types.
pub mod request;
/// Connection retry policy.
pub mod retry;
/// Stream session and its callbacks.
pub mod session;
/// Normalized vendor signals.
pub mod signal;
/// HTTP transport seam and the `reqwest` implementation.
pub mod transport;
/// Vendor response adapters.
pub mod vendors;

pub use cancel::CancelToken;
pub use config::RelayConfig;
pub use decoder::DecoderState;
pub use errors::{RelayError, TransportError};
pub use request::{BotEndpoint, BotPayload, StreamRequest};
pub use retry::RetryPolicy;
pub use session::{Handlers, SessionOutcome, SessionState, StreamSession};
pub use signal::NormalizedSignal;
pub use transport::{ChunkStream, HttpTransport, StreamTransport, TransportEvent};
pub use vendors::{AdapterSettings, VendorKind};
