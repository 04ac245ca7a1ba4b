//! Common imports for relay usage.
pub use crate::{
    BotEndpoint, BotPayload, CancelToken, Handlers, HttpTransport, RelayConfig, RelayError,
    SessionOutcome, StreamSession, StreamTransport, VendorKind,
};
