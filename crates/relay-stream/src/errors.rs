use crate::vendors::VendorKind;

/// Failures raised by a [`StreamTransport`](crate::transport::StreamTransport)
/// before or while a response body is read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (DNS, refused connection, timeout).
    #[error("connection failed: {0}")]
    Connect(String),
    /// The backend answered with a non-2xx status.
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the response body failed.
    #[error("read failed: {0}")]
    Read(String),
    /// A non-streaming response body was not valid JSON.
    #[error("invalid JSON response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns true when the failure happened while establishing the
    /// connection, which is the only phase covered by retries.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Status { .. })
    }
}

/// Top-level error type for the relay API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Invalid relay configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Every connection attempt failed; the session never started streaming.
    #[error("stream unavailable ({vendor}) after {attempts} attempts: {last_error}")]
    Unavailable {
        vendor: VendorKind,
        attempts: u32,
        last_error: TransportError,
    },
    /// The vendor reported an explicit error inside the stream.
    #[error("vendor error ({vendor}): {message}")]
    Vendor { vendor: VendorKind, message: String },
    /// The connection failed after streaming had begun.
    #[error("transport error ({vendor}): {source}")]
    Transport {
        vendor: VendorKind,
        #[source]
        source: TransportError,
    },
    /// The response did not have the shape the vendor adapter expects.
    #[error("protocol error ({vendor}): {message}")]
    Protocol { vendor: VendorKind, message: String },
}

impl RelayError {
    pub fn vendor(vendor: VendorKind, message: impl Into<String>) -> Self {
        Self::Vendor {
            vendor,
            message: message.into(),
        }
    }

    pub fn transport(vendor: VendorKind, source: TransportError) -> Self {
        Self::Transport { vendor, source }
    }

    pub fn protocol(vendor: VendorKind, message: impl Into<String>) -> Self {
        Self::Protocol {
            vendor,
            message: message.into(),
        }
    }

    /// Connection attempts made, for errors raised before streaming began.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Unavailable { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Returns the human-readable message, without the vendor prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Config(message) => message.clone(),
            Self::Unavailable { last_error, .. } => last_error.to_string(),
            Self::Vendor { message, .. } | Self::Protocol { message, .. } => message.clone(),
            Self::Transport { source, .. } => source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_classified() {
        assert!(TransportError::Connect("refused".into()).is_connection_failure());
        assert!(
            TransportError::Status {
                status: 502,
                body: String::new()
            }
            .is_connection_failure()
        );
        assert!(!TransportError::Read("reset".into()).is_connection_failure());
    }

    #[test]
    fn vendor_error_message_has_no_prefix() {
        let err = RelayError::vendor(VendorKind::Langflow, "boom");
        assert_eq!(err.message(), "boom");
        assert!(err.to_string().contains("langflow"));
    }
}
