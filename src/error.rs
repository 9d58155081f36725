//! Error types for tpwire.

use thiserror::Error;

use crate::failure::ServiceFailure;
use crate::transport::{ErrorKind, TransportError};

/// Main error type for all tpwire operations.
#[derive(Debug, Error)]
pub enum TpwireError {
    /// The service ran to completion and reported failure.
    #[error(transparent)]
    Service(#[from] ServiceFailure),

    /// A transport operation failed.
    #[error("{operation} {service}: {source}")]
    Transport {
        /// Operation that failed (`call`, `get_reply`, `send`, ...).
        operation: &'static str,
        /// Service the operation targeted, empty when unknown.
        service: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// Operation not legal in the local state (e.g. sending without the token).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON buffer encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// RECORD buffer encode error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// RECORD buffer decode error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Buffer payload is not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// I/O error (worker pool start-up).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TpwireError {
    /// Wrap a transport failure with the operation and service it belongs to.
    pub fn transport(operation: &'static str, service: &str, source: TransportError) -> Self {
        TpwireError::Transport {
            operation,
            service: service.to_string(),
            source,
        }
    }

    /// The transport failure kind, if any.
    ///
    /// Service failures report [`ErrorKind::SvcFail`].
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            TpwireError::Service(_) => Some(ErrorKind::SvcFail),
            TpwireError::Transport { source, .. } => Some(source.kind),
            _ => None,
        }
    }

    /// The service failure, if this is one.
    pub fn service_failure(&self) -> Option<&ServiceFailure> {
        match self {
            TpwireError::Service(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Result type alias using TpwireError.
pub type Result<T> = std::result::Result<T, TpwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display() {
        let err = TpwireError::transport(
            "call",
            "TOUPPER",
            TransportError::new(ErrorKind::NoEnt, "not advertised"),
        );
        assert_eq!(
            err.to_string(),
            "call TOUPPER: TPENOENT - no such service: not advertised"
        );
        assert_eq!(err.kind(), Some(ErrorKind::NoEnt));
        assert!(err.service_failure().is_none());
    }

    #[test]
    fn test_service_failure_kind() {
        let err: TpwireError = ServiceFailure::new("SVC", -1).into();
        assert_eq!(err.kind(), Some(ErrorKind::SvcFail));
        assert_eq!(err.service_failure().unwrap().user_code(), -1);
    }

    #[test]
    fn test_protocol_has_no_kind() {
        let err = TpwireError::Protocol("no token".to_string());
        assert_eq!(err.kind(), None);
    }
}
