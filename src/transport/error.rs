//! Failure kinds reported by the transport.

use std::fmt;

use thiserror::Error;

/// Conversational event attached to a failed send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// The peer tore the conversation down abruptly.
    Disconnect,
    /// The peer handed over the send token.
    SendOnly,
    /// The service ended with a transport-level error.
    SvcErr,
    /// The service ended and reported failure.
    SvcFail,
    /// The service ended and reported success.
    SvcSucc,
}

impl Event {
    /// Whether this event ends the conversation.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Event::SendOnly)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Disconnect => "TPEV_DISCONIMM",
            Event::SendOnly => "TPEV_SENDONLY",
            Event::SvcErr => "TPEV_SVCERR",
            Event::SvcFail => "TPEV_SVCFAIL",
            Event::SvcSucc => "TPEV_SVCSUCC",
        };
        f.write_str(name)
    }
}

/// Kind of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The enclosing transaction was aborted.
    Abort,
    /// Unknown or already consumed descriptor.
    BadDesc,
    /// The operation would block.
    Block,
    /// Invalid argument.
    Invalid,
    /// Too many outstanding calls or conversations.
    Limit,
    /// No such service.
    NoEnt,
    /// Operating system failure.
    OsErr,
    /// Permission denied.
    Perm,
    /// Operation not legal in the current state.
    Proto,
    /// The service failed at the transport level.
    SvcErr,
    /// The service ran to completion and reported failure.
    SvcFail,
    /// Internal transport failure.
    System,
    /// The operation timed out.
    Time,
    /// Buffer type not accepted by the peer.
    Type,
    /// A conversational event occurred.
    Event(Event),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::Abort => "TPEABORT - transaction aborted",
            ErrorKind::BadDesc => "TPEBADDESC - bad call descriptor",
            ErrorKind::Block => "TPEBLOCK - operation would block",
            ErrorKind::Invalid => "TPEINVAL - invalid argument",
            ErrorKind::Limit => "TPELIMIT - too many outstanding requests",
            ErrorKind::NoEnt => "TPENOENT - no such service",
            ErrorKind::OsErr => "TPEOS - operating system error",
            ErrorKind::Perm => "TPEPERM - permission denied",
            ErrorKind::Proto => "TPEPROTO - protocol error",
            ErrorKind::SvcErr => "TPESVCERR - service error",
            ErrorKind::SvcFail => "TPESVCFAIL - application level service failure",
            ErrorKind::System => "TPESYSTEM - internal system error",
            ErrorKind::Time => "TPETIME - timeout",
            ErrorKind::Type => "TPEITYPE - buffer type not accepted",
            ErrorKind::Event(event) => return write!(f, "TPEEVENT - event {}", event),
        };
        f.write_str(text)
    }
}

/// Error returned by a [`Transport`](super::Transport) operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human readable context.
    pub detail: String,
    /// Application return code observed with the failure (service failures).
    pub urcode: i64,
    /// Length of the payload written to the output region with the failure.
    pub len: usize,
}

impl TransportError {
    /// Create an error with no application return code.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            urcode: 0,
            len: 0,
        }
    }

    /// Attach the application return code.
    pub fn with_urcode(mut self, urcode: i64) -> Self {
        self.urcode = urcode;
        self
    }

    /// Record the length of the payload delivered with the failure.
    pub fn with_len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// The conversational event, if this error carries one.
    #[inline]
    pub fn event(&self) -> Option<Event> {
        match self.kind {
            ErrorKind::Event(event) => Some(event),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_terminal() {
        assert!(!Event::SendOnly.is_terminal());
        assert!(Event::SvcSucc.is_terminal());
        assert!(Event::SvcFail.is_terminal());
        assert!(Event::Disconnect.is_terminal());
    }

    #[test]
    fn test_display_names_kind() {
        let err = TransportError::new(ErrorKind::NoEnt, "TOUPPER");
        assert_eq!(err.to_string(), "TPENOENT - no such service: TOUPPER");

        let err = TransportError::new(ErrorKind::Event(Event::SvcErr), "receive");
        assert!(err.to_string().contains("TPEV_SVCERR"));
    }

    #[test]
    fn test_event_accessor() {
        let err = TransportError::new(ErrorKind::Event(Event::SvcFail), "x").with_urcode(7);
        assert_eq!(err.event(), Some(Event::SvcFail));
        assert_eq!(err.urcode, 7);
        assert_eq!(err.len, 0);
        assert_eq!(err.with_len(3).len, 3);
        assert_eq!(TransportError::new(ErrorKind::Time, "x").event(), None);
    }
}
