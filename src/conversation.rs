//! Half-duplex conversations.
//!
//! Exactly one side of a conversation holds the send token at a time. The
//! token moves with the flags passed to [`Conversation::send`]: sending with
//! `RECVONLY` yields it, and the peer observes the handover as a `SendOnly`
//! event on its next receive. The conversation ends when the service
//! terminates (graceful) or when the initiator disconnects (abrupt).

use crate::buffer::Buffer;
use crate::call::{delivered, Lease};
use crate::context::Context;
use crate::error::{Result, TpwireError};
use crate::failure::ServiceFailure;
use crate::transport::flags::{self, Flags};
use crate::transport::{Descriptor, ErrorKind, Event, Invocation, TransportError, NO_SESSION};

/// One end of a conversation.
///
/// Client ends are opened with [`connect`](Self::connect) and disconnected
/// when dropped while still open. The service end is part of the
/// [`ServiceHandle`](crate::ServiceHandle) and is never disconnected
/// implicitly.
#[derive(Debug)]
pub struct Conversation {
    ctx: Context,
    cd: Descriptor,
    control: bool,
    graceful: bool,
    service: String,
    owned: bool,
}

impl Conversation {
    /// A closed conversation on `ctx`.
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            cd: NO_SESSION,
            control: false,
            graceful: false,
            service: String::new(),
            owned: false,
        }
    }

    /// Service end described by an invocation record.
    ///
    /// Open iff the invocation carries `CONV`; the token is held iff it
    /// carries `SENDONLY`.
    pub(crate) fn from_invocation(ctx: &Context, invocation: &Invocation) -> Self {
        let open = flags::has_flag(invocation.flags, flags::CONV);
        Self {
            ctx: ctx.clone(),
            cd: if open { invocation.cd } else { NO_SESSION },
            control: open && flags::has_flag(invocation.flags, flags::SENDONLY),
            graceful: false,
            service: invocation.name.clone(),
            owned: false,
        }
    }

    /// Open a conversation with `service`.
    ///
    /// `flags` must carry exactly one of `SENDONLY` (keep the token) or
    /// `RECVONLY` (hand it to the service).
    pub fn connect(&mut self, service: &str, data: &Buffer, flags: Flags) -> Result<()> {
        if self.is_open() {
            return Err(TpwireError::Protocol(format!(
                "conversation with {} is already open",
                self.service
            )));
        }
        let cd = self
            .ctx
            .transport()
            .connect(service, data.region(), flags)
            .map_err(|e| TpwireError::transport("connect", service, e))?;

        tracing::debug!("Connected to {} as conversation {} on {}", service, cd, self.ctx.id());
        self.cd = cd;
        self.control = flags::has_flag(flags, flags::SENDONLY);
        self.graceful = false;
        self.service = service.to_string();
        self.owned = true;
        Ok(())
    }

    /// Send `data` to the peer. Requires the token.
    ///
    /// With `RECVONLY` the token passes to the peer.
    pub fn send(&mut self, data: &Buffer, flags: Flags) -> Result<()> {
        if !self.in_send_mode() {
            return Err(self.not_allowed("send"));
        }
        match self.ctx.transport().send(self.cd, data.region(), flags) {
            Ok(()) => {
                if flags::has_flag(flags, flags::RECVONLY) {
                    self.control = false;
                }
                Ok(())
            }
            Err(e) => {
                if e.event().is_some() {
                    self.close(false);
                }
                Err(TpwireError::transport("send", &self.service, e))
            }
        }
    }

    /// Block for the next message from the peer. Requires the peer to hold
    /// the token.
    ///
    /// A `SendOnly` event hands the token over and a successful service
    /// termination closes the conversation gracefully; both return the
    /// accompanying payload. `output` is reused under the same rules as
    /// [`Context::call`](crate::Context::call).
    ///
    /// # Errors
    ///
    /// [`TpwireError::Service`] when the service terminated with failure
    /// (the conversation counts as gracefully closed), a transport error
    /// for disconnects and service errors (the conversation is closed) and
    /// for plain transport failures.
    pub fn receive(&mut self, flags: Flags, output: Option<&mut Buffer>) -> Result<Buffer> {
        if !self.in_receive_mode() {
            return Err(self.not_allowed("receive"));
        }

        let mut scratch = Buffer::new();
        let output = output.unwrap_or(&mut scratch);
        let mut lease = Lease::new(output);
        let result = self.ctx.transport().receive(self.cd, lease.region(), flags);
        let reply = lease.finish(delivered(&result));

        match result {
            Ok(_) => Ok(reply),
            Err(e) => self.on_event(e, reply),
        }
    }

    /// Like [`receive`](Self::receive) but returns `Ok(None)` when nothing
    /// has arrived yet.
    pub fn receive_nonblocking(
        &mut self,
        flags: Flags,
        output: Option<&mut Buffer>,
    ) -> Result<Option<Buffer>> {
        match self.receive(flags | flags::NOBLOCK, output) {
            Ok(reply) => Ok(Some(reply)),
            Err(e) if e.kind() == Some(ErrorKind::Block) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Tear the conversation down abruptly. No-op when closed.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let cd = self.cd;
        self.close(false);
        tracing::debug!("Disconnecting conversation {} with {}", cd, self.service);
        self.ctx
            .transport()
            .disconnect(cd)
            .map_err(|e| TpwireError::transport("disconnect", &self.service, e))
    }

    /// Whether the conversation is open.
    pub fn is_open(&self) -> bool {
        self.cd != NO_SESSION
    }

    /// Whether this side holds the token.
    pub fn in_send_mode(&self) -> bool {
        self.is_open() && self.control
    }

    /// Whether the peer holds the token.
    pub fn in_receive_mode(&self) -> bool {
        self.is_open() && !self.control
    }

    /// Whether the conversation ended with the service's termination.
    pub fn closed_gracefully(&self) -> bool {
        self.graceful
    }

    /// Conversation descriptor, [`NO_SESSION`] when closed.
    pub fn connection_descriptor(&self) -> Descriptor {
        self.cd
    }

    fn close(&mut self, graceful: bool) {
        self.cd = NO_SESSION;
        self.control = false;
        self.graceful = graceful;
    }

    fn not_allowed(&self, operation: &str) -> TpwireError {
        let state = if !self.is_open() {
            "closed"
        } else if self.control {
            "holding the send token"
        } else {
            "not holding the send token"
        };
        TpwireError::Protocol(format!(
            "cannot {} on conversation with {}: {}",
            operation, self.service, state
        ))
    }

    fn on_event(&mut self, error: TransportError, reply: Buffer) -> Result<Buffer> {
        match error.event() {
            Some(Event::SvcSucc) => {
                tracing::debug!("Conversation with {} completed", self.service);
                self.close(true);
                Ok(reply)
            }
            Some(Event::SendOnly) => {
                self.control = true;
                Ok(reply)
            }
            Some(Event::SvcFail) => {
                self.close(true);
                Err(ServiceFailure::with_buffer(&self.service, error.urcode, reply).into())
            }
            Some(Event::Disconnect) | Some(Event::SvcErr) => {
                tracing::debug!("Conversation with {} ended: {}", self.service, error);
                self.close(false);
                Err(TpwireError::transport("receive", &self.service, error))
            }
            None => Err(TpwireError::transport("receive", &self.service, error)),
        }
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        if self.owned && self.is_open() {
            if let Err(e) = self.disconnect() {
                tracing::warn!("Disconnect on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::transport::loopback::Loopback;
    use crate::{Disposition, ServiceHandle};

    fn text(reply: &Buffer) -> String {
        reply.as_str().unwrap_or_default().to_string()
    }

    #[test]
    fn test_closed_conversation_rejects_io() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        let mut conv = Conversation::new(&ctx);

        assert!(!conv.is_open());
        assert_eq!(conv.connection_descriptor(), NO_SESSION);
        assert!(matches!(
            conv.send(&Buffer::string("x"), flags::NONE),
            Err(TpwireError::Protocol(_))
        ));
        assert!(matches!(
            conv.receive(flags::NONE, None),
            Err(TpwireError::Protocol(_))
        ));
        assert!(conv.disconnect().is_ok());
    }

    #[test]
    fn test_connect_unknown_service() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        let mut conv = Conversation::new(&ctx);
        let err = conv
            .connect("NOPE", &Buffer::new(), flags::SENDONLY)
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoEnt));
        assert!(!conv.is_open());
    }

    #[test]
    fn test_token_follows_flags() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        ctx.advertise("ECHOC", |mut svc: ServiceHandle| {
            let conv = svc.conversation();
            let mut last = Buffer::new();
            while conv.in_receive_mode() {
                match conv.receive(flags::NONE, None) {
                    Ok(message) => last = message,
                    Err(_) => return,
                }
            }
            svc.reply(Disposition::Success, Some(last), Some(4));
        })
        .unwrap();

        let mut conv = Conversation::new(&ctx);
        conv.connect("ECHOC", &Buffer::new(), flags::SENDONLY).unwrap();
        assert!(conv.in_send_mode());
        assert!(matches!(
            conv.receive(flags::NONE, None),
            Err(TpwireError::Protocol(_))
        ));

        conv.send(&Buffer::string("ping"), flags::RECVONLY).unwrap();
        assert!(conv.in_receive_mode());

        let reply = conv.receive(flags::NONE, None).unwrap();
        assert_eq!(text(&reply), "ping");
        assert!(!conv.is_open());
        assert!(conv.closed_gracefully());
    }

    #[test]
    fn test_service_failure_closes_gracefully() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        ctx.advertise("REFUSE", |mut svc: ServiceHandle| {
            svc.reply(Disposition::Fail, Some(Buffer::string("nope")), Some(3));
        })
        .unwrap();

        let mut conv = Conversation::new(&ctx);
        conv.connect("REFUSE", &Buffer::new(), flags::RECVONLY).unwrap();
        assert!(conv.in_receive_mode());

        let err = conv.receive(flags::NONE, None).unwrap_err();
        let failure = err.service_failure().unwrap();
        assert_eq!(failure.service(), "REFUSE");
        assert_eq!(failure.user_code(), 3);
        assert_eq!(failure.buffer().data(), b"nope");
        assert!(!conv.is_open());
        assert!(conv.closed_gracefully());
    }

    #[test]
    fn test_send_after_service_ended() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        ctx.advertise("QUIT", |mut svc: ServiceHandle| {
            svc.reply(Disposition::Success, None, None);
        })
        .unwrap();

        let mut conv = Conversation::new(&ctx);
        conv.connect("QUIT", &Buffer::new(), flags::SENDONLY).unwrap();

        let mut outcome = Ok(());
        for _ in 0..200 {
            outcome = conv.send(&Buffer::string("x"), flags::NONE);
            if outcome.is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let err = outcome.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Event(Event::SvcErr)));
        assert!(!conv.is_open());
        assert!(!conv.closed_gracefully());
    }

    #[test]
    fn test_drop_disconnects_client_end() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        ctx.advertise("LISTEN", move |mut svc: ServiceHandle| {
            let outcome = svc.conversation().receive(flags::NOTIME, None);
            let open = svc.conversation().is_open();
            let _ = tx.lock().send((outcome.err().and_then(|e| e.kind()), open));
        })
        .unwrap();

        {
            let mut conv = Conversation::new(&ctx);
            conv.connect("LISTEN", &Buffer::new(), flags::SENDONLY).unwrap();
        }

        let (kind, open) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(kind, Some(ErrorKind::Event(Event::Disconnect)));
        assert!(!open);
    }

    #[test]
    fn test_nonblocking_receive_without_message() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        ctx.advertise("IDLE", |_svc: ServiceHandle| {
            std::thread::sleep(Duration::from_millis(500));
        })
        .unwrap();

        let mut conv = Conversation::new(&ctx);
        conv.connect("IDLE", &Buffer::new(), flags::RECVONLY).unwrap();
        let mut out = Buffer::string("recycled");
        assert!(conv
            .receive_nonblocking(flags::NONE, Some(&mut out))
            .unwrap()
            .is_none());
        assert_eq!(out.as_str().unwrap(), "recycled");
        assert!(conv.is_open());
    }
}
