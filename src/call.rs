//! Synchronous request/response.
//!
//! # Buffer discipline
//!
//! Every operation that receives a payload borrows the caller's output
//! buffer through a [`Lease`]: the region is released to the transport for
//! the duration of the call and acquired back on every exit path. Only when
//! the transport reports a delivered, non-empty payload does the output
//! buffer become the returned value; otherwise it is left with the caller,
//! untouched (a null buffer stays null), and an empty buffer is returned.
//! This lets callers recycle one output buffer across many calls.

use crate::buffer::{Buffer, BufferType, Region};
use crate::context::Context;
use crate::error::{Result, TpwireError};
use crate::failure::ServiceFailure;
use crate::transport::{Delivery, ErrorKind, Event, Flags, TransportError, TransportResult};

/// Guard lending an output buffer's region to the transport.
///
/// The region is handed back to the buffer when the guard drops.
pub(crate) struct Lease<'a> {
    owner: &'a mut Buffer,
    region: Option<Region>,
    provisioned: bool,
}

impl<'a> Lease<'a> {
    /// Borrow `owner`'s region, provisioning a default one if it is null.
    pub(crate) fn new(owner: &'a mut Buffer) -> Self {
        let provisioned = owner.is_null();
        owner.alloc_default();
        let region = owner.release();
        Self {
            owner,
            region,
            provisioned,
        }
    }

    /// The lent region.
    pub(crate) fn region(&mut self) -> &mut Region {
        // `new` always stores a region and only `finish`/drop take it.
        self.region
            .get_or_insert_with(|| Region::with_capacity(BufferType::default(), 0))
    }

    /// Return the region and decide what the caller gets back.
    ///
    /// `delivered` is the payload length the transport reported. When it is
    /// non-zero the owner's buffer is moved out (leaving the owner null);
    /// otherwise the owner keeps what it had and an empty buffer is returned.
    pub(crate) fn finish(mut self, delivered: usize) -> Buffer {
        self.restore(delivered);
        if delivered > 0 {
            std::mem::take(&mut *self.owner)
        } else {
            Buffer::new()
        }
    }

    fn restore(&mut self, delivered: usize) {
        if let Some(region) = self.region.take() {
            // A region provisioned for a null owner is discarded unused.
            if delivered > 0 || !self.provisioned {
                self.owner.acquire(region);
            }
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.restore(0);
    }
}

/// Payload length a transport result reports as written to the output region.
pub(crate) fn delivered(result: &TransportResult<Delivery>) -> usize {
    match result {
        Ok(delivery) => delivery.len,
        Err(e) => e.len,
    }
}

/// Translate a failed reply into the crate error.
///
/// Service failures carry the payload the service returned, if any.
pub(crate) fn reply_error(
    operation: &'static str,
    service: &str,
    error: TransportError,
    payload: Buffer,
) -> TpwireError {
    match error.kind {
        ErrorKind::SvcFail | ErrorKind::Event(Event::SvcFail) => {
            ServiceFailure::with_buffer(service, error.urcode, payload).into()
        }
        _ => TpwireError::transport(operation, service, error),
    }
}

impl Context {
    /// Call `service` and block for its reply.
    ///
    /// When `output` is given it is reused for the reply; see the module
    /// documentation for when it is moved into the result.
    ///
    /// # Errors
    ///
    /// [`TpwireError::Service`] when the service reported failure,
    /// [`TpwireError::Transport`] for every other failure.
    pub fn call(
        &self,
        service: &str,
        input: &Buffer,
        flags: Flags,
        output: Option<&mut Buffer>,
    ) -> Result<Buffer> {
        let mut scratch = Buffer::new();
        let output = output.unwrap_or(&mut scratch);

        tracing::debug!("call {} on {}", service, self.id());
        let mut lease = Lease::new(output);
        let result = self
            .transport()
            .call(service, input.region(), lease.region(), flags);
        let reply = lease.finish(delivered(&result));

        match result {
            Ok(_) => Ok(reply),
            Err(e) => Err(reply_error("call", service, e, reply)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::flags;
    use crate::transport::loopback::Loopback;
    use crate::{Disposition, ServiceHandle};

    fn domain() -> (Loopback, Context) {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        ctx.advertise("TOUPPER", |mut svc: ServiceHandle| {
            let text = svc.request().as_str().unwrap_or_default().to_uppercase();
            svc.reply(Disposition::Success, Some(Buffer::string(&text)), None);
        })
        .unwrap();
        ctx.advertise("EMPTY", |mut svc: ServiceHandle| {
            svc.reply(Disposition::Success, None, Some(5));
        })
        .unwrap();
        ctx.advertise("FAIL", |mut svc: ServiceHandle| {
            svc.reply(
                Disposition::Fail,
                Some(Buffer::string("error message")),
                Some(-1),
            );
        })
        .unwrap();
        (domain, ctx)
    }

    #[test]
    fn test_lease_returns_region_on_drop() {
        let mut buf = Buffer::string("keep");
        {
            let mut lease = Lease::new(&mut buf);
            assert_eq!(lease.region().as_bytes(), b"keep");
        }
        assert_eq!(buf.as_str().unwrap(), "keep");
    }

    #[test]
    fn test_lease_provisions_default() {
        let mut buf = Buffer::new();
        let mut lease = Lease::new(&mut buf);
        assert_eq!(lease.region().kind(), BufferType::Carray);
        let reply = lease.finish(0);
        assert!(reply.is_null());
        assert!(buf.is_null());
    }

    #[test]
    fn test_lease_keeps_undelivered_contents() {
        let mut buf = Buffer::string("keep");
        let lease = Lease::new(&mut buf);
        let reply = lease.finish(0);
        assert!(reply.is_null());
        assert_eq!(buf.as_str().unwrap(), "keep");
    }

    #[test]
    fn test_lease_finish_moves_delivered_payload() {
        let mut buf = Buffer::new();
        let mut lease = Lease::new(&mut buf);
        lease.region().fill(BufferType::String, b"reply");
        let reply = lease.finish(5);
        assert_eq!(reply.data(), b"reply");
        assert!(buf.is_null());
    }

    #[test]
    fn test_call_uppercase() {
        let (_domain, ctx) = domain();
        let reply = ctx
            .call("TOUPPER", &Buffer::string("hello"), flags::NONE, None)
            .unwrap();
        assert_eq!(reply.data(), b"HELLO");
        assert_eq!(reply.buffer_type(), Some(BufferType::String));
    }

    #[test]
    fn test_call_reuses_output_buffer() {
        let (_domain, ctx) = domain();
        let mut out = Buffer::alloc(BufferType::Carray, 64);

        let reply = ctx
            .call("TOUPPER", &Buffer::string("abc"), flags::NONE, Some(&mut out))
            .unwrap();
        assert_eq!(reply.data(), b"ABC");
        assert!(out.is_null());
    }

    #[test]
    fn test_call_empty_reply_leaves_output() {
        let (_domain, ctx) = domain();
        let mut out = Buffer::alloc(BufferType::Xml, 64);

        let reply = ctx
            .call("EMPTY", &Buffer::new(), flags::NONE, Some(&mut out))
            .unwrap();
        assert!(reply.is_null());
        assert_eq!(out.buffer_type(), Some(BufferType::Xml));
    }

    #[test]
    fn test_call_keeps_caller_bytes_without_payload() {
        let (_domain, ctx) = domain();

        let mut out = Buffer::string("keep");
        let reply = ctx
            .call("EMPTY", &Buffer::new(), flags::NONE, Some(&mut out))
            .unwrap();
        assert!(reply.is_null());
        assert_eq!(out.as_str().unwrap(), "keep");

        let err = ctx
            .call("NOPE", &Buffer::string("x"), flags::NONE, Some(&mut out))
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoEnt));
        assert_eq!(out.as_str().unwrap(), "keep");
    }

    #[test]
    fn test_call_leaves_null_output_null() {
        let (_domain, ctx) = domain();
        let mut out = Buffer::new();
        let reply = ctx
            .call("EMPTY", &Buffer::new(), flags::NONE, Some(&mut out))
            .unwrap();
        assert!(reply.is_null());
        assert!(out.is_null());
    }

    #[test]
    fn test_call_service_failure() {
        let (_domain, ctx) = domain();
        let err = ctx
            .call("FAIL", &Buffer::string("x"), flags::NONE, None)
            .unwrap_err();
        let failure = err.service_failure().unwrap();
        assert_eq!(failure.service(), "FAIL");
        assert_eq!(failure.user_code(), -1);
        assert_eq!(failure.buffer().data(), b"error message");
    }

    #[test]
    fn test_call_unknown_service() {
        let (_domain, ctx) = domain();
        let err = ctx
            .call("NOPE", &Buffer::string("x"), flags::NONE, None)
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoEnt));
        assert!(err.to_string().contains("NOPE"));
    }
}
