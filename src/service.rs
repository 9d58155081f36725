//! Service-side invocation handle.
//!
//! A [`ServiceHandle`] wraps the invocation record of one service call. The
//! routine records its outcome with [`ServiceHandle::reply`] or
//! [`ServiceHandle::forward`]; the transport is told only when the handle is
//! dropped, after everything the routine created later has been dropped.
//! The routine receives the handle by value, so it is always the outermost
//! value of the routine.
//!
//! Without a recorded outcome the invocation fails with code 0.

use crate::buffer::Buffer;
use crate::context::Context;
use crate::conversation::Conversation;
use crate::transport::flags::{self, Flags};
use crate::transport::{ClientId, Descriptor, Disposition, Invocation};

/// Handle to the service invocation being processed.
#[derive(Debug)]
pub struct ServiceHandle {
    ctx: Context,
    request: Buffer,
    name: String,
    flags: Flags,
    appkey: i64,
    cd: Descriptor,
    client: ClientId,
    conversation: Conversation,
    disposition: Disposition,
    rcode: i64,
    output: Option<Buffer>,
    forward_to: String,
}

impl ServiceHandle {
    /// Take over an invocation delivered on `ctx`.
    pub fn new(ctx: Context, mut invocation: Invocation) -> Self {
        let request = invocation
            .data
            .take()
            .map(Buffer::from_region)
            .unwrap_or_default();
        let conversation = Conversation::from_invocation(&ctx, &invocation);
        Self {
            ctx,
            request,
            name: invocation.name,
            flags: invocation.flags,
            appkey: invocation.appkey,
            cd: invocation.cd,
            client: invocation.client,
            conversation,
            disposition: Disposition::default(),
            rcode: 0,
            output: None,
            forward_to: String::new(),
        }
    }

    /// The request payload.
    pub fn request(&self) -> &Buffer {
        &self.request
    }

    /// Move the request payload out, leaving a null buffer behind.
    pub fn take_request(&mut self) -> Buffer {
        std::mem::take(&mut self.request)
    }

    /// Name the service was invoked under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invocation flags.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Whether the invocation carries `flag`.
    pub fn has_flag(&self, flag: Flags) -> bool {
        flags::has_flag(self.flags, flag)
    }

    /// Application key of the caller.
    pub fn appkey(&self) -> i64 {
        self.appkey
    }

    /// Conversation descriptor, [`NO_SESSION`](crate::transport::NO_SESSION)
    /// for plain calls.
    pub fn connection_descriptor(&self) -> Descriptor {
        self.cd
    }

    /// Identity of the calling client.
    pub fn client_id(&self) -> ClientId {
        self.client
    }

    /// Service end of the conversation (closed for plain calls).
    pub fn conversation(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    /// Context the routine runs on, for calls made on the caller's behalf.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Record the reply sent when the handle drops.
    ///
    /// Replaces any earlier `reply` or `forward`. A missing `rcode` means 0.
    pub fn reply(&mut self, disposition: Disposition, output: Option<Buffer>, rcode: Option<i64>) {
        self.disposition = disposition;
        self.output = output;
        self.rcode = rcode.unwrap_or(0);
        self.forward_to.clear();
    }

    /// Record a forward of the invocation to `service`.
    ///
    /// Replaces any earlier `reply` or `forward`.
    pub fn forward(&mut self, service: &str, output: Option<Buffer>) {
        self.forward_to = service.to_string();
        self.output = output;
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        let output = self.output.take().and_then(|mut buffer| buffer.release());
        let transport = self.ctx.transport();

        if self.forward_to.is_empty() {
            tracing::debug!(
                "{} returns {:?} (code {})",
                self.name,
                self.disposition,
                self.rcode
            );
            if let Err(e) = transport.service_return(self.disposition, self.rcode, output) {
                tracing::error!("Return from {} failed: {}", self.name, e);
            }
        } else {
            tracing::debug!("{} forwards to {}", self.name, self.forward_to);
            if let Err(e) = transport.forward(&self.forward_to, output) {
                tracing::error!("Forward from {} to {} failed: {}", self.name, self.forward_to, e);
            }
        }
    }
}
