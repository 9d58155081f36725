//! Asynchronous request/response.
//!
//! An [`AsyncCall`] submits a request without waiting for the reply. While
//! the call is pending its handle is registered in the
//! [`PendingCallRegistry`] so that [`Context::get_any_reply`] and
//! [`Context::process_pending_async_calls`] can route replies harvested in
//! any order back to it.
//!
//! Outcomes reach the application through one of three paths:
//!
//! - a direct [`AsyncCall::get_reply`] on the handle,
//! - the continuation bound with [`AsyncCall::then`] (or the error handler
//!   bound with [`AsyncCall::on_error`]) while the context is drained,
//! - a stored outcome, kept when draining finds no handler and delivered as
//!   soon as one is attached or `get_reply` is called.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::call::{delivered, reply_error, Lease};
use crate::context::Context;
use crate::error::{Result, TpwireError};
use crate::registry::PendingCallRegistry;
use crate::transport::flags::{self, Flags};
use crate::transport::{Descriptor, ErrorKind, NO_DESCRIPTOR};

/// Continuation receiving a successful reply.
pub type Continuation = Box<dyn FnMut(Buffer) -> Result<()> + Send>;

/// Handler receiving a failed outcome.
pub type ErrorHandler = Box<dyn FnMut(TpwireError) -> Result<()> + Send>;

/// Lifecycle of an asynchronous call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    /// Nothing submitted, or the last submission expected no reply.
    #[default]
    Init,
    /// Submitted; the reply has not been harvested.
    Pending,
    /// Submission or reply failed.
    Failed,
    /// Reply harvested.
    Succeeded,
}

struct Slot {
    state: CallState,
    cd: Descriptor,
    service: String,
    urcode: i64,
    reply: Option<Buffer>,
    error: Option<TpwireError>,
    then: Option<Continuation>,
    on_error: Option<ErrorHandler>,
}

impl Slot {
    fn reset(&mut self) {
        self.state = CallState::Init;
        self.cd = NO_DESCRIPTOR;
        self.service.clear();
        self.urcode = 0;
        self.reply = None;
        self.error = None;
    }
}

/// Shared state of one asynchronous call.
///
/// Owned by the [`AsyncCall`] and, while the call is pending, by the
/// registry. Handlers always run with the slot unlocked.
pub(crate) struct CallSlot(Mutex<Slot>);

impl CallSlot {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(Slot {
            state: CallState::Init,
            cd: NO_DESCRIPTOR,
            service: String::new(),
            urcode: 0,
            reply: None,
            error: None,
            then: None,
            on_error: None,
        }))
    }

    fn service(&self) -> String {
        self.0.lock().service.clone()
    }

    /// Leave `Pending`: the descriptor is consumed.
    fn settle(&self, state: CallState, urcode: Option<i64>) {
        let mut slot = self.0.lock();
        slot.state = state;
        slot.cd = NO_DESCRIPTOR;
        if let Some(urcode) = urcode {
            slot.urcode = urcode;
        }
    }

    /// Hand a reply to the continuation, or store it.
    pub(crate) fn deliver_reply(&self, reply: Buffer) {
        let (mut handler, service) = {
            let mut slot = self.0.lock();
            match slot.then.take() {
                Some(handler) => (handler, slot.service.clone()),
                None => {
                    slot.error = None;
                    slot.reply = Some(reply);
                    return;
                }
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(reply)));
        {
            let mut slot = self.0.lock();
            if slot.then.is_none() {
                slot.then = Some(handler);
            }
        }

        let outcome = outcome.unwrap_or_else(|_| {
            tracing::error!("Continuation for {} panicked", service);
            Err(TpwireError::Protocol(format!(
                "continuation for {} panicked",
                service
            )))
        });
        if let Err(e) = outcome {
            tracing::warn!("Continuation for {} failed: {}", service, e);
            self.deliver_error(e);
        }
    }

    /// Hand an error to the error handler, or store it.
    pub(crate) fn deliver_error(&self, error: TpwireError) {
        let (mut handler, service) = {
            let mut slot = self.0.lock();
            match slot.on_error.take() {
                Some(handler) => (handler, slot.service.clone()),
                None => {
                    slot.reply = None;
                    slot.error = Some(error);
                    return;
                }
            }
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(error))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Error handler for {} failed: {}", service, e),
            Err(_) => tracing::error!("Error handler for {} panicked", service),
        }
        let mut slot = self.0.lock();
        if slot.on_error.is_none() {
            slot.on_error = Some(handler);
        }
    }
}

/// Handle to one asynchronous call.
///
/// A handle can be reused: [`start`](Self::start) submits a new call
/// (cancelling a pending one first) while handler bindings are kept.
/// Dropping a pending handle cancels its call.
///
/// # Example
///
/// ```
/// use tpwire::buffer::Buffer;
/// use tpwire::transport::flags;
/// use tpwire::transport::loopback::Loopback;
/// use tpwire::{AsyncCall, Disposition, ServiceHandle};
///
/// let domain = Loopback::new().unwrap();
/// let ctx = domain.client();
/// ctx.advertise("ECHO", |mut svc: ServiceHandle| {
///     let request = svc.take_request();
///     svc.reply(Disposition::Success, Some(request), None);
/// })
/// .unwrap();
///
/// let mut call = AsyncCall::new(&ctx);
/// call.start("ECHO", &Buffer::string("ping"), flags::NONE);
/// assert!(call.is_pending());
///
/// let reply = call.get_reply(flags::NONE, None).unwrap();
/// assert_eq!(reply.data(), b"ping");
/// ```
pub struct AsyncCall {
    ctx: Context,
    slot: Arc<CallSlot>,
}

impl AsyncCall {
    /// Create an idle handle on `ctx`.
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            slot: Arc::new(CallSlot::new()),
        }
    }

    /// Submit a request to `service`.
    ///
    /// Never fails: submission errors move the handle to
    /// [`CallState::Failed`] and go through the error channel. When the
    /// transport reports too many outstanding calls, the context is drained
    /// for [`ClientConfig::limit_drain_timeout`](crate::ClientConfig) and the
    /// submission is retried once.
    pub fn start(&mut self, service: &str, input: &Buffer, flags: Flags) -> &mut Self {
        if self.is_pending() {
            self.cancel();
        }
        {
            let mut slot = self.slot.0.lock();
            slot.reset();
            slot.service.push_str(service);
        }

        let transport = self.ctx.transport();
        let mut result = transport.acall(service, input.region(), flags);
        if matches!(&result, Err(e) if e.kind == ErrorKind::Limit) {
            tracing::debug!(
                "Too many outstanding calls on {}, draining before resubmitting {}",
                self.ctx.id(),
                service
            );
            self.ctx
                .process_pending_async_calls(self.ctx.config().limit_drain_timeout);
            result = transport.acall(service, input.region(), flags);
        }

        match result {
            Ok(_) if flags::has_flag(flags, flags::NOREPLY) => {
                tracing::debug!("Submitted {} without reply", service);
            }
            Ok(cd) => {
                {
                    let mut slot = self.slot.0.lock();
                    slot.state = CallState::Pending;
                    slot.cd = cd;
                }
                PendingCallRegistry::global().add(self.ctx.id(), cd, self.slot.clone());
                tracing::debug!("Submitted {} as descriptor {} on {}", service, cd, self.ctx.id());
            }
            Err(e) => {
                self.slot.0.lock().state = CallState::Failed;
                self.slot
                    .deliver_error(TpwireError::transport("acall", service, e));
            }
        }
        self
    }

    /// Revoke the pending call, if any, and reset the handle.
    ///
    /// Handler bindings survive. Revocation failures are logged only.
    pub fn cancel(&mut self) {
        let (state, cd, service) = {
            let slot = self.slot.0.lock();
            (slot.state, slot.cd, slot.service.clone())
        };
        if state == CallState::Pending {
            PendingCallRegistry::global().erase(self.ctx.id(), cd);
            if let Err(e) = self.ctx.transport().cancel(cd) {
                tracing::warn!("Cancelling {} (descriptor {}) failed: {}", service, cd, e);
            }
        }
        self.slot.0.lock().reset();
    }

    /// [`cancel`](Self::cancel) and drop both handlers.
    pub fn clear(&mut self) {
        self.cancel();
        let mut slot = self.slot.0.lock();
        slot.then = None;
        slot.on_error = None;
    }

    /// Block until this call's reply arrives.
    ///
    /// A stored error or reply is returned first. `output`, when given, is
    /// reused for the reply under the same rules as
    /// [`Context::call`](crate::Context::call).
    ///
    /// # Errors
    ///
    /// [`TpwireError::Service`] when the service failed; otherwise
    /// [`TpwireError::Transport`]. The call stays pending only on
    /// `Invalid`, `Block`, or `Time` outside a transaction.
    pub fn get_reply(&mut self, flags: Flags, output: Option<&mut Buffer>) -> Result<Buffer> {
        let (cd, service) = {
            let mut slot = self.slot.0.lock();
            if let Some(error) = slot.error.take() {
                return Err(error);
            }
            if let Some(reply) = slot.reply.take() {
                return Ok(reply);
            }
            (slot.cd, slot.service.clone())
        };

        let mut scratch = Buffer::new();
        let output = output.unwrap_or(&mut scratch);
        let mut lease = Lease::new(output);
        let mut harvested = cd;
        let result = self.ctx.transport().get_reply(
            &mut harvested,
            lease.region(),
            flags & !flags::GETANY,
        );
        let reply = lease.finish(delivered(&result));

        let still_pending = match &result {
            Ok(_) => false,
            Err(e) => match e.kind {
                ErrorKind::Invalid | ErrorKind::Block => true,
                ErrorKind::Time => !self.ctx.transport().transaction_active(),
                _ => false,
            },
        };
        let urcode = match &result {
            Ok(delivery) => Some(delivery.urcode),
            Err(e) if e.kind == ErrorKind::SvcFail => Some(e.urcode),
            Err(_) => None,
        };

        if still_pending {
            if let Some(urcode) = urcode {
                self.slot.0.lock().urcode = urcode;
            }
        } else {
            let state = if result.is_ok() {
                CallState::Succeeded
            } else {
                CallState::Failed
            };
            self.slot.settle(state, urcode);
            PendingCallRegistry::global().erase(self.ctx.id(), cd);
        }

        match result {
            Ok(_) => Ok(reply),
            Err(e) => Err(reply_error("get_reply", &service, e, reply)),
        }
    }

    /// Like [`get_reply`](Self::get_reply) but returns `Ok(None)` instead of
    /// blocking when the reply has not arrived yet.
    pub fn get_reply_nonblocking(
        &mut self,
        flags: Flags,
        output: Option<&mut Buffer>,
    ) -> Result<Option<Buffer>> {
        match self.get_reply(flags | flags::NOBLOCK, output) {
            Ok(reply) => Ok(Some(reply)),
            Err(e) if e.kind() == Some(ErrorKind::Block) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Bind the continuation run with each successful reply.
    ///
    /// A reply that arrived earlier is delivered immediately.
    pub fn then<F>(&mut self, continuation: F) -> &mut Self
    where
        F: FnMut(Buffer) -> Result<()> + Send + 'static,
    {
        let stored = {
            let mut slot = self.slot.0.lock();
            slot.then = Some(Box::new(continuation));
            slot.reply.take()
        };
        if let Some(reply) = stored {
            self.slot.deliver_reply(reply);
        }
        self
    }

    /// Bind the handler run with each failure.
    ///
    /// An error captured earlier is delivered immediately.
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(TpwireError) -> Result<()> + Send + 'static,
    {
        let stored = {
            let mut slot = self.slot.0.lock();
            slot.on_error = Some(Box::new(handler));
            slot.error.take()
        };
        if let Some(error) = stored {
            self.slot.deliver_error(error);
        }
        self
    }

    /// Descriptor of the pending call, [`NO_DESCRIPTOR`] otherwise.
    pub fn call_descriptor(&self) -> Descriptor {
        self.slot.0.lock().cd
    }

    /// Service of the last submission.
    pub fn service_name(&self) -> String {
        self.slot.service()
    }

    /// Application return code of the last harvested reply.
    pub fn urcode(&self) -> i64 {
        self.slot.0.lock().urcode
    }

    /// Current state.
    pub fn state(&self) -> CallState {
        self.slot.0.lock().state
    }

    /// Whether nothing is in flight.
    pub fn is_init(&self) -> bool {
        self.state() == CallState::Init
    }

    /// Whether the reply is outstanding.
    pub fn is_pending(&self) -> bool {
        self.state() == CallState::Pending
    }

    /// Whether the call failed.
    pub fn is_failed(&self) -> bool {
        self.state() == CallState::Failed
    }

    /// Whether the reply was harvested.
    pub fn is_succeeded(&self) -> bool {
        self.state() == CallState::Succeeded
    }

    /// Context the call is issued on.
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

impl Drop for AsyncCall {
    fn drop(&mut self) {
        if self.is_pending() {
            self.cancel();
        }
    }
}

impl fmt::Debug for AsyncCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.0.lock();
        f.debug_struct("AsyncCall")
            .field("context", &self.ctx.id())
            .field("service", &slot.service)
            .field("state", &slot.state)
            .field("cd", &slot.cd)
            .field("urcode", &slot.urcode)
            .finish()
    }
}

impl Context {
    /// Harvest whichever pending reply of this context arrives first and
    /// dispatch it to its handle.
    ///
    /// Returns the descriptor that was serviced, or `None` when nothing was
    /// pending, nothing arrived in time, or the harvest would block. Never
    /// fails: per-call failures go to the owning handle's error channel.
    pub fn get_any_reply(&self, flags: Flags) -> Option<Descriptor> {
        let registry = PendingCallRegistry::global();
        if registry.size(self.id()) == 0 {
            return None;
        }

        let mut output = Buffer::new();
        let mut lease = Lease::new(&mut output);
        let mut cd = NO_DESCRIPTOR;
        let result = self
            .transport()
            .get_reply(&mut cd, lease.region(), flags | flags::GETANY);
        let reply = lease.finish(delivered(&result));

        if let Err(e) = &result {
            match e.kind {
                ErrorKind::Block => return None,
                ErrorKind::Invalid => {
                    tracing::warn!("Draining {} rejected: {}", self.id(), e);
                    return None;
                }
                _ => {}
            }
        }
        if cd == NO_DESCRIPTOR {
            if let Err(e) = &result {
                tracing::debug!("Nothing harvested on {}: {}", self.id(), e);
            }
            return None;
        }

        let Some(slot) = registry.erase(self.id(), cd) else {
            tracing::warn!("Harvested descriptor {} on {} has no handle", cd, self.id());
            return Some(cd);
        };
        let service = slot.service();
        tracing::debug!("Harvested {} (descriptor {}) on {}", service, cd, self.id());

        match result {
            Ok(delivery) => {
                slot.settle(CallState::Succeeded, Some(delivery.urcode));
                slot.deliver_reply(reply);
            }
            Err(e) => {
                let urcode = (e.kind == ErrorKind::SvcFail).then_some(e.urcode);
                slot.settle(CallState::Failed, urcode);
                slot.deliver_error(reply_error("get_any_reply", &service, e, reply));
            }
        }
        Some(cd)
    }

    /// Drain replies until no call of this context is pending or `timeout`
    /// elapses.
    ///
    /// Before each harvest the remaining time, floored to one unit of
    /// [`ClientConfig::granularity`](crate::ClientConfig), is installed as
    /// the transport's block time. Returns `true` if every pending call was
    /// serviced in time.
    pub fn process_pending_async_calls(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.async_calls_pending() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let residual = self.config().granularity.floor(deadline - now);
            if let Err(e) = self.transport().block_next(residual) {
                tracing::warn!("Cannot bound drain on {}: {}", self.id(), e);
                return false;
            }
            self.get_any_reply(flags::NONE);
        }
        true
    }
}
