//! Transport module - the seam to the middleware.
//!
//! Everything the core needs from the middleware is expressed by the
//! [`Transport`] trait. One transport instance is one *context*: it owns a
//! descriptor space and a reply queue, and is shared by the handles created
//! on it. Distinct contexts never observe each other's descriptors.
//!
//! - [`flags`] - flag bits passed to every operation
//! - [`ErrorKind`] / [`Event`] / [`TransportError`] - failure reporting
//! - [`loopback`] - in-process transport used by tests and demos

pub mod flags;
pub mod loopback;

mod error;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use error::{ErrorKind, Event, TransportError};
pub use flags::Flags;

use crate::buffer::Region;

/// Descriptor of an outstanding asynchronous call or a conversation.
pub type Descriptor = i32;

/// Descriptor value meaning "no call pending".
pub const NO_DESCRIPTOR: Descriptor = 0;

/// Descriptor value meaning "no conversation".
pub const NO_SESSION: Descriptor = -1;

/// Result of a transport operation.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Identity of a transport context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Identity of the client that issued an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// How a service routine terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// The service succeeded.
    Success,
    /// The service failed.
    #[default]
    Fail,
    /// The service failed and its server should exit.
    Exit,
}

/// Which request queue a service is advertised on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvertiseMode {
    /// The server's primary request queue.
    #[default]
    Primary,
    /// The server's secondary request queue.
    Secondary,
}

/// Outcome of an operation that may deliver a payload.
///
/// `len` is the number of payload bytes written to the output region. Zero
/// means the region was not touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    /// Application return code.
    pub urcode: i64,
    /// Payload length.
    pub len: usize,
}

/// Invocation record handed to a service routine.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Name the service was invoked under.
    pub name: String,
    /// Invocation flags (`CONV`, `SENDONLY`, `RECVONLY`, `NOREPLY`, ...).
    pub flags: Flags,
    /// Request payload.
    pub data: Option<Region>,
    /// Application key of the client.
    pub appkey: i64,
    /// Conversation descriptor, [`NO_SESSION`] outside conversations.
    pub cd: Descriptor,
    /// Calling client.
    pub client: ClientId,
}

/// Routine the transport runs for an advertised service.
///
/// The transport argument is the context the routine must use for its
/// terminator and for any calls it makes.
pub type Dispatch = Arc<dyn Fn(Invocation, Arc<dyn Transport>) + Send + Sync>;

/// Operations the core consumes from the middleware.
///
/// Output regions are borrowed for the duration of the call. They are
/// written only when a payload is delivered, and the delivered length is
/// reported in [`Delivery::len`] (or [`TransportError::len`] on failure).
pub trait Transport: Send + Sync {
    /// Identity of this context.
    fn context_id(&self) -> ContextId;

    /// Synchronous request/response.
    fn call(
        &self,
        service: &str,
        input: Option<&Region>,
        output: &mut Region,
        flags: Flags,
    ) -> TransportResult<Delivery>;

    /// Submit an asynchronous request. Returns [`NO_DESCRIPTOR`] with `NOREPLY`.
    fn acall(&self, service: &str, input: Option<&Region>, flags: Flags)
        -> TransportResult<Descriptor>;

    /// Harvest a reply.
    ///
    /// With `GETANY` the descriptor is an output: it is set to the descriptor
    /// of whichever call was harvested (also on service failure).
    fn get_reply(
        &self,
        cd: &mut Descriptor,
        output: &mut Region,
        flags: Flags,
    ) -> TransportResult<Delivery>;

    /// Revoke an outstanding asynchronous call.
    fn cancel(&self, cd: Descriptor) -> TransportResult<()>;

    /// Open a conversation.
    fn connect(&self, service: &str, input: Option<&Region>, flags: Flags)
        -> TransportResult<Descriptor>;

    /// Send on a conversation.
    fn send(&self, cd: Descriptor, input: Option<&Region>, flags: Flags) -> TransportResult<()>;

    /// Receive on a conversation.
    ///
    /// Termination and handover are reported as [`ErrorKind::Event`] with the
    /// payload (if any) already written to `output`.
    fn receive(&self, cd: Descriptor, output: &mut Region, flags: Flags)
        -> TransportResult<Delivery>;

    /// Tear a conversation down abruptly.
    fn disconnect(&self, cd: Descriptor) -> TransportResult<()>;

    /// Advertise a service routine.
    fn advertise(&self, service: &str, dispatch: Dispatch, mode: AdvertiseMode)
        -> TransportResult<()>;

    /// Withdraw a service.
    fn unadvertise(&self, service: &str) -> TransportResult<()>;

    /// Block time for the next blocking operation only.
    fn block_next(&self, timeout: Duration) -> TransportResult<()>;

    /// Whether this context is inside a transaction.
    fn transaction_active(&self) -> bool;

    /// Terminate the current service invocation with a reply.
    fn service_return(
        &self,
        disposition: Disposition,
        rcode: i64,
        output: Option<Region>,
    ) -> TransportResult<()>;

    /// Terminate the current service invocation by forwarding it.
    fn forward(&self, service: &str, output: Option<Region>) -> TransportResult<()>;
}
