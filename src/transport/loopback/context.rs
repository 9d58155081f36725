//! Loopback context: one descriptor space and reply queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::mailbox::{Inbox, Mailbox, Reply, Status, Wait};
use super::Domain;
use crate::buffer::Region;
use crate::transport::flags::{self, Flags};
use crate::transport::{
    AdvertiseMode, ClientId, ContextId, Delivery, Descriptor, Dispatch, Disposition, ErrorKind,
    Event, Invocation, Transport, TransportError, TransportResult, NO_DESCRIPTOR, NO_SESSION,
};

/// Application key reported for unauthenticated clients.
pub const ANONYMOUS_APPKEY: i64 = -1;

/// Context ids are unique across every loopback domain in the process.
static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// One message travelling over a conversation.
#[derive(Debug)]
struct Message {
    data: Option<Region>,
    event: Option<Event>,
    urcode: i64,
}

/// Both directions of a conversation.
pub(crate) struct Channel {
    to_service: Mailbox<Message>,
    to_client: Mailbox<Message>,
    service_done: AtomicBool,
    client_gone: AtomicBool,
}

impl Channel {
    fn new() -> Self {
        Self {
            to_service: Mailbox::new(),
            to_client: Mailbox::new(),
            service_done: AtomicBool::new(false),
            client_gone: AtomicBool::new(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Service,
}

#[derive(Clone)]
struct Endpoint {
    channel: Arc<Channel>,
    side: Side,
}

impl Endpoint {
    fn incoming(&self) -> &Mailbox<Message> {
        match self.side {
            Side::Client => &self.channel.to_client,
            Side::Service => &self.channel.to_service,
        }
    }

    fn outgoing(&self) -> &Mailbox<Message> {
        match self.side {
            Side::Client => &self.channel.to_service,
            Side::Service => &self.channel.to_client,
        }
    }

    /// Event a sender observes once the peer is gone.
    fn peer_gone(&self) -> Option<Event> {
        match self.side {
            Side::Client if self.channel.service_done.load(Ordering::Acquire) => {
                Some(Event::SvcErr)
            }
            Side::Service if self.channel.client_gone.load(Ordering::Acquire) => {
                Some(Event::Disconnect)
            }
            _ => None,
        }
    }
}

/// Where a service invocation's outcome goes.
pub(crate) enum Route {
    /// Reply queue of the calling context.
    Reply { inbox: Weak<Inbox>, cd: Descriptor },
    /// Fire-and-forget call.
    NoReply,
    /// Client end of a conversation.
    Conversation { channel: Arc<Channel> },
}

impl Route {
    /// Deliver the invocation's outcome.
    pub(crate) fn complete(self, status: Status, urcode: i64, data: Option<Region>) {
        match self {
            Route::NoReply => {}
            Route::Reply { inbox, cd } => {
                let delivered = inbox.upgrade().map_or(false, |inbox| {
                    inbox.deliver(
                        cd,
                        Reply {
                            status,
                            urcode,
                            data,
                        },
                    )
                });
                if !delivered {
                    tracing::debug!("Dropping reply for revoked descriptor {}", cd);
                }
            }
            Route::Conversation { channel } => {
                if channel.client_gone.load(Ordering::Acquire) {
                    return;
                }
                let event = match status {
                    Status::Success => Event::SvcSucc,
                    Status::Fail => Event::SvcFail,
                    Status::Error => Event::SvcErr,
                };
                channel.service_done.store(true, Ordering::Release);
                channel.to_client.push(Message {
                    data,
                    event: Some(event),
                    urcode,
                });
            }
        }
    }
}

/// A context of the loopback transport.
///
/// Client contexts come from [`Loopback::context`](super::Loopback::context);
/// every service invocation runs on a fresh serving context that also carries
/// the route its terminator replies on.
pub struct LoopbackContext {
    id: ContextId,
    domain: Arc<Domain>,
    inbox: Arc<Inbox>,
    limit: Arc<Semaphore>,
    next_cd: AtomicI32,
    conversations: Mutex<HashMap<Descriptor, Endpoint>>,
    block_next: Mutex<Option<Duration>>,
    in_transaction: AtomicBool,
    /// Client on whose behalf this context serves (its own id for clients).
    origin: ClientId,
    route: Mutex<Option<Route>>,
}

impl LoopbackContext {
    pub(crate) fn new(domain: Arc<Domain>) -> Self {
        let id = ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
        let limit = Arc::new(Semaphore::new(domain.config.max_outstanding));
        Self {
            id,
            domain,
            inbox: Arc::new(Inbox::new()),
            limit,
            next_cd: AtomicI32::new(1),
            conversations: Mutex::new(HashMap::new()),
            block_next: Mutex::new(None),
            in_transaction: AtomicBool::new(false),
            origin: ClientId(id.0),
            route: Mutex::new(None),
        }
    }

    fn serving(domain: Arc<Domain>, origin: ClientId, route: Route) -> Self {
        let mut ctx = Self::new(domain);
        ctx.origin = origin;
        ctx.route = Mutex::new(Some(route));
        ctx
    }

    /// Context id.
    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Mark this context as inside (or outside) a transaction.
    pub fn set_transaction_active(&self, active: bool) {
        self.in_transaction.store(active, Ordering::Release);
    }

    /// Take the pending route if the routine never terminated.
    pub(crate) fn abandon(&self) -> Option<Route> {
        self.route.lock().take()
    }

    fn next_descriptor(&self) -> Descriptor {
        self.next_cd.fetch_add(1, Ordering::Relaxed)
    }

    fn wait(&self, flags: Flags) -> Wait {
        // The one-shot block time is consumed only by operations that may block.
        let next = if flags::has_flag(flags, flags::NOBLOCK) {
            None
        } else {
            self.block_next.lock().take()
        };
        Wait::from_flags(flags, next, self.domain.config.block_time)
    }

    fn invocation(&self, name: &str, flags: Flags, input: Option<&Region>, cd: Descriptor) -> Invocation {
        Invocation {
            name: name.to_string(),
            flags,
            data: input.cloned(),
            appkey: ANONYMOUS_APPKEY,
            cd,
            client: self.origin,
        }
    }

    fn lookup(&self, service: &str) -> TransportResult<Dispatch> {
        self.domain
            .lookup(service)
            .ok_or_else(|| TransportError::new(ErrorKind::NoEnt, service))
    }

    fn endpoint(&self, cd: Descriptor) -> TransportResult<Endpoint> {
        self.conversations
            .lock()
            .get(&cd)
            .cloned()
            .ok_or_else(|| TransportError::new(ErrorKind::BadDesc, format!("conversation {}", cd)))
    }

    fn take_route(&self) -> TransportResult<Route> {
        self.route.lock().take().ok_or_else(|| {
            TransportError::new(ErrorKind::Proto, "no service invocation in progress")
        })
    }

    fn spawn(&self, dispatch: Dispatch, invocation: Invocation, route: Route) {
        let ctx = Arc::new(Self::serving(self.domain.clone(), self.origin, route));
        self.domain.spawn(dispatch, invocation, ctx);
    }
}

/// Copy a delivered payload into `output`, returning its length.
///
/// `output` is left alone when there is no payload.
fn write_output(output: &mut Region, data: Option<&Region>, flags: Flags) -> usize {
    match data {
        Some(data) if !data.is_empty() => {
            output.fill_from(data, flags::has_flag(flags, flags::NOCHANGE));
            data.len()
        }
        _ => 0,
    }
}

impl Transport for LoopbackContext {
    fn context_id(&self) -> ContextId {
        self.id
    }

    fn call(
        &self,
        service: &str,
        input: Option<&Region>,
        output: &mut Region,
        flags: Flags,
    ) -> TransportResult<Delivery> {
        if flags::has_flag(flags, flags::NOREPLY) {
            return Err(TransportError::new(
                ErrorKind::Invalid,
                "synchronous call cannot be NOREPLY",
            ));
        }
        let mut cd = self.acall(service, input, flags & !flags::GETANY)?;
        let result = self.get_reply(&mut cd, output, flags & !(flags::NOBLOCK | flags::GETANY));
        if matches!(&result, Err(e) if e.kind == ErrorKind::Time) {
            self.inbox.revoke(cd);
        }
        result
    }

    fn acall(
        &self,
        service: &str,
        input: Option<&Region>,
        flags: Flags,
    ) -> TransportResult<Descriptor> {
        let dispatch = self.lookup(service)?;

        if flags::has_flag(flags, flags::NOREPLY) {
            let invocation = self.invocation(service, flags::NOREPLY, input, NO_SESSION);
            self.spawn(dispatch, invocation, Route::NoReply);
            return Ok(NO_DESCRIPTOR);
        }

        let permit = self.limit.clone().try_acquire_owned().map_err(|_| {
            TransportError::new(
                ErrorKind::Limit,
                format!("{} replies outstanding", self.domain.config.max_outstanding),
            )
        })?;
        let cd = self.next_descriptor();
        self.inbox.register(cd, permit);

        let route = Route::Reply {
            inbox: Arc::downgrade(&self.inbox),
            cd,
        };
        let invocation = self.invocation(service, flags::NONE, input, NO_SESSION);
        self.spawn(dispatch, invocation, route);
        Ok(cd)
    }

    fn get_reply(
        &self,
        cd: &mut Descriptor,
        output: &mut Region,
        flags: Flags,
    ) -> TransportResult<Delivery> {
        let any = flags::has_flag(flags, flags::GETANY);
        if !any && *cd <= NO_DESCRIPTOR {
            return Err(TransportError::new(
                ErrorKind::Invalid,
                format!("descriptor {}", cd),
            ));
        }

        let wanted = if any { None } else { Some(*cd) };
        match self.inbox.take(wanted, self.wait(flags)) {
            Ok((got, reply)) => {
                *cd = got;
                let len = write_output(output, reply.data.as_ref(), flags);
                match reply.status {
                    Status::Success => Ok(Delivery {
                        urcode: reply.urcode,
                        len,
                    }),
                    Status::Fail => Err(TransportError::new(
                        ErrorKind::SvcFail,
                        format!("descriptor {}", got),
                    )
                    .with_urcode(reply.urcode)
                    .with_len(len)),
                    Status::Error => Err(TransportError::new(
                        ErrorKind::SvcErr,
                        format!("descriptor {}", got),
                    )
                    .with_len(len)),
                }
            }
            Err(ErrorKind::Time) => {
                if !any && self.transaction_active() {
                    self.inbox.revoke(*cd);
                }
                Err(TransportError::new(ErrorKind::Time, "no reply before block time"))
            }
            Err(kind) => Err(TransportError::new(kind, format!("descriptor {}", cd))),
        }
    }

    fn cancel(&self, cd: Descriptor) -> TransportResult<()> {
        if self.inbox.revoke(cd) {
            Ok(())
        } else {
            Err(TransportError::new(
                ErrorKind::BadDesc,
                format!("descriptor {}", cd),
            ))
        }
    }

    fn connect(
        &self,
        service: &str,
        input: Option<&Region>,
        flags: Flags,
    ) -> TransportResult<Descriptor> {
        let send_only = flags::has_flag(flags, flags::SENDONLY);
        if send_only == flags::has_flag(flags, flags::RECVONLY) {
            return Err(TransportError::new(
                ErrorKind::Invalid,
                "exactly one of SENDONLY or RECVONLY is required",
            ));
        }
        let dispatch = self.lookup(service)?;

        let channel = Arc::new(Channel::new());
        let cd = self.next_descriptor();
        self.conversations.lock().insert(
            cd,
            Endpoint {
                channel: channel.clone(),
                side: Side::Client,
            },
        );

        let peer_flags = flags::CONV
            | if send_only {
                flags::RECVONLY
            } else {
                flags::SENDONLY
            };
        let serving = Arc::new(Self::serving(
            self.domain.clone(),
            self.origin,
            Route::Conversation {
                channel: channel.clone(),
            },
        ));
        let service_cd = serving.next_descriptor();
        serving.conversations.lock().insert(
            service_cd,
            Endpoint {
                channel,
                side: Side::Service,
            },
        );

        let invocation = self.invocation(service, peer_flags, input, service_cd);
        self.domain.spawn(dispatch, invocation, serving);
        Ok(cd)
    }

    fn send(&self, cd: Descriptor, input: Option<&Region>, flags: Flags) -> TransportResult<()> {
        let endpoint = self.endpoint(cd)?;
        if let Some(event) = endpoint.peer_gone() {
            self.conversations.lock().remove(&cd);
            return Err(TransportError::new(
                ErrorKind::Event(event),
                format!("conversation {}", cd),
            ));
        }

        let event = flags::has_flag(flags, flags::RECVONLY).then_some(Event::SendOnly);
        endpoint.outgoing().push(Message {
            data: input.cloned(),
            event,
            urcode: 0,
        });
        Ok(())
    }

    fn receive(
        &self,
        cd: Descriptor,
        output: &mut Region,
        flags: Flags,
    ) -> TransportResult<Delivery> {
        let endpoint = self.endpoint(cd)?;
        let message = endpoint
            .incoming()
            .pop(self.wait(flags))
            .map_err(|kind| TransportError::new(kind, format!("conversation {}", cd)))?;

        let len = write_output(output, message.data.as_ref(), flags);
        match message.event {
            None => Ok(Delivery {
                urcode: message.urcode,
                len,
            }),
            Some(event) => {
                if event.is_terminal() {
                    self.conversations.lock().remove(&cd);
                }
                Err(
                    TransportError::new(ErrorKind::Event(event), format!("conversation {}", cd))
                        .with_urcode(message.urcode)
                        .with_len(len),
                )
            }
        }
    }

    fn disconnect(&self, cd: Descriptor) -> TransportResult<()> {
        let mut conversations = self.conversations.lock();
        match conversations.get(&cd).map(|e| e.side) {
            None => Err(TransportError::new(
                ErrorKind::BadDesc,
                format!("conversation {}", cd),
            )),
            Some(Side::Service) => Err(TransportError::new(
                ErrorKind::Proto,
                "only the initiator may disconnect",
            )),
            Some(Side::Client) => {
                if let Some(endpoint) = conversations.remove(&cd) {
                    endpoint.channel.client_gone.store(true, Ordering::Release);
                    endpoint.channel.to_service.push(Message {
                        data: None,
                        event: Some(Event::Disconnect),
                        urcode: 0,
                    });
                }
                Ok(())
            }
        }
    }

    fn advertise(
        &self,
        service: &str,
        dispatch: Dispatch,
        mode: AdvertiseMode,
    ) -> TransportResult<()> {
        self.domain.advertise(service, dispatch, mode)
    }

    fn unadvertise(&self, service: &str) -> TransportResult<()> {
        self.domain.unadvertise(service)
    }

    fn block_next(&self, timeout: Duration) -> TransportResult<()> {
        if timeout.is_zero() {
            return Err(TransportError::new(ErrorKind::Invalid, "zero block time"));
        }
        *self.block_next.lock() = Some(timeout);
        Ok(())
    }

    fn transaction_active(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    fn service_return(
        &self,
        disposition: Disposition,
        rcode: i64,
        output: Option<Region>,
    ) -> TransportResult<()> {
        let route = self.take_route()?;
        self.domain.terminated();
        self.conversations.lock().clear();

        let status = match disposition {
            Disposition::Success => Status::Success,
            Disposition::Fail => Status::Fail,
            Disposition::Exit => {
                tracing::warn!("Service requested server exit; loopback keeps serving");
                Status::Fail
            }
        };
        route.complete(status, rcode, output);
        Ok(())
    }

    fn forward(&self, service: &str, output: Option<Region>) -> TransportResult<()> {
        let route = self.take_route()?;
        self.domain.terminated();
        self.conversations.lock().clear();

        if matches!(route, Route::Conversation { .. }) {
            route.complete(Status::Error, 0, None);
            return Err(TransportError::new(
                ErrorKind::Proto,
                "conversations cannot be forwarded",
            ));
        }

        let dispatch = match self.domain.lookup(service) {
            Some(dispatch) => dispatch,
            None => {
                route.complete(Status::Error, 0, None);
                return Err(TransportError::new(ErrorKind::NoEnt, service));
            }
        };

        let invocation_flags = if matches!(route, Route::NoReply) {
            flags::NOREPLY
        } else {
            flags::NONE
        };
        let invocation = self.invocation(service, invocation_flags, output.as_ref(), NO_SESSION);
        self.spawn(dispatch, invocation, route);
        Ok(())
    }
}
