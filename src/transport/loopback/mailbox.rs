//! Blocking queues backing loopback replies and conversations.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::OwnedSemaphorePermit;

use crate::buffer::Region;
use crate::transport::flags::{self, Flags};
use crate::transport::{Descriptor, ErrorKind};

/// How long a receiving operation may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    NoBlock,
    Until(Instant),
    Forever,
}

impl Wait {
    /// Resolve the wait for an operation carrying `flags`.
    ///
    /// `next` is the one-shot block time installed for this operation, if any.
    pub(crate) fn from_flags(flags: Flags, next: Option<Duration>, default: Duration) -> Self {
        if flags::has_flag(flags, flags::NOBLOCK) {
            Wait::NoBlock
        } else if flags::has_flag(flags, flags::NOTIME) {
            Wait::Forever
        } else {
            Wait::Until(Instant::now() + next.unwrap_or(default))
        }
    }
}

/// FIFO queue with blocking pop.
pub(crate) struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, item: T) {
        self.queue.lock().push_back(item);
        self.ready.notify_all();
    }

    pub(crate) fn pop(&self, wait: Wait) -> Result<T, ErrorKind> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(item) = queue.pop_front() {
                return Ok(item);
            }
            match wait {
                Wait::NoBlock => return Err(ErrorKind::Block),
                Wait::Forever => self.ready.wait(&mut queue),
                Wait::Until(deadline) => {
                    if self.ready.wait_until(&mut queue, deadline).timed_out() {
                        return queue.pop_front().ok_or(ErrorKind::Time);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// How a service ended, as seen by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Success,
    Fail,
    Error,
}

/// A service's reply to an asynchronous or synchronous call.
#[derive(Debug)]
pub(crate) struct Reply {
    pub(crate) status: Status,
    pub(crate) urcode: i64,
    pub(crate) data: Option<Region>,
}

#[derive(Default)]
struct InboxState {
    /// Descriptors awaiting harvest, each holding one outstanding-call permit.
    outstanding: HashMap<Descriptor, OwnedSemaphorePermit>,
    /// Replies in arrival order.
    arrived: VecDeque<(Descriptor, Reply)>,
}

/// Per-context reply queue.
pub(crate) struct Inbox {
    state: Mutex<InboxState>,
    ready: Condvar,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(InboxState::default()),
            ready: Condvar::new(),
        }
    }

    /// Start expecting a reply for `cd`.
    pub(crate) fn register(&self, cd: Descriptor, permit: OwnedSemaphorePermit) {
        self.state.lock().outstanding.insert(cd, permit);
    }

    /// Queue a reply. Replies for revoked descriptors are dropped.
    pub(crate) fn deliver(&self, cd: Descriptor, reply: Reply) -> bool {
        let mut state = self.state.lock();
        if !state.outstanding.contains_key(&cd) {
            return false;
        }
        state.arrived.push_back((cd, reply));
        drop(state);
        self.ready.notify_all();
        true
    }

    /// Forget `cd` and any reply already queued for it.
    pub(crate) fn revoke(&self, cd: Descriptor) -> bool {
        let mut state = self.state.lock();
        if state.outstanding.remove(&cd).is_none() {
            return false;
        }
        state.arrived.retain(|(d, _)| *d != cd);
        true
    }

    /// Harvest the reply for `cd`, or the first arrived reply when `cd` is `None`.
    pub(crate) fn take(
        &self,
        cd: Option<Descriptor>,
        wait: Wait,
    ) -> Result<(Descriptor, Reply), ErrorKind> {
        let mut state = self.state.lock();
        loop {
            let known = match cd {
                Some(cd) => state.outstanding.contains_key(&cd),
                None => !state.outstanding.is_empty(),
            };
            if !known {
                return Err(ErrorKind::BadDesc);
            }

            let position = state
                .arrived
                .iter()
                .position(|(d, _)| cd.map_or(true, |cd| *d == cd));
            if let Some((got, reply)) = position.and_then(|p| state.arrived.remove(p)) {
                state.outstanding.remove(&got);
                return Ok((got, reply));
            }

            match wait {
                Wait::NoBlock => return Err(ErrorKind::Block),
                Wait::Forever => self.ready.wait(&mut state),
                Wait::Until(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        return Err(ErrorKind::Time);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    fn permit(sem: &Arc<Semaphore>) -> OwnedSemaphorePermit {
        sem.clone().try_acquire_owned().unwrap()
    }

    fn reply(text: &str) -> Reply {
        Reply {
            status: Status::Success,
            urcode: 0,
            data: Some(Region::from_slice(
                crate::buffer::BufferType::String,
                text.as_bytes(),
            )),
        }
    }

    #[test]
    fn test_wait_from_flags() {
        let default = Duration::from_secs(60);
        assert_eq!(Wait::from_flags(flags::NOBLOCK, None, default), Wait::NoBlock);
        assert_eq!(Wait::from_flags(flags::NOTIME, None, default), Wait::Forever);
        assert!(matches!(
            Wait::from_flags(flags::NONE, Some(Duration::from_millis(5)), default),
            Wait::Until(_)
        ));
    }

    #[test]
    fn test_mailbox_fifo() {
        let mailbox = Mailbox::new();
        mailbox.push(1);
        mailbox.push(2);
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.pop(Wait::NoBlock), Ok(1));
        assert_eq!(mailbox.pop(Wait::NoBlock), Ok(2));
        assert_eq!(mailbox.pop(Wait::NoBlock), Err(ErrorKind::Block));
    }

    #[test]
    fn test_mailbox_timeout() {
        let mailbox: Mailbox<u8> = Mailbox::new();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(mailbox.pop(Wait::Until(deadline)), Err(ErrorKind::Time));
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn test_mailbox_wakes_waiter() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = mailbox.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push("late");
        });
        assert_eq!(mailbox.pop(Wait::Forever), Ok("late"));
        handle.join().unwrap();
    }

    #[test]
    fn test_inbox_specific_and_any() {
        let sem = Arc::new(Semaphore::new(4));
        let inbox = Inbox::new();
        inbox.register(1, permit(&sem));
        inbox.register(2, permit(&sem));
        assert_eq!(sem.available_permits(), 2);

        assert!(inbox.deliver(2, reply("two")));
        assert!(inbox.deliver(1, reply("one")));

        let (cd, got) = inbox.take(Some(1), Wait::NoBlock).unwrap();
        assert_eq!(cd, 1);
        assert_eq!(got.data.unwrap().as_bytes(), b"one");

        let (cd, _) = inbox.take(None, Wait::NoBlock).unwrap();
        assert_eq!(cd, 2);

        // Harvest releases the permits.
        assert_eq!(sem.available_permits(), 4);
        assert_eq!(inbox.take(None, Wait::NoBlock).unwrap_err(), ErrorKind::BadDesc);
    }

    #[test]
    fn test_inbox_block_and_unknown() {
        let sem = Arc::new(Semaphore::new(1));
        let inbox = Inbox::new();
        inbox.register(7, permit(&sem));

        assert_eq!(inbox.take(Some(7), Wait::NoBlock).unwrap_err(), ErrorKind::Block);
        assert_eq!(inbox.take(Some(8), Wait::NoBlock).unwrap_err(), ErrorKind::BadDesc);
    }

    #[test]
    fn test_inbox_revoke_drops_late_reply() {
        let sem = Arc::new(Semaphore::new(1));
        let inbox = Inbox::new();
        inbox.register(3, permit(&sem));

        assert!(inbox.revoke(3));
        assert!(!inbox.revoke(3));
        assert!(!inbox.deliver(3, reply("late")));
        assert_eq!(inbox.outstanding(), 0);
        assert_eq!(sem.available_permits(), 1);
    }
}
