//! In-process transport.
//!
//! A [`Loopback`] is one middleware domain living inside the current
//! process: a table of advertised services plus a worker pool that runs
//! each service invocation. Contexts handed out by [`Loopback::context`]
//! implement [`Transport`] and behave like independent client
//! attachments.
//!
//! # Example
//!
//! ```
//! use tpwire::buffer::Buffer;
//! use tpwire::transport::flags;
//! use tpwire::transport::loopback::Loopback;
//! use tpwire::{Disposition, ServiceHandle};
//!
//! let domain = Loopback::new().unwrap();
//! let ctx = domain.client();
//! ctx.advertise("ECHO", |mut svc: ServiceHandle| {
//!     let request = svc.take_request();
//!     svc.reply(Disposition::Success, Some(request), None);
//! })
//! .unwrap();
//!
//! let reply = ctx.call("ECHO", &Buffer::string("ping"), flags::NONE, None).unwrap();
//! assert_eq!(reply.data(), b"ping");
//! ```

mod context;
mod mailbox;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::{Handle, Runtime};

pub use context::{LoopbackContext, ANONYMOUS_APPKEY};

use self::mailbox::Status;
use crate::context::Context;
use crate::error::Result;
use crate::transport::{
    AdvertiseMode, Dispatch, ErrorKind, Invocation, Transport, TransportError, TransportResult,
};

/// Default limit of outstanding replies per context.
pub const DEFAULT_MAX_OUTSTANDING: usize = 50;

/// Default block time for blocking operations.
pub const DEFAULT_BLOCK_TIME: Duration = Duration::from_secs(60);

/// Default number of service worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 64;

/// Configuration for a loopback domain.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Maximum outstanding replies per context before `acall` fails with `Limit`.
    pub max_outstanding: usize,
    /// Block time used when no one-shot block time is installed.
    pub block_time: Duration,
    /// Maximum number of concurrently running service routines.
    pub worker_threads: usize,
}

impl LoopbackConfig {
    /// Set the outstanding reply limit.
    pub fn max_outstanding(mut self, limit: usize) -> Self {
        self.max_outstanding = limit;
        self
    }

    /// Set the default block time.
    pub fn block_time(mut self, timeout: Duration) -> Self {
        self.block_time = timeout;
        self
    }

    /// Set the worker thread count.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            max_outstanding: DEFAULT_MAX_OUTSTANDING,
            block_time: DEFAULT_BLOCK_TIME,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

struct Advertised {
    dispatch: Dispatch,
    mode: AdvertiseMode,
}

/// State shared by every context of one loopback domain.
pub(crate) struct Domain {
    config: LoopbackConfig,
    services: RwLock<HashMap<String, Advertised>>,
    runtime: Handle,
    terminations: AtomicUsize,
}

impl Domain {
    fn lookup(&self, service: &str) -> Option<Dispatch> {
        self.services
            .read()
            .get(service)
            .map(|entry| entry.dispatch.clone())
    }

    fn advertise(&self, service: &str, dispatch: Dispatch, mode: AdvertiseMode) -> TransportResult<()> {
        if service.is_empty() {
            return Err(TransportError::new(ErrorKind::Invalid, "empty service name"));
        }
        let mut services = self.services.write();
        if services.contains_key(service) {
            return Err(TransportError::new(
                ErrorKind::Invalid,
                format!("{} is already advertised", service),
            ));
        }
        tracing::debug!("Advertising {} on {:?} queue", service, mode);
        services.insert(service.to_string(), Advertised { dispatch, mode });
        Ok(())
    }

    fn unadvertise(&self, service: &str) -> TransportResult<()> {
        match self.services.write().remove(service) {
            Some(_) => {
                tracing::debug!("Unadvertised {}", service);
                Ok(())
            }
            None => Err(TransportError::new(ErrorKind::NoEnt, service)),
        }
    }

    fn terminated(&self) {
        self.terminations.fetch_add(1, Ordering::Relaxed);
    }

    /// Run a service routine on the worker pool.
    fn spawn(&self, dispatch: Dispatch, invocation: Invocation, ctx: Arc<LoopbackContext>) {
        let name = invocation.name.clone();
        tracing::debug!("Invoking {} on {}", name, ctx.id());

        self.runtime.spawn_blocking(move || {
            let transport: Arc<dyn Transport> = ctx.clone();
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| dispatch(invocation, transport)));
            if outcome.is_err() {
                tracing::error!("Service {} panicked", name);
            }
            if let Some(route) = ctx.abandon() {
                tracing::error!("Service {} ended without returning a reply", name);
                route.complete(Status::Error, 0, None);
            }
        });
    }
}

/// An in-process middleware domain.
pub struct Loopback {
    domain: Arc<Domain>,
    runtime: Option<Runtime>,
}

impl Loopback {
    /// Create a domain with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(LoopbackConfig::default())
    }

    /// Create a domain with custom configuration.
    pub fn with_config(config: LoopbackConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads.max(1))
            .thread_name("tpwire-loopback")
            .build()?;

        let domain = Arc::new(Domain {
            config,
            services: RwLock::new(HashMap::new()),
            runtime: runtime.handle().clone(),
            terminations: AtomicUsize::new(0),
        });

        Ok(Self {
            domain,
            runtime: Some(runtime),
        })
    }

    /// Attach a new context.
    pub fn context(&self) -> Arc<LoopbackContext> {
        Arc::new(LoopbackContext::new(self.domain.clone()))
    }

    /// Attach a new context wrapped as a client [`Context`].
    pub fn client(&self) -> Context {
        Context::new(self.context())
    }

    /// Whether `service` is currently advertised.
    pub fn is_advertised(&self, service: &str) -> bool {
        self.domain.services.read().contains_key(service)
    }

    /// Queue `service` is advertised on.
    pub fn advertise_mode(&self, service: &str) -> Option<AdvertiseMode> {
        self.domain.services.read().get(service).map(|entry| entry.mode)
    }

    /// Number of service terminators (returns and forwards) issued so far.
    pub fn terminations(&self) -> usize {
        self.domain.terminations.load(Ordering::Relaxed)
    }

    /// Domain configuration.
    pub fn config(&self) -> &LoopbackConfig {
        &self.domain.config
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        // Routines still blocked in a conversation must not hold up teardown.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Dispatch {
        Arc::new(|_: Invocation, _: Arc<dyn Transport>| {})
    }

    #[test]
    fn test_config_default() {
        let config = LoopbackConfig::default();
        assert_eq!(config.max_outstanding, DEFAULT_MAX_OUTSTANDING);
        assert_eq!(config.block_time, DEFAULT_BLOCK_TIME);
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
    }

    #[test]
    fn test_config_chaining() {
        let config = LoopbackConfig::default()
            .max_outstanding(2)
            .block_time(Duration::from_secs(1))
            .worker_threads(4);
        assert_eq!(config.max_outstanding, 2);
        assert_eq!(config.block_time, Duration::from_secs(1));
        assert_eq!(config.worker_threads, 4);
    }

    #[test]
    fn test_advertise_unadvertise() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.context();

        ctx.advertise("A", noop(), AdvertiseMode::Primary).unwrap();
        ctx.advertise("B", noop(), AdvertiseMode::Secondary).unwrap();
        assert!(domain.is_advertised("A"));
        assert_eq!(domain.advertise_mode("B"), Some(AdvertiseMode::Secondary));

        let err = ctx.advertise("A", noop(), AdvertiseMode::Primary).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);

        ctx.unadvertise("A").unwrap();
        assert!(!domain.is_advertised("A"));
        assert_eq!(ctx.unadvertise("A").unwrap_err().kind, ErrorKind::NoEnt);
    }

    #[test]
    fn test_empty_name_rejected() {
        let domain = Loopback::new().unwrap();
        let err = domain
            .context()
            .advertise("", noop(), AdvertiseMode::Primary)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
    }

    #[test]
    fn test_services_shared_across_contexts() {
        let domain = Loopback::new().unwrap();
        domain
            .context()
            .advertise("SHARED", noop(), AdvertiseMode::Primary)
            .unwrap();
        assert!(domain.context().unadvertise("SHARED").is_ok());
    }
}
