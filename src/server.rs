//! Service registration.
//!
//! Routines are plain closures taking a [`ServiceHandle`]. They can be
//! advertised one at a time on a [`Context`], or as a batch through a
//! [`ServerBuilder`] whose [`Server`] withdraws them again when dropped.
//!
//! # Example
//!
//! ```
//! use tpwire::buffer::Buffer;
//! use tpwire::transport::flags;
//! use tpwire::transport::loopback::Loopback;
//! use tpwire::{Disposition, Server, ServiceHandle};
//!
//! let domain = Loopback::new().unwrap();
//! let ctx = domain.client();
//!
//! let server = Server::builder()
//!     .service("PING", |mut svc: ServiceHandle| {
//!         svc.reply(Disposition::Success, Some(Buffer::string("pong")), None);
//!     })
//!     .secondary("PING_ADMIN", |mut svc: ServiceHandle| {
//!         svc.reply(Disposition::Success, None, Some(1));
//!     })
//!     .advertise(&ctx)
//!     .unwrap();
//!
//! let reply = ctx.call("PING", &Buffer::new(), flags::NONE, None).unwrap();
//! assert_eq!(reply.data(), b"pong");
//!
//! drop(server);
//! assert!(!domain.is_advertised("PING"));
//! ```

use std::sync::Arc;

use crate::context::Context;
use crate::error::{Result, TpwireError};
use crate::service::ServiceHandle;
use crate::transport::{AdvertiseMode, Dispatch, Invocation, Transport};

/// Type-erased service routine.
pub type Routine = Arc<dyn Fn(ServiceHandle) + Send + Sync>;

impl Context {
    /// Advertise `routine` as `service` on the primary queue.
    pub fn advertise<F>(&self, service: &str, routine: F) -> Result<()>
    where
        F: Fn(ServiceHandle) + Send + Sync + 'static,
    {
        self.advertise_routine(service, Arc::new(routine), AdvertiseMode::Primary)
    }

    /// Advertise `routine` as `service` on the secondary queue.
    pub fn advertise_secondary<F>(&self, service: &str, routine: F) -> Result<()>
    where
        F: Fn(ServiceHandle) + Send + Sync + 'static,
    {
        self.advertise_routine(service, Arc::new(routine), AdvertiseMode::Secondary)
    }

    /// Withdraw `service`.
    pub fn unadvertise(&self, service: &str) -> Result<()> {
        self.transport()
            .unadvertise(service)
            .map_err(|e| TpwireError::transport("unadvertise", service, e))
    }

    fn advertise_routine(&self, service: &str, routine: Routine, mode: AdvertiseMode) -> Result<()> {
        let config = self.config().clone();
        let dispatch: Dispatch = Arc::new(move |invocation: Invocation, transport: Arc<dyn Transport>| {
            let ctx = Context::with_config(transport, config.clone());
            routine(ServiceHandle::new(ctx, invocation));
        });
        self.transport()
            .advertise(service, dispatch, mode)
            .map_err(|e| TpwireError::transport("advertise", service, e))
    }
}

/// Builder collecting services to advertise together.
#[derive(Default)]
pub struct ServerBuilder {
    services: Vec<(String, Routine, AdvertiseMode)>,
}

impl ServerBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service on the primary queue.
    pub fn service<F>(mut self, name: &str, routine: F) -> Self
    where
        F: Fn(ServiceHandle) + Send + Sync + 'static,
    {
        self.services
            .push((name.to_string(), Arc::new(routine), AdvertiseMode::Primary));
        self
    }

    /// Add a service on the secondary queue.
    pub fn secondary<F>(mut self, name: &str, routine: F) -> Self
    where
        F: Fn(ServiceHandle) + Send + Sync + 'static,
    {
        self.services
            .push((name.to_string(), Arc::new(routine), AdvertiseMode::Secondary));
        self
    }

    /// Advertise every service on `ctx`.
    ///
    /// All or nothing: if one advertisement fails, the ones already made
    /// are withdrawn and the error is returned.
    pub fn advertise(self, ctx: &Context) -> Result<Server> {
        let mut server = Server {
            ctx: ctx.clone(),
            services: Vec::with_capacity(self.services.len()),
        };
        for (name, routine, mode) in self.services {
            // On error `server` drops and withdraws what was advertised so far.
            ctx.advertise_routine(&name, routine, mode)?;
            server.services.push(name);
        }
        tracing::debug!("Advertised {} services on {}", server.services.len(), ctx.id());
        Ok(server)
    }
}

/// A batch of advertised services, withdrawn on drop.
#[derive(Debug)]
pub struct Server {
    ctx: Context,
    services: Vec<String>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Names of the advertised services.
    pub fn services(&self) -> &[String] {
        &self.services
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for name in self.services.drain(..) {
            if let Err(e) = self.ctx.unadvertise(&name) {
                tracing::warn!("Failed to withdraw {}: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::transport::flags;
    use crate::transport::loopback::Loopback;
    use crate::transport::ErrorKind;
    use crate::Disposition;

    fn noop(_svc: ServiceHandle) {}

    #[test]
    fn test_advertise_modes() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        ctx.advertise("P", noop).unwrap();
        ctx.advertise_secondary("S", noop).unwrap();
        assert_eq!(domain.advertise_mode("P"), Some(AdvertiseMode::Primary));
        assert_eq!(domain.advertise_mode("S"), Some(AdvertiseMode::Secondary));

        ctx.unadvertise("P").unwrap();
        assert!(!domain.is_advertised("P"));
        let err = ctx.unadvertise("P").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoEnt));
    }

    #[test]
    fn test_duplicate_advertise_fails() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        ctx.advertise("DUP", noop).unwrap();
        let err = ctx.advertise("DUP", noop).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Invalid));
    }

    #[test]
    fn test_builder_registers_batch() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        let server = Server::builder()
            .service("A", |mut svc: ServiceHandle| {
                svc.reply(Disposition::Success, Some(Buffer::string("a")), None);
            })
            .secondary("B", noop)
            .advertise(&ctx)
            .unwrap();

        assert_eq!(server.services(), ["A".to_string(), "B".to_string()]);
        let reply = ctx.call("A", &Buffer::new(), flags::NONE, None).unwrap();
        assert_eq!(reply.data(), b"a");

        drop(server);
        assert!(!domain.is_advertised("A"));
        assert!(!domain.is_advertised("B"));
    }

    #[test]
    fn test_builder_is_all_or_nothing() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        ctx.advertise("TAKEN", noop).unwrap();

        let result = Server::builder()
            .service("FRESH", noop)
            .service("TAKEN", noop)
            .advertise(&ctx);
        assert!(result.is_err());
        assert!(!domain.is_advertised("FRESH"));
        assert!(domain.is_advertised("TAKEN"));
    }

    #[test]
    fn test_routine_sees_serving_context() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        let client_id = ctx.id();
        ctx.advertise("WHO", move |mut svc: ServiceHandle| {
            let same = svc.context().id() == client_id;
            let text = if same { "client" } else { "serving" };
            svc.reply(Disposition::Success, Some(Buffer::string(text)), None);
        })
        .unwrap();

        let reply = ctx.call("WHO", &Buffer::new(), flags::NONE, None).unwrap();
        assert_eq!(reply.data(), b"serving");
    }
}
