//! # tpwire
//!
//! Resource-safe client/server core for transactional application-server
//! middleware.
//!
//! The middleware itself is reached through the [`transport::Transport`]
//! trait; one transport instance is one context. On top of it this crate
//! provides:
//!
//! - **Synchronous calls** - [`Context::call`]
//! - **Asynchronous calls** - [`AsyncCall`] with continuations, error
//!   handlers and draining of any-order replies
//!   ([`Context::process_pending_async_calls`])
//! - **Conversations** - [`Conversation`], a half-duplex session with a
//!   send token
//! - **Services** - [`ServiceHandle`], which defers the invocation's
//!   terminating reply or forward to the end of the routine, and
//!   [`Server`] for batch registration
//!
//! Service failures surface as [`ServiceFailure`] (inside
//! [`TpwireError::Service`]), carrying the application return code and the
//! reply payload.
//!
//! ## Example
//!
//! ```
//! use tpwire::buffer::Buffer;
//! use tpwire::transport::flags;
//! use tpwire::transport::loopback::Loopback;
//! use tpwire::{Disposition, ServiceHandle};
//!
//! let domain = Loopback::new().unwrap();
//! let ctx = domain.client();
//!
//! ctx.advertise("TOUPPER", |mut svc: ServiceHandle| {
//!     let text = svc.request().as_str().unwrap_or_default().to_uppercase();
//!     svc.reply(Disposition::Success, Some(Buffer::string(&text)), None);
//! })
//! .unwrap();
//!
//! let reply = ctx
//!     .call("TOUPPER", &Buffer::string("hello"), flags::NONE, None)
//!     .unwrap();
//! assert_eq!(reply.data(), b"HELLO");
//! ```

pub mod buffer;
pub mod error;
pub mod transport;

mod async_call;
mod call;
mod context;
mod conversation;
mod failure;
mod registry;
mod server;
mod service;

pub use async_call::{AsyncCall, CallState, Continuation, ErrorHandler};
pub use buffer::Buffer;
pub use context::{ClientConfig, Context, Granularity, DEFAULT_LIMIT_DRAIN_TIMEOUT};
pub use conversation::Conversation;
pub use error::{Result, TpwireError};
pub use failure::ServiceFailure;
pub use registry::PendingCallRegistry;
pub use server::{Routine, Server, ServerBuilder};
pub use service::ServiceHandle;
pub use transport::Disposition;
