//! Application-level service failure.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::buffer::Buffer;
use crate::transport::ErrorKind;

/// A service ran to completion but reported failure.
///
/// Carries the service name, the application return code and the reply
/// payload (if the service returned one). Clones share the payload: after
/// [`move_buffer`](Self::move_buffer) every clone observes a null buffer.
#[derive(Debug, Clone, Error)]
#[error("{service}: {} (user code {user_code})", ErrorKind::SvcFail)]
pub struct ServiceFailure {
    service: String,
    user_code: i64,
    payload: Arc<Mutex<Buffer>>,
}

impl ServiceFailure {
    /// Failure without payload.
    pub fn new(service: impl Into<String>, user_code: i64) -> Self {
        Self::with_buffer(service, user_code, Buffer::new())
    }

    /// Failure carrying the service's reply payload.
    pub fn with_buffer(service: impl Into<String>, user_code: i64, buffer: Buffer) -> Self {
        Self {
            service: service.into(),
            user_code,
            payload: Arc::new(Mutex::new(buffer)),
        }
    }

    /// Name of the failed service.
    #[inline]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Application return code.
    #[inline]
    pub fn user_code(&self) -> i64 {
        self.user_code
    }

    /// Borrow the payload.
    ///
    /// The guard must not be held across another call on the same failure
    /// (or one of its clones).
    pub fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.payload.lock()
    }

    /// Move the payload out, leaving every clone with a null buffer.
    pub fn move_buffer(&self) -> Buffer {
        std::mem::take(&mut *self.payload.lock())
    }
}
