//! Client handle over one transport context.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::PendingCallRegistry;
use crate::transport::{ContextId, Transport};

/// Default time spent draining replies when the transport reports too many
/// outstanding calls.
pub const DEFAULT_LIMIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Unit in which residual block times are handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// Whole seconds.
    Seconds,
    /// Whole milliseconds.
    #[default]
    Millis,
}

impl Granularity {
    /// Truncate `residual` to this unit, never going below one unit.
    pub fn floor(self, residual: Duration) -> Duration {
        match self {
            Granularity::Seconds => Duration::from_secs(residual.as_secs().max(1)),
            Granularity::Millis => {
                let millis = u64::try_from(residual.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(millis.max(1))
            }
        }
    }
}

/// Client-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Draining budget when a submission is rejected for too many outstanding calls.
    pub limit_drain_timeout: Duration,
    /// Granularity of block times installed while draining.
    pub granularity: Granularity,
}

impl ClientConfig {
    /// Set the draining budget used on `Limit` rejections.
    pub fn limit_drain_timeout(mut self, timeout: Duration) -> Self {
        self.limit_drain_timeout = timeout;
        self
    }

    /// Set the block time granularity.
    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            limit_drain_timeout: DEFAULT_LIMIT_DRAIN_TIMEOUT,
            granularity: Granularity::default(),
        }
    }
}

/// Handle to one transport context.
///
/// Cheap to clone; every [`AsyncCall`](crate::AsyncCall),
/// [`Conversation`](crate::Conversation) and
/// [`ServiceHandle`](crate::ServiceHandle) keeps one.
#[derive(Clone)]
pub struct Context {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl Context {
    /// Wrap a transport context with default configuration.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Wrap a transport context with custom configuration.
    pub fn with_config(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// Identity of the underlying context.
    #[inline]
    pub fn id(&self) -> ContextId {
        self.transport.context_id()
    }

    /// The underlying transport.
    #[inline]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Client configuration.
    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether any asynchronous call of this context is awaiting its reply.
    pub fn async_calls_pending(&self) -> bool {
        PendingCallRegistry::global().size(self.id()) > 0
    }

    /// Number of asynchronous calls of this context awaiting their reply.
    pub fn pending_async_calls(&self) -> usize {
        PendingCallRegistry::global().size(self.id())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::Loopback;

    #[test]
    fn test_granularity_floor_millis() {
        let g = Granularity::Millis;
        assert_eq!(g.floor(Duration::from_micros(10)), Duration::from_millis(1));
        assert_eq!(g.floor(Duration::ZERO), Duration::from_millis(1));
        assert_eq!(g.floor(Duration::from_micros(2_700)), Duration::from_millis(2));
    }

    #[test]
    fn test_granularity_floor_seconds() {
        let g = Granularity::Seconds;
        assert_eq!(g.floor(Duration::from_millis(300)), Duration::from_secs(1));
        assert_eq!(g.floor(Duration::from_millis(2_900)), Duration::from_secs(2));
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::default()
            .limit_drain_timeout(Duration::from_millis(250))
            .granularity(Granularity::Seconds);
        assert_eq!(config.limit_drain_timeout, Duration::from_millis(250));
        assert_eq!(config.granularity, Granularity::Seconds);

        let config = ClientConfig::default();
        assert_eq!(config.limit_drain_timeout, DEFAULT_LIMIT_DRAIN_TIMEOUT);
        assert_eq!(config.granularity, Granularity::Millis);
    }

    #[test]
    fn test_context_identity() {
        let domain = Loopback::new().unwrap();
        let ctx = domain.client();
        let clone = ctx.clone();
        assert_eq!(ctx.id(), clone.id());
        assert_ne!(ctx.id(), domain.client().id());
        assert!(!ctx.async_calls_pending());
        assert!(format!("{:?}", ctx).contains("Context"));
    }
}
