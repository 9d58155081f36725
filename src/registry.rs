//! Process-wide table of asynchronous calls awaiting their reply.
//!
//! Entries are keyed by `(context, descriptor)`: descriptors are only unique
//! within the context that issued them, so an any-descriptor harvest on one
//! context can never resolve another context's handle.
//!
//! A handle is present exactly while its call is pending. Draining removes
//! the entry when it harvests the reply; [`AsyncCall`](crate::AsyncCall)
//! removes it on its own harvest or on cancel. Either side may find the
//! entry already gone.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::async_call::CallSlot;
use crate::transport::{ContextId, Descriptor};

static GLOBAL: Lazy<PendingCallRegistry> = Lazy::new(PendingCallRegistry::new);

#[derive(Default)]
struct Entries {
    /// Handles by (context, descriptor).
    calls: HashMap<(ContextId, Descriptor), Arc<CallSlot>>,
    /// Pending count per context.
    counts: HashMap<ContextId, usize>,
}

/// Registry mapping call descriptors to asynchronous call handles.
pub struct PendingCallRegistry {
    entries: Mutex<Entries>,
}

impl PendingCallRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
        }
    }

    /// The registry shared by every context of the process.
    pub fn global() -> &'static PendingCallRegistry {
        &GLOBAL
    }

    /// Register a pending call.
    pub(crate) fn add(&self, ctx: ContextId, cd: Descriptor, call: Arc<CallSlot>) {
        let mut entries = self.entries.lock();
        if entries.calls.insert((ctx, cd), call).is_none() {
            *entries.counts.entry(ctx).or_insert(0) += 1;
        } else {
            tracing::warn!("Descriptor {} on {} registered twice", cd, ctx);
        }
    }

    /// Remove a call, returning its handle if it was registered.
    pub(crate) fn erase(&self, ctx: ContextId, cd: Descriptor) -> Option<Arc<CallSlot>> {
        let mut entries = self.entries.lock();
        let call = entries.calls.remove(&(ctx, cd))?;
        if let Some(count) = entries.counts.get_mut(&ctx) {
            *count -= 1;
            if *count == 0 {
                entries.counts.remove(&ctx);
            }
        }
        Some(call)
    }

    /// Whether `(ctx, cd)` is registered.
    pub fn contains(&self, ctx: ContextId, cd: Descriptor) -> bool {
        self.entries.lock().calls.contains_key(&(ctx, cd))
    }

    /// Number of pending calls of `ctx`.
    pub fn size(&self, ctx: ContextId) -> usize {
        self.entries.lock().counts.get(&ctx).copied().unwrap_or(0)
    }
}

impl Default for PendingCallRegistry {
    fn default() -> Self {
        Self::new()
    }
}
