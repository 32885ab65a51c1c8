//! Per-channel callback registry

use crate::error::{is_interruption, TransportError, TransportResult};
use async_trait::async_trait;
use kernel_protocol::RawMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives verified messages from a channel
#[async_trait]
pub trait MessageCallback: Send + Sync {
    async fn on_message(&self, message: &RawMessage) -> anyhow::Result<()>;
}

/// Which messages a callback wants
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageFilter {
    Any,
    Type(String),
}

impl MessageFilter {
    pub fn of_type(msg_type: impl Into<String>) -> Self {
        MessageFilter::Type(msg_type.into())
    }

    pub fn matches(&self, message: &RawMessage) -> bool {
        match self {
            MessageFilter::Any => true,
            MessageFilter::Type(expected) => message.msg_type() == Some(expected.as_str()),
        }
    }
}

/// Adapter for synchronous closures
pub struct FnCallback<F>(pub F);

#[async_trait]
impl<F> MessageCallback for FnCallback<F>
where
    F: Fn(&RawMessage) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_message(&self, message: &RawMessage) -> anyhow::Result<()> {
        (self.0)(message)
    }
}

/// Handle for unregistering a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct Registered {
    filter: MessageFilter,
    callback: Arc<dyn MessageCallback>,
}

/// Unordered set of `(filter, callback)` pairs
#[derive(Default)]
pub struct CallbackDispatcher {
    next_id: AtomicU64,
    callbacks: RwLock<HashMap<CallbackId, Registered>>,
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        filter: MessageFilter,
        callback: Arc<dyn MessageCallback>,
    ) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().insert(id, Registered { filter, callback });
        id
    }

    pub fn register_fn<F>(&self, filter: MessageFilter, callback: F) -> CallbackId
    where
        F: Fn(&RawMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(filter, Arc::new(FnCallback(callback)))
    }

    pub fn unregister(&self, id: CallbackId) -> bool {
        self.callbacks.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Invoke every matching callback registered at call time. A failing
    /// callback is logged and the rest still run; an interruption stops
    /// dispatch and is returned. Returns how many callbacks ran.
    pub async fn dispatch(&self, message: &RawMessage) -> TransportResult<usize> {
        let matching: Vec<Arc<dyn MessageCallback>> = self
            .callbacks
            .read()
            .values()
            .filter(|registered| registered.filter.matches(message))
            .map(|registered| registered.callback.clone())
            .collect();

        if matching.is_empty() {
            debug!(msg_type = ?message.msg_type(), "No callback registered for message");
        }

        for callback in &matching {
            if let Err(e) = callback.on_message(message).await {
                if is_interruption(&e) {
                    return Err(TransportError::Interrupted);
                }
                warn!(
                    msg_type = ?message.msg_type(),
                    msg_id = ?message.msg_id(),
                    "Message callback failed: {:#}",
                    e
                );
            }
        }

        Ok(matching.len())
    }
}
