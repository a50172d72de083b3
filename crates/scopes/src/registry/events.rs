//! Registry change notifications
//!
//! Delivery is asynchronous and best-effort: a slow subscriber that falls
//! more than the channel capacity behind loses events. Subscribers should
//! re-query the registry when notified instead of relying on the event
//! payload.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

const EVENT_CAPACITY: usize = 64;

/// A change in a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// Scopes were added, removed or replaced
    ListChanged,
    /// A scope started or stopped running
    ScopeStateChanged { scope_id: String, running: bool },
}

/// Broadcasts [`RegistryEvent`]s to subscribers
#[derive(Debug)]
pub struct RegistryNotifier {
    tx: broadcast::Sender<RegistryEvent>,
}

impl Default for RegistryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event; without subscribers it is dropped
    pub fn notify(&self, event: RegistryEvent) {
        trace!("Registry event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Call `callback` whenever the scope list changes. Must be called
    /// within a tokio runtime.
    pub fn on_list_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.spawn_listener(move |event| {
            if *event == RegistryEvent::ListChanged {
                callback();
            }
        })
    }

    /// Call `callback` with the new running state whenever `scope_id`
    /// starts or stops. Must be called within a tokio runtime.
    pub fn on_scope_state_change<F>(&self, scope_id: &str, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let wanted = scope_id.to_string();
        self.spawn_listener(move |event| {
            if let RegistryEvent::ScopeStateChanged { scope_id, running } = event {
                if *scope_id == wanted {
                    callback(*running);
                }
            }
        })
    }

    fn spawn_listener<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("Registry subscriber lagged, {} event(s) lost", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { handle }
    }
}

/// Keeps a callback registered; dropping it stops delivery
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
