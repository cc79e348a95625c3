//! Change notifier - fan-out of session transitions to registered listeners.
//!
//! Each subscriber gets its own FIFO queue drained by a dedicated task, so a
//! slow listener never delays another and per-listener order always matches
//! the order events were reported.
//!
//! Cancelling a subscription removes it from the registry and clears its
//! active flag. The delivery task holds the subscriber's gate while it checks
//! that flag and invokes the listener, and cancel passes through the same gate
//! before returning. Once `cancel()` returns the listener is not running and
//! will not run again, even for events that were already queued.
//!
//! A listener may cancel its own subscription from inside the callback. That
//! path skips the gate, since the caller already holds it.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::domain::auth::AuthChangeEvent;
use crate::domain::foundation::SubscriptionId;
use crate::ports::{SessionListener, Subscription};

thread_local! {
    static DELIVERING: Cell<Option<SubscriptionId>> = const { Cell::new(None) };
}

/// Per-subscriber delivery state shared by the registry, the delivery task
/// and the cancel handle.
struct Gate {
    active: AtomicBool,
    invoking: Mutex<()>,
}

impl Gate {
    fn open() -> Self {
        Self {
            active: AtomicBool::new(true),
            invoking: Mutex::new(()),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Invokes `listener` unless the subscription was cancelled. Returns
    /// whether the subscription is still live.
    fn deliver(
        &self,
        id: SubscriptionId,
        listener: &SessionListener,
        event: AuthChangeEvent,
    ) -> bool {
        let _invoking = self
            .invoking
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.is_active() {
            return false;
        }
        let _marker = DeliveringMarker::enter(id);
        listener(event);
        true
    }

    /// Clears the active flag and waits out any invocation in progress.
    fn close(&self, id: SubscriptionId) {
        self.active.store(false, Ordering::Release);
        let reentrant = DELIVERING.with(|current| current.get() == Some(id));
        if !reentrant {
            drop(
                self.invoking
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            );
        }
    }
}

/// Marks the current thread as running `id`'s listener until dropped.
struct DeliveringMarker {
    previous: Option<SubscriptionId>,
}

impl DeliveringMarker {
    fn enter(id: SubscriptionId) -> Self {
        let previous = DELIVERING.with(|current| current.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for DeliveringMarker {
    fn drop(&mut self) {
        DELIVERING.with(|current| current.set(self.previous));
    }
}

struct Subscriber {
    queue: mpsc::UnboundedSender<AuthChangeEvent>,
    gate: Arc<Gate>,
}

type Registry = Mutex<HashMap<SubscriptionId, Subscriber>>;

/// Subscription registry owned by a capability implementation.
#[derive(Default)]
pub struct ChangeNotifier {
    registry: Arc<Registry>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and starts its delivery task.
    ///
    /// Must be called from within a tokio runtime. Outside one, the listener
    /// is not registered and the returned handle is inert.
    pub fn subscribe(&self, listener: SessionListener) -> Subscription {
        let id = SubscriptionId::new();
        let gate = Arc::new(Gate::open());
        let (queue, mut events) = mpsc::unbounded_channel::<AuthChangeEvent>();

        let delivery_gate = Arc::clone(&gate);
        let delivery = async move {
            while let Some(event) = events.recv().await {
                if !delivery_gate.deliver(id, &listener, event) {
                    break;
                }
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(delivery);
                lock(&self.registry).insert(
                    id,
                    Subscriber {
                        queue,
                        gate: Arc::clone(&gate),
                    },
                );
                tracing::debug!(subscription_id = %id, "session listener registered");
            }
            Err(_) => {
                gate.active.store(false, Ordering::Release);
                tracing::error!(
                    subscription_id = %id,
                    "session listener registered outside a tokio runtime; it will never fire"
                );
            }
        }

        let registry = Arc::downgrade(&self.registry);
        Subscription::new(id, move || {
            gate.close(id);
            if let Some(registry) = registry.upgrade() {
                lock(&registry).remove(&id);
            }
            tracing::debug!(subscription_id = %id, "session listener cancelled");
        })
    }

    /// Queues `event` for every live subscriber.
    pub fn notify(&self, event: AuthChangeEvent) {
        let mut registry = lock(&self.registry);
        tracing::debug!(
            kind = ?event.kind,
            subscribers = registry.len(),
            "publishing session change"
        );
        registry.retain(|id, subscriber| {
            if !subscriber.gate.is_active() {
                return false;
            }
            if subscriber.queue.send(event.clone()).is_err() {
                tracing::debug!(subscription_id = %id, "dropping closed session listener");
                return false;
            }
            true
        });
    }


    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).len()
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<SubscriptionId, Subscriber>> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
