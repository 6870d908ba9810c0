//! One-shot completion signal with many waiters.
//!
//! # Design
//! - Every `listen` call registers a fresh oneshot channel; a broadcast drains
//!   the current listener set, so each listener sees at most one value.
//! - Listeners registered after a broadcast wait for the next cycle.
//! - Dropping a [`Listener`] unregisters it, which doubles as the disposal
//!   handle for waiters that give up early.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

struct Registry<T> {
    next_id: u64,
    listeners: HashMap<u64, oneshot::Sender<T>>,
}

/// Fan-out signal delivering a single value to every registered listener.
pub struct Broadcaster<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Broadcaster<T> {
    /// Construct a broadcaster with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    /// Register a listener for the next broadcast.
    ///
    /// # Panics
    ///
    /// Panics if the listener registry mutex has been poisoned.
    #[must_use]
    pub fn listen(&self) -> Listener<T> {
        let (sender, receiver) = oneshot::channel();
        let mut registry = self.inner.lock().expect("signal registry mutex poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, sender);
        Listener {
            id,
            receiver,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of listeners currently waiting.
    ///
    /// # Panics
    ///
    /// Panics if the listener registry mutex has been poisoned.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .lock()
            .expect("signal registry mutex poisoned")
            .listeners
            .len()
    }
}

impl<T: Clone> Broadcaster<T> {
    /// Deliver `value` to every listener registered so far and return how many
    /// received it. Broadcasting with no listeners is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the listener registry mutex has been poisoned.
    pub fn broadcast(&self, value: T) -> usize {
        let listeners = {
            let mut registry = self.inner.lock().expect("signal registry mutex poisoned");
            std::mem::take(&mut registry.listeners)
        };
        listeners
            .into_values()
            .map(|sender| sender.send(value.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }
}

impl<E: Clone> Broadcaster<Result<(), E>> {
    /// Success-only shorthand for `broadcast(Ok(()))`.
    pub fn signal(&self) -> usize {
        self.broadcast(Ok(()))
    }
}

/// Pending wait on a [`Broadcaster`].
pub struct Listener<T> {
    id: u64,
    receiver: oneshot::Receiver<T>,
    registry: Weak<Mutex<Registry<T>>>,
}

impl<T> Listener<T> {
    /// Wait for the next broadcast. Returns `None` when the broadcaster was
    /// dropped before firing.
    pub async fn recv(mut self) -> Option<T> {
        (&mut self.receiver).await.ok()
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade()
            && let Ok(mut registry) = registry.lock()
        {
            registry.listeners.remove(&self.id);
        }
    }
}
