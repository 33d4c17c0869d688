use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::session::SessionSnapshot;

type Callback = Arc<dyn Fn(&[SessionSnapshot]) + Send + Sync>;

struct BusInner {
    subscribers: Mutex<Vec<(u64, Callback)>>,
    current: Mutex<Arc<[SessionSnapshot]>>,
    next_id: AtomicU64,
}

/// Publish/snapshot observer bus, independent of any UI framework:
/// `subscribe` hands back an unsubscribe handle, `get_snapshot` returns the
/// last published value. The full snapshot is recomputed on every mutation
/// rather than diffed; registries hold tens of sessions, not thousands.
#[derive(Clone)]
pub struct SnapshotBus {
    inner: Arc<BusInner>,
}

impl SnapshotBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                current: Mutex::new(Arc::from(Vec::new())),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[SessionSnapshot]) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn get_snapshot(&self) -> Arc<[SessionSnapshot]> {
        Arc::clone(&self.inner.current.lock().unwrap())
    }

    /// Store a freshly computed snapshot and notify every subscriber.
    ///
    /// The subscriber list is cloned before any callback runs, so no bus
    /// lock is held while calling out: a callback may re-enter the registry
    /// (and publish again), subscribe, or drop its own `Subscription`.
    pub fn publish(&self, snapshot: Vec<SessionSnapshot>) {
        let snapshot: Arc<[SessionSnapshot]> = Arc::from(snapshot);
        *self.inner.current.lock().unwrap() = Arc::clone(&snapshot);
        let subscribers: Vec<Callback> = {
            let subscribers = self.inner.subscribers.lock().unwrap();
            subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };
        for callback in subscribers {
            callback(&snapshot);
        }
    }
}

impl Default for SnapshotBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`SnapshotBus::subscribe`]. Dropping it (or calling
/// [`Subscription::unsubscribe`]) stops further notifications.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Removal happens in Drop.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner
                .subscribers
                .lock()
                .unwrap()
                .retain(|(id, _)| *id != self.id);
        }
    }
}
