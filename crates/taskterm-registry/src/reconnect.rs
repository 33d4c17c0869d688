use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use taskterm_types::SessionKey;

type ReconnectFn = Box<dyn Fn() + Send + Sync>;

/// Registration point for per-session reconnect callbacks.
///
/// Whichever component currently owns live connect logic for a key
/// registers a zero-argument callback here; external callers can then
/// trigger a reconnect by key without holding a reference to that
/// component. Unregistering on teardown keeps triggers from calling into
/// torn-down closures.
pub struct ReconnectRegistry {
    callbacks: Mutex<HashMap<SessionKey, ReconnectFn>>,
}

impl ReconnectRegistry {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the reconnect callback for a key.
    pub fn register<F>(&self, key: SessionKey, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap()
            .insert(key, Box::new(callback));
    }

    pub fn unregister(&self, key: &str) {
        self.callbacks.lock().unwrap().remove(key);
    }

    /// Invoke the callback registered for `key`. Returns whether one was
    /// registered.
    pub fn trigger(&self, key: &str) -> bool {
        let callbacks = self.callbacks.lock().unwrap();
        match callbacks.get(key) {
            Some(callback) => {
                callback();
                true
            }
            None => {
                debug!(%key, "reconnect trigger with no registered callback");
                false
            }
        }
    }
}

impl Default for ReconnectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
