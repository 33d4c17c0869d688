use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use taskterm_terminal::{ContainerHandle, TerminalOwner};
use taskterm_types::{ConnectionState, SessionDescriptor, SessionKey, USER_DISCONNECT_CLOSE_CODE};

use crate::bus::{SnapshotBus, Subscription};
use crate::session::{Session, SessionSnapshot, SessionSocket, SharedSession};

/// Keyed store of session records. An explicit, injectable object owned by
/// the application's composition root; tests construct their own and never
/// leak state between cases.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, SharedSession>>,
    bus: SnapshotBus,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            bus: SnapshotBus::new(),
        }
    }

    /// Create a session record, or update an existing one.
    ///
    /// For an existing key only the terminal owner and container are
    /// replaced; connection state, `ever_connected` and creation time stay
    /// untouched, so re-opening a key the UI already holds is harmless.
    pub fn create(
        &self,
        key: SessionKey,
        descriptor: SessionDescriptor,
        terminal: TerminalOwner,
        container: Option<ContainerHandle>,
    ) -> SharedSession {
        let session = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get(&key) {
                Some(existing) => {
                    let mut record = existing.lock().unwrap();
                    record.terminal = terminal;
                    record.container = container;
                    drop(record);
                    Arc::clone(existing)
                }
                None => {
                    info!(%key, workflow = %descriptor.workflow, "registering session");
                    let session = Arc::new(Mutex::new(Session::new(
                        key.clone(),
                        descriptor,
                        terminal,
                        container,
                    )));
                    sessions.insert(key, Arc::clone(&session));
                    session
                }
            }
        };
        self.notify();
        session
    }

    pub fn get(&self, key: &str) -> Option<SharedSession> {
        self.sessions.lock().unwrap().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    /// Session keys ordered by creation time, oldest first.
    pub fn keys(&self) -> Vec<SessionKey> {
        let mut entries: Vec<_> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .values()
                .map(|session| {
                    let record = session.lock().unwrap();
                    (record.created_at, record.key.clone())
                })
                .collect()
        };
        entries.sort();
        entries.into_iter().map(|(_, key)| key).collect()
    }

    /// Record a connection-state change. No-op when the key is absent.
    pub fn update_connection_state(
        &self,
        key: &str,
        state: ConnectionState,
        error: Option<String>,
    ) {
        let Some(session) = self.get(key) else {
            debug!(%key, "state update for unknown session ignored");
            return;
        };
        {
            let mut record = session.lock().unwrap();
            debug!(%key, from = record.connection.state.label(), to = state.label(), "connection state");
            record.connection.state = state;
            record.connection.last_error = error;
        }
        self.notify();
    }

    /// Install or clear the live socket reference. Installing a socket sets
    /// `ever_connected`, permanently.
    pub fn update_socket(&self, key: &str, socket: Option<Arc<dyn SessionSocket>>) {
        let Some(session) = self.get(key) else {
            return;
        };
        {
            let mut record = session.lock().unwrap();
            if socket.is_some() {
                record.connection.ever_connected = true;
            }
            record.connection.socket = socket;
        }
        self.notify();
    }

    /// Attach or detach the visual container. Container changes are not
    /// part of the externally observed snapshot, so no notification.
    pub fn update_container(&self, key: &str, container: Option<ContainerHandle>) {
        if let Some(session) = self.get(key) {
            session.lock().unwrap().container = container;
        }
    }

    /// Tear a session down: close its socket, release the terminal owner
    /// and all capabilities, and drop the record. Runs to completion for
    /// every resource it holds; closing an already-closed socket is
    /// swallowed by the socket itself.
    pub fn dispose(&self, key: &str) -> bool {
        let removed = self.sessions.lock().unwrap().remove(key);
        let Some(session) = removed else {
            return false;
        };
        {
            let mut record = session.lock().unwrap();
            if let Some(socket) = record.connection.socket.take() {
                socket.close(USER_DISCONNECT_CLOSE_CODE);
            }
            record.connection.state = ConnectionState::Disconnected {
                reason: taskterm_types::DisconnectReason::UserRequested,
            };
            record.terminal.dispose();
        }
        info!(%key, "session disposed");
        self.notify();
        true
    }

    /// Composition-root teardown: dispose every session.
    pub fn dispose_all(&self) {
        for key in self.keys() {
            self.dispose(&key);
        }
    }

    pub fn snapshot(&self) -> Arc<[SessionSnapshot]> {
        self.bus.get_snapshot()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[SessionSnapshot]) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    /// Recompute the full snapshot and publish it. Ordered by creation
    /// time then key so consumers see a stable list.
    fn notify(&self) {
        let sessions: Vec<SharedSession> = {
            let map = self.sessions.lock().unwrap();
            map.values().cloned().collect()
        };
        let mut views: Vec<SessionSnapshot> = sessions
            .iter()
            .map(|session| session.lock().unwrap().snapshot_view())
            .collect();
        views.sort_by(|a, b| (a.created_at, &a.key).cmp(&(b.created_at, &b.key)));
        self.bus.publish(views);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
