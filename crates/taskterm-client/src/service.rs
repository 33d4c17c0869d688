use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use taskterm_registry::{
    ReconnectRegistry, SessionRegistry, SessionSnapshot, SessionSocket, Subscription,
};
use taskterm_terminal::{ContainerHandle, DataCallback, TerminalFactory, TerminalOwner};
use taskterm_types::{ConnectionState, SessionDescriptor, SessionKey, TasktermError};

use crate::config::ClientConfig;
use crate::orchestrator::Orchestrator;

/// The entry point external callers use: open, attach, detach and dispose
/// sessions, query connection state, and drive input.
///
/// Owns the registry, the orchestrator and the reconnect registrations.
/// Constructed once by the application's composition root; `dispose_all`
/// is the matching teardown.
pub struct SessionService {
    registry: Arc<SessionRegistry>,
    reconnects: Arc<ReconnectRegistry>,
    orchestrator: Arc<Orchestrator>,
    factory: Arc<dyn TerminalFactory>,
}

impl SessionService {
    pub fn new(
        config: ClientConfig,
        factory: Arc<dyn TerminalFactory>,
    ) -> Result<Self, TasktermError> {
        let registry = Arc::new(SessionRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&registry), config)?);
        Ok(Self {
            registry,
            reconnects: Arc::new(ReconnectRegistry::new()),
            orchestrator,
            factory,
        })
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Open a session and connect it. For a key that is already open this
    /// reattaches the existing terminal buffer to `container` instead of
    /// creating anything; scrollback and connection state carry over.
    pub async fn open_session(
        &self,
        key: &str,
        descriptor: SessionDescriptor,
        container: ContainerHandle,
    ) -> Result<(), TasktermError> {
        if self.registry.has(key) {
            self.attach(key, container);
        } else {
            let parts = self.factory.create(&container);
            let owner = TerminalOwner::create(parts, &container, self.input_handler(key.to_string()));
            self.registry
                .create(key.to_string(), descriptor, owner, Some(container));
        }

        // This service owns live connect logic for the key, so it supplies
        // the reconnect callback other components trigger by key.
        let orchestrator = Arc::clone(&self.orchestrator);
        let reconnect_key = key.to_string();
        self.reconnects.register(key.to_string(), move || {
            let orchestrator = Arc::clone(&orchestrator);
            let key = reconnect_key.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.connect(&key, CancellationToken::new()).await {
                    warn!(%key, %e, "reconnect attempt failed");
                }
            });
        });

        self.connect(key).await
    }

    pub async fn connect(&self, key: &str) -> Result<(), TasktermError> {
        self.orchestrator
            .connect(key, CancellationToken::new())
            .await
    }

    /// Abandon the in-flight connect attempt for `key`, if any. The
    /// abandoned attempt applies no state transitions and keeps no socket.
    pub fn cancel_connect(&self, key: &str) {
        self.orchestrator.cancel_attempt(key);
    }

    /// Reattach an open session's terminal to a new container after
    /// navigation. Same buffer, same scrollback; only the input handler is
    /// swapped so keystrokes are never delivered twice.
    pub fn attach(&self, key: &str, container: ContainerHandle) {
        let Some(session) = self.registry.get(key) else {
            return;
        };
        let on_data = self.input_handler(key.to_string());
        session.lock().unwrap().terminal.reattach(&container, on_data);
        self.registry.update_container(key, Some(container));
    }

    /// Navigation away: drop the container reference. The session record,
    /// terminal buffer and socket all stay alive.
    pub fn detach(&self, key: &str) {
        self.registry.update_container(key, None);
    }

    pub fn disconnect(&self, key: &str) {
        self.orchestrator.disconnect(key);
    }

    pub fn dispose(&self, key: &str) -> bool {
        self.orchestrator.cancel_attempt(key);
        self.reconnects.unregister(key);
        self.registry.dispose(key)
    }

    pub fn dispose_all(&self) {
        for key in self.registry.keys() {
            self.dispose(&key);
        }
    }

    pub fn status(&self, key: &str) -> Option<ConnectionState> {
        self.registry
            .get(key)
            .map(|session| session.lock().unwrap().connection.state.clone())
    }

    /// Whether the session is connected on a transport that is actually
    /// open right now.
    pub fn has_active_connection(&self, key: &str) -> bool {
        self.registry
            .get(key)
            .map(|session| session.lock().unwrap().has_active_connection())
            .unwrap_or(false)
    }

    pub fn send_input(&self, key: &str, data: &[u8]) {
        self.orchestrator.send_input(key, data);
    }

    pub fn request_resize(&self, key: &str, rows: u16, cols: u16) {
        self.orchestrator.request_resize(key, rows, cols);
    }

    /// Trigger the registered reconnect callback for `key`. Returns whether
    /// one was registered.
    pub fn trigger_reconnect(&self, key: &str) -> bool {
        self.reconnects.trigger(key)
    }

    /// Let another component take over reconnect ownership for a key.
    pub fn register_reconnect<F>(&self, key: SessionKey, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.reconnects.register(key, callback);
    }

    pub fn unregister_reconnect(&self, key: &str) {
        self.reconnects.unregister(key);
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[SessionSnapshot]) + Send + Sync + 'static,
    {
        self.registry.subscribe(callback)
    }

    pub fn snapshot(&self) -> Arc<[SessionSnapshot]> {
        self.registry.snapshot()
    }

    /// Input handler installed on every (re)attachment. Reads the current
    /// socket out of the registry on each keystroke: a mutable indirection
    /// that keeps the long-lived handler pointing at the latest connection
    /// without re-registering it on reconnect.
    fn input_handler(&self, key: SessionKey) -> DataCallback {
        let registry = Arc::clone(&self.registry);
        Box::new(move |data: &[u8]| {
            let Some(session) = registry.get(&key) else {
                return;
            };
            let socket = {
                let record = session.lock().unwrap();
                if !record.connection.state.is_connected() {
                    return;
                }
                record.connection.socket.clone()
            };
            if let Some(socket) = socket {
                socket.send_input(data);
            }
        })
    }
}
