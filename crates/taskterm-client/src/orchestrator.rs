use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskterm_registry::{SessionRegistry, SessionSocket};
use taskterm_types::{
    next_state, ConnectionEvent, ConnectionState, DisconnectReason, SessionDescriptor, SessionKey,
    TasktermError, TIMEOUT_CLOSE_CODE, USER_DISCONNECT_CLOSE_CODE,
};

use crate::api::{socket_url, ExecApi};
use crate::config::ClientConfig;
use crate::socket::{open_socket, SocketEvent, WsSocketHandle};

/// Drives connection state with real events and performs the side effects
/// around the pure state machine: the exec HTTP call, socket open, the
/// initial size negotiation, and the reader loop feeding PTY bytes into the
/// session's terminal buffer.
pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    api: ExecApi,
    config: ClientConfig,
    /// In-flight connect attempts by key. An attempt stays here until it
    /// finishes; a cancelled entry may be replaced by a newer attempt.
    attempts: Mutex<HashMap<SessionKey, (u64, CancellationToken)>>,
    next_attempt: AtomicU64,
}

impl Orchestrator {
    pub fn new(registry: Arc<SessionRegistry>, config: ClientConfig) -> Result<Self, TasktermError> {
        let api = ExecApi::new(&config)?;
        Ok(Self {
            registry,
            api,
            config,
            attempts: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(0),
        })
    }

    /// Connect (or reconnect) the session identified by `key`.
    ///
    /// A verifiably open cached socket is reused directly. A cached socket
    /// whose transport died silently is discarded and replaced with a fresh
    /// connection; that recovery is local and never surfaced as an error.
    /// The attempt can be abandoned through `cancel`: a cancelled attempt
    /// applies no further state transitions and retains no socket.
    pub async fn connect(&self, key: &str, cancel: CancellationToken) -> Result<(), TasktermError> {
        let session = self
            .registry
            .get(key)
            .ok_or_else(|| TasktermError::UnknownSession(key.to_string()))?;

        let (descriptor, cols, rows, cached) = {
            let record = session.lock().unwrap();
            let (cols, rows) = record
                .container
                .map(|c| (c.cols, c.rows))
                .unwrap_or((self.config.default_cols, self.config.default_rows));
            (
                record.descriptor.clone(),
                cols,
                rows,
                record.connection.socket.clone(),
            )
        };

        if let Some(socket) = cached {
            if socket.is_open() {
                debug!(%key, "reusing open socket");
                self.registry
                    .update_connection_state(key, ConnectionState::Connected, None);
                return Ok(());
            }
            // The cache claimed a connection but the transport already
            // died. Drop the stale handle and connect from scratch.
            debug!(%key, "discarding stale socket reference");
            self.registry.update_socket(key, None);
        }

        let Some(attempt) = self.begin_attempt(key, &cancel) else {
            debug!(%key, "connect ignored, attempt already in flight");
            return Ok(());
        };
        let result = self
            .run_connect(key, &descriptor, cols, rows, &cancel)
            .await;
        self.finish_attempt(key, attempt);
        result
    }

    async fn run_connect(
        &self,
        key: &str,
        descriptor: &SessionDescriptor,
        cols: u16,
        rows: u16,
        cancel: &CancellationToken,
    ) -> Result<(), TasktermError> {
        self.apply_event(key, ConnectionEvent::Connect);

        let created = tokio::select! {
            _ = cancel.cancelled() => return Err(TasktermError::Cancelled),
            result = self.api.create_exec_session(descriptor) => result,
        };
        let response = match created {
            Ok(response) => {
                self.apply_event(key, ConnectionEvent::ApiSuccess);
                response
            }
            Err(e) => {
                self.apply_event(
                    key,
                    ConnectionEvent::ApiError {
                        message: e.to_string(),
                    },
                );
                self.write_banner(key, &format!("[taskterm] {e}"));
                return Err(e);
            }
        };

        let url = match socket_url(
            &response.router_address,
            &descriptor.workflow,
            &response.connection_key,
        ) {
            Ok(url) => url,
            Err(e) => {
                self.apply_event(
                    key,
                    ConnectionEvent::WsError {
                        message: e.to_string(),
                    },
                );
                self.write_banner(key, &format!("[taskterm] {e}"));
                return Err(e);
            }
        };

        let opened = tokio::select! {
            _ = cancel.cancelled() => return Err(TasktermError::Cancelled),
            result = open_socket(&url, response.affinity_cookie.as_deref()) => result,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                self.apply_event(
                    key,
                    ConnectionEvent::WsError {
                        message: e.to_string(),
                    },
                );
                self.write_banner(key, &format!("[taskterm] {e}"));
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            // Abandoned while the socket finished opening: drop the stream
            // and leave the session record untouched.
            return Err(TasktermError::Cancelled);
        }

        let (handle, events) = WsSocketHandle::start(stream);
        self.registry
            .update_socket(key, Some(Arc::new(handle.clone())));
        self.apply_event(key, ConnectionEvent::WsOpened);
        info!(%key, workflow = %descriptor.workflow, "session connected");

        // The one and only size negotiation for this connection; the handle
        // suppresses every later resize (see WsSocketHandle::resize).
        handle.resize(rows, cols);

        self.spawn_event_pump(key.to_string(), handle, events);
        Ok(())
    }

    /// User-initiated disconnect: distinct close code so the close handler
    /// never reads it as "session ended".
    pub fn disconnect(&self, key: &str) {
        self.cancel_attempt(key);
        let Some(session) = self.registry.get(key) else {
            return;
        };
        let socket = session.lock().unwrap().connection.socket.clone();
        if let Some(socket) = socket {
            socket.close(USER_DISCONNECT_CLOSE_CODE);
        }
        self.apply_event(key, ConnectionEvent::Disconnect);
        self.registry.update_socket(key, None);
    }

    /// Forward keystrokes. A silent no-op unless connected; callers are not
    /// expected to check state first.
    pub fn send_input(&self, key: &str, data: &[u8]) {
        let Some(session) = self.registry.get(key) else {
            return;
        };
        let record = session.lock().unwrap();
        if !record.connection.state.is_connected() {
            return;
        }
        if let Some(socket) = &record.connection.socket {
            socket.send_input(data);
        }
    }

    /// Request a resize. Also a silent no-op when not connected, and
    /// suppressed by the handle after the initial negotiation.
    pub fn request_resize(&self, key: &str, rows: u16, cols: u16) {
        let Some(session) = self.registry.get(key) else {
            return;
        };
        let record = session.lock().unwrap();
        if !record.connection.state.is_connected() {
            return;
        }
        if let Some(socket) = &record.connection.socket {
            socket.resize(rows, cols);
        }
    }

    /// Cancel the in-flight connect attempt for `key`, if any.
    pub fn cancel_attempt(&self, key: &str) {
        let attempts = self.attempts.lock().unwrap();
        if let Some((_, token)) = attempts.get(key) {
            token.cancel();
        }
    }

    fn begin_attempt(&self, key: &str, cancel: &CancellationToken) -> Option<u64> {
        let mut attempts = self.attempts.lock().unwrap();
        if let Some((_, existing)) = attempts.get(key) {
            if !existing.is_cancelled() {
                return None;
            }
        }
        let id = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        attempts.insert(key.to_string(), (id, cancel.clone()));
        Some(id)
    }

    fn finish_attempt(&self, key: &str, attempt: u64) {
        let mut attempts = self.attempts.lock().unwrap();
        if attempts.get(key).is_some_and(|(id, _)| *id == attempt) {
            attempts.remove(key);
        }
    }

    fn apply_event(&self, key: &str, event: ConnectionEvent) -> bool {
        apply_event(&self.registry, key, event)
    }

    fn write_banner(&self, key: &str, text: &str) {
        write_banner(&self.registry, key, text);
    }

    /// Consume socket events for one connection: PTY bytes into the buffer,
    /// close/error into the state machine, and a bounded first-data grace
    /// period that catches a PTY which accepted the connection but never
    /// attached.
    fn spawn_event_pump(
        &self,
        key: SessionKey,
        handle: WsSocketHandle,
        mut events: UnboundedReceiver<SocketEvent>,
    ) {
        let registry = Arc::clone(&self.registry);
        let grace = self.config.first_data_grace;

        tokio::spawn(async move {
            let mut received_any = false;
            let mut banner_written = false;

            loop {
                let event = if received_any {
                    events.recv().await
                } else {
                    match timeout(grace, events.recv()).await {
                        Ok(event) => event,
                        Err(_) => {
                            if apply_event(&registry, &key, ConnectionEvent::Timeout)
                                && !banner_written
                            {
                                banner_written = true;
                                write_banner(
                                    &registry,
                                    &key,
                                    "[taskterm] connection timed out: no data from the session",
                                );
                            }
                            handle.close(TIMEOUT_CLOSE_CODE);
                            registry.update_socket(&key, None);
                            break;
                        }
                    }
                };
                let Some(event) = event else {
                    break;
                };

                match event {
                    SocketEvent::Data(bytes) => {
                        received_any = true;
                        if let Some(session) = registry.get(&key) {
                            session.lock().unwrap().terminal.write(&bytes);
                        }
                    }
                    SocketEvent::Closed { code } => {
                        // Banner only when the close actually changed state:
                        // a close echoed after a local disconnect is already
                        // rejected by the machine, which also keeps the
                        // banner from being written twice.
                        let applied =
                            apply_event(&registry, &key, ConnectionEvent::WsClosed { code });
                        if applied && !banner_written {
                            banner_written = true;
                            let text = match DisconnectReason::from_close_code(code) {
                                DisconnectReason::CleanExit => {
                                    "[taskterm] shell session ended".to_string()
                                }
                                _ => format!("[taskterm] connection closed unexpectedly (code {code})"),
                            };
                            write_banner(&registry, &key, &text);
                        }
                        registry.update_socket(&key, None);
                        break;
                    }
                    SocketEvent::Error { message } => {
                        let applied = apply_event(
                            &registry,
                            &key,
                            ConnectionEvent::WsError {
                                message: message.clone(),
                            },
                        );
                        if applied && !banner_written {
                            banner_written = true;
                            write_banner(&registry, &key, &format!("[taskterm] connection error: {message}"));
                        }
                        warn!(%key, %message, "socket error");
                        registry.update_socket(&key, None);
                        break;
                    }
                }
            }
        });
    }
}

/// Run one event through the state machine and record the outcome. Returns
/// whether the transition was legal; illegal attempts are no-ops with a
/// diagnostic, never a crash.
fn apply_event(registry: &SessionRegistry, key: &str, event: ConnectionEvent) -> bool {
    let Some(session) = registry.get(key) else {
        return false;
    };
    let current = session.lock().unwrap().connection.state.clone();
    match next_state(&current, &event) {
        Some(next) => {
            let error = next.error_message().map(str::to_string);
            registry.update_connection_state(key, next, error);
            true
        }
        None => {
            debug!(%key, state = current.label(), ?event, "ignoring illegal transition");
            false
        }
    }
}

/// Write an inline status line into the session's scroll history so it
/// survives whatever the surrounding UI does next.
fn write_banner(registry: &SessionRegistry, key: &str, text: &str) {
    if let Some(session) = registry.get(key) {
        session.lock().unwrap().terminal.write_status_line(text);
    }
}
