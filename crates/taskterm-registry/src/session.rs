use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use taskterm_terminal::{ContainerHandle, TerminalOwner};
use taskterm_types::{ConnectionState, SessionDescriptor, SessionKey};

/// Control surface of a live socket. Implemented by the client crate's
/// WebSocket handle; the registry only needs to query, delegate and close.
pub trait SessionSocket: Send + Sync {
    /// Whether the transport is verifiably open right now. A cached handle
    /// whose transport died silently answers `false` here; that answer is
    /// what stops the orchestrator from reusing it.
    fn is_open(&self) -> bool;
    /// Forward raw keystroke bytes. Silent no-op when the socket is gone.
    fn send_input(&self, data: &[u8]);
    /// Request a terminal resize. Returns whether a control message was
    /// actually put on the wire (at most once per connection lifetime).
    fn resize(&self, rows: u16, cols: u16) -> bool;
    /// Close with the given code. Idempotent; closing an already-closed
    /// socket is not an error.
    fn close(&self, code: u16);
}

/// Connection bookkeeping for one session.
pub struct Connection {
    pub socket: Option<Arc<dyn SessionSocket>>,
    pub state: ConnectionState,
    pub last_error: Option<String>,
    /// Set the first time a socket is installed and never reset. Tells a
    /// "first connection" apart from a "reconnection"; it is not the
    /// current connected/disconnected state.
    pub ever_connected: bool,
}

impl Connection {
    fn new() -> Self {
        Self {
            socket: None,
            state: ConnectionState::Idle,
            last_error: None,
            ever_connected: false,
        }
    }
}

/// One open session: metadata, the terminal buffer owner, the connection
/// and the (nullable) container reference. Lives from first open until
/// explicit disposal, surviving any number of detach/reattach cycles.
pub struct Session {
    pub key: SessionKey,
    pub descriptor: SessionDescriptor,
    pub created_at: DateTime<Utc>,
    pub terminal: TerminalOwner,
    /// `None` means detached: the owner exists and keeps its content but is
    /// not attached to anything visible.
    pub container: Option<ContainerHandle>,
    pub connection: Connection,
}

pub type SharedSession = Arc<Mutex<Session>>;

impl Session {
    pub(crate) fn new(
        key: SessionKey,
        descriptor: SessionDescriptor,
        terminal: TerminalOwner,
        container: Option<ContainerHandle>,
    ) -> Self {
        Self {
            key,
            descriptor,
            created_at: Utc::now(),
            terminal,
            container,
            connection: Connection::new(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.container.is_some()
    }

    /// Whether this session has a connection worth reusing: state says
    /// connected and the transport agrees.
    pub fn has_active_connection(&self) -> bool {
        self.connection.state.is_connected()
            && self
                .connection
                .socket
                .as_ref()
                .is_some_and(|socket| socket.is_open())
    }

    pub(crate) fn snapshot_view(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            workflow: self.descriptor.workflow.clone(),
            task: self.descriptor.task.clone(),
            command: self.descriptor.command.clone(),
            created_at: self.created_at,
            status: self.connection.state.label().to_string(),
            ever_connected: self.connection.ever_connected,
            last_error: self.connection.last_error.clone(),
            attached: self.container.is_some(),
        }
    }
}

/// Serializable view of one session, published through the bus. Consumers
/// must treat a snapshot as immutable between notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub key: String,
    pub workflow: String,
    pub task: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub ever_connected: bool,
    pub last_error: Option<String>,
    pub attached: bool,
}
