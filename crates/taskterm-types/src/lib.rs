// Shared data model for taskterm
//
// This crate holds the types every other taskterm crate agrees on: session
// identity and metadata, the connection state machine, the exec wire
// protocol, and the error enum. It performs no I/O.

pub mod error;
pub mod protocol;
pub mod session;
pub mod state;

// Re-export public API
pub use error::TasktermError;
pub use protocol::{ExecSessionRequest, ExecSessionResponse, ResizeMessage};
pub use session::{SessionDescriptor, SessionKey};
pub use state::{next_state, ConnectionEvent, ConnectionState, DisconnectReason};

// Constants
/// Close code sent by the router when the shell process exits normally.
pub const NORMAL_CLOSE_CODE: u16 = 1000;
/// Application close code for user-initiated disconnects, so the close
/// handler never mistakes a local disconnect for the shell exiting.
pub const USER_DISCONNECT_CLOSE_CODE: u16 = 4000;
/// Application close code for a connection abandoned because no data
/// arrived within the grace period; distinct from a user disconnect so the
/// backend can tell the two apart.
pub const TIMEOUT_CLOSE_CODE: u16 = 4001;
/// Code reported when the transport drops without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;
