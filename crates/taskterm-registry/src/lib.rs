// Session registry
//
// The single source of truth for open sessions. Each record bundles
// metadata, the terminal buffer owner, the connection and a detachable
// container reference; mutation happens only through the documented
// operations, and every externally observable mutation republishes a
// serializable snapshot through the bus.

mod bus;
mod reconnect;
mod registry;
mod session;

// Re-export public API
pub use bus::{SnapshotBus, Subscription};
pub use reconnect::ReconnectRegistry;
pub use registry::SessionRegistry;
pub use session::{Connection, Session, SessionSnapshot, SessionSocket, SharedSession};
