// Connection orchestration
//
// Drives the connection state machine with real events: the exec-session
// HTTP call, socket open/data/close/error, and timers. All side effects
// live here; the machine itself stays pure. `SessionService` is the facade
// external callers go through.

mod api;
mod config;
mod orchestrator;
mod service;
mod socket;

// Re-export public API
pub use api::{socket_url, ExecApi};
pub use config::ClientConfig;
pub use orchestrator::Orchestrator;
pub use service::SessionService;
pub use socket::WsSocketHandle;
