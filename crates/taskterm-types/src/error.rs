use thiserror::Error;

/// Errors surfaced by taskterm operations. Connection failures additionally
/// land in the session's `error` state with a human-readable message; this
/// enum is what the calling code gets back.
#[derive(Debug, Error)]
pub enum TasktermError {
    #[error("exec session request failed: {0}")]
    Api(String),

    #[error("websocket error: {0}")]
    Socket(String),

    #[error("connect attempt cancelled")]
    Cancelled,

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("router address is not http(s): {0}")]
    InvalidRouterAddress(String),
}
