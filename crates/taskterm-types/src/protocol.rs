use serde::{Deserialize, Serialize};

/// Request body for exec-session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSessionRequest {
    pub workflow: String,
    pub task: String,
    pub command: String,
}

/// Response from exec-session creation: a one-time connection key, the
/// router address the socket is opened against, and optionally a
/// session-affinity cookie that pins socket traffic to the backend node
/// that created the PTY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSessionResponse {
    pub connection_key: String,
    pub router_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity_cookie: Option<String>,
}

/// The only non-data message the router understands. The backend does not
/// frame control messages: anything written to the socket is forwarded into
/// the PTY verbatim, which is why this is sent at most once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeMessage {
    #[serde(rename = "Rows")]
    pub rows: u16,
    #[serde(rename = "Cols")]
    pub cols: u16,
}
