//! Connection state machine.
//!
//! A pure transition function over tagged-union states and events. All I/O
//! (the exec HTTP call, socket creation, timers) happens around calls into
//! this module, never inside it, which keeps the machine testable without a
//! network in sight.

use serde::{Deserialize, Serialize};

use crate::{NORMAL_CLOSE_CODE, USER_DISCONNECT_CLOSE_CODE};

/// Why a session left the `connected` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Close code 1000: the shell process exited normally.
    CleanExit,
    /// The user asked for the disconnect; not an error and not a shell exit.
    UserRequested,
    /// Any other closure. The network dropped, not the shell.
    ConnectionLost,
}

impl DisconnectReason {
    /// Classify a close code received from the transport.
    pub fn from_close_code(code: u16) -> Self {
        match code {
            NORMAL_CLOSE_CODE => Self::CleanExit,
            USER_DISCONNECT_CLOSE_CODE => Self::UserRequested,
            _ => Self::ConnectionLost,
        }
    }
}

/// Connection state for a single session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state; no connection has been attempted yet.
    Idle,
    /// An exec session is being created or a socket is being opened.
    Connecting,
    /// The socket is open and PTY data flows.
    Connected,
    /// The socket closed; the session record and its buffer live on.
    Disconnected { reason: DisconnectReason },
    /// The connection failed; `message` is human readable.
    Error { message: String },
}

impl ConnectionState {
    /// Short status label used in snapshots and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// The error message carried by the `error` state, if any.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Everything that can happen to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Begin (or re-begin) orchestration.
    Connect,
    /// Exec session created; socket URL obtained but the socket is not open.
    ApiSuccess,
    /// The backend rejected exec-session creation.
    ApiError { message: String },
    /// The socket transport opened.
    WsOpened,
    /// The socket failed to open or errored while connected.
    WsError { message: String },
    /// The socket closed with the given close code.
    WsClosed { code: u16 },
    /// Connected but no data arrived within the grace period.
    Timeout,
    /// User-initiated disconnect.
    Disconnect,
}

/// Apply an event to a state. Returns `None` for every pair the transition
/// table does not list; callers treat that as a no-op and log a diagnostic.
pub fn next_state(current: &ConnectionState, event: &ConnectionEvent) -> Option<ConnectionState> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (current, event) {
        (S::Idle, E::Connect) => Some(S::Connecting),
        // Reconnect reuses the same session and the same terminal buffer.
        (S::Disconnected { .. } | S::Error { .. }, E::Connect) => Some(S::Connecting),
        (S::Connecting, E::ApiSuccess) => Some(S::Connecting),
        (S::Connecting, E::WsOpened) => Some(S::Connected),
        (S::Connecting | S::Connected, E::ApiError { message }) => Some(S::Error {
            message: message.clone(),
        }),
        (S::Connecting | S::Connected, E::WsError { message }) => Some(S::Error {
            message: message.clone(),
        }),
        (S::Connecting | S::Connected, E::Timeout) => Some(S::Error {
            message: "no data received from the session within the grace period".to_string(),
        }),
        (S::Connected, E::WsClosed { code }) => Some(S::Disconnected {
            reason: DisconnectReason::from_close_code(*code),
        }),
        (_, E::Disconnect) => Some(S::Disconnected {
            reason: DisconnectReason::UserRequested,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_states() -> Vec<ConnectionState> {
        vec![
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected {
                reason: DisconnectReason::CleanExit,
            },
            ConnectionState::Disconnected {
                reason: DisconnectReason::ConnectionLost,
            },
            ConnectionState::Error {
                message: "boom".to_string(),
            },
        ]
    }

    fn all_events() -> Vec<ConnectionEvent> {
        vec![
            ConnectionEvent::Connect,
            ConnectionEvent::ApiSuccess,
            ConnectionEvent::ApiError {
                message: "rejected".to_string(),
            },
            ConnectionEvent::WsOpened,
            ConnectionEvent::WsError {
                message: "broken pipe".to_string(),
            },
            ConnectionEvent::WsClosed { code: 1000 },
            ConnectionEvent::Timeout,
            ConnectionEvent::Disconnect,
        ]
    }

    #[test]
    fn connect_sequence_reaches_connected() {
        let s = ConnectionState::Idle;
        let s = next_state(&s, &ConnectionEvent::Connect).unwrap();
        assert_eq!(s, ConnectionState::Connecting);
        let s = next_state(&s, &ConnectionEvent::ApiSuccess).unwrap();
        assert_eq!(s, ConnectionState::Connecting);
        let s = next_state(&s, &ConnectionEvent::WsOpened).unwrap();
        assert_eq!(s, ConnectionState::Connected);
    }

    #[test]
    fn close_codes_classify_the_disconnect() {
        let connected = ConnectionState::Connected;

        let clean = next_state(&connected, &ConnectionEvent::WsClosed { code: 1000 }).unwrap();
        assert_eq!(
            clean,
            ConnectionState::Disconnected {
                reason: DisconnectReason::CleanExit
            }
        );

        let dropped = next_state(&connected, &ConnectionEvent::WsClosed { code: 1006 }).unwrap();
        assert_eq!(
            dropped,
            ConnectionState::Disconnected {
                reason: DisconnectReason::ConnectionLost
            }
        );

        let local = next_state(&connected, &ConnectionEvent::WsClosed { code: 4000 }).unwrap();
        assert_eq!(
            local,
            ConnectionState::Disconnected {
                reason: DisconnectReason::UserRequested
            }
        );
    }

    #[test]
    fn reconnect_is_legal_from_disconnected_and_error() {
        for from in [
            ConnectionState::Disconnected {
                reason: DisconnectReason::CleanExit,
            },
            ConnectionState::Error {
                message: "x".to_string(),
            },
        ] {
            assert_eq!(
                next_state(&from, &ConnectionEvent::Connect),
                Some(ConnectionState::Connecting)
            );
        }
    }

    #[test]
    fn disconnect_is_legal_from_every_state() {
        for from in all_states() {
            assert_eq!(
                next_state(&from, &ConnectionEvent::Disconnect),
                Some(ConnectionState::Disconnected {
                    reason: DisconnectReason::UserRequested
                })
            );
        }
    }

    #[test]
    fn errors_only_fire_while_connecting_or_connected() {
        let error_events = [
            ConnectionEvent::ApiError {
                message: "rejected".to_string(),
            },
            ConnectionEvent::WsError {
                message: "broken".to_string(),
            },
            ConnectionEvent::Timeout,
        ];
        for event in &error_events {
            for from in all_states() {
                let legal = matches!(
                    from,
                    ConnectionState::Connecting | ConnectionState::Connected
                );
                assert_eq!(next_state(&from, event).is_some(), legal, "{from:?} {event:?}");
            }
        }
    }

    // Every (state, event) pair not in the transition table is a no-op,
    // never a panic.
    #[test]
    fn illegal_transitions_are_no_ops() {
        for state in all_states() {
            for event in all_events() {
                let legal = match (&state, &event) {
                    (ConnectionState::Idle, ConnectionEvent::Connect) => true,
                    (
                        ConnectionState::Disconnected { .. } | ConnectionState::Error { .. },
                        ConnectionEvent::Connect,
                    ) => true,
                    (
                        ConnectionState::Connecting,
                        ConnectionEvent::ApiSuccess | ConnectionEvent::WsOpened,
                    ) => true,
                    (
                        ConnectionState::Connecting | ConnectionState::Connected,
                        ConnectionEvent::ApiError { .. }
                        | ConnectionEvent::WsError { .. }
                        | ConnectionEvent::Timeout,
                    ) => true,
                    (ConnectionState::Connected, ConnectionEvent::WsClosed { .. }) => true,
                    (_, ConnectionEvent::Disconnect) => true,
                    _ => false,
                };
                assert_eq!(
                    next_state(&state, &event).is_some(),
                    legal,
                    "unexpected legality for {state:?} + {event:?}"
                );
            }
        }
    }

    #[test]
    fn connect_while_connecting_is_ignored() {
        assert_eq!(
            next_state(&ConnectionState::Connecting, &ConnectionEvent::Connect),
            None
        );
    }

    // A close frame that arrives after a local disconnect must not rewrite
    // the state; the machine already rejects WsClosed outside `connected`.
    #[test]
    fn late_close_after_disconnect_is_ignored() {
        let s = next_state(&ConnectionState::Connected, &ConnectionEvent::Disconnect).unwrap();
        assert_eq!(next_state(&s, &ConnectionEvent::WsClosed { code: 4000 }), None);
    }
}
