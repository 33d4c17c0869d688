//! WebSocket transport: connection, the clonable control handle, and the
//! reader/writer tasks that turn frames into events.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use taskterm_registry::SessionSocket;
use taskterm_types::{ResizeMessage, TasktermError, ABNORMAL_CLOSE_CODE};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the reader side of a live socket reports upward.
#[derive(Debug)]
pub(crate) enum SocketEvent {
    /// Raw PTY output bytes.
    Data(Vec<u8>),
    /// The transport closed; `code` is the close code (1006 when the peer
    /// vanished without a close frame).
    Closed { code: u16 },
    /// The transport errored.
    Error { message: String },
}

enum SocketCommand {
    Input(Vec<u8>),
    Resize(ResizeMessage),
    Close(u16),
}

/// Open the socket for an exec session, applying the session-affinity
/// cookie (if the backend supplied one) so the socket lands on the node
/// that created the PTY.
pub(crate) async fn open_socket(
    url: &str,
    affinity_cookie: Option<&str>,
) -> Result<WsStream, TasktermError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TasktermError::Socket(format!("invalid socket url {url}: {e}")))?;

    if let Some(cookie) = affinity_cookie {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| TasktermError::Socket(format!("invalid affinity cookie: {e}")))?;
        request.headers_mut().insert(COOKIE, value);
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TasktermError::Socket(format!("socket open failed: {e}")))?;
    Ok(stream)
}

/// Clonable control handle over a live socket. All clones refer to the same
/// underlying connection; the handle stays valid (and inert) after the
/// connection dies.
#[derive(Clone)]
pub struct WsSocketHandle {
    outbound: mpsc::UnboundedSender<SocketCommand>,
    open: Arc<AtomicBool>,
    resize_sent: Arc<AtomicBool>,
}

impl WsSocketHandle {
    /// Split a connected stream into reader/writer tasks and return the
    /// control handle plus the event stream the reader produces.
    pub(crate) fn start(stream: WsStream) -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<SocketCommand>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<SocketEvent>();
        let open = Arc::new(AtomicBool::new(true));

        let (mut sink, mut source) = stream.split();

        // Writer: drains the command channel onto the wire.
        let writer_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(command) = outbound_rx.recv().await {
                let result = match command {
                    SocketCommand::Input(bytes) => sink.send(Message::Binary(bytes)).await,
                    SocketCommand::Resize(msg) => match serde_json::to_string(&msg) {
                        Ok(json) => sink.send(Message::Text(json)).await,
                        Err(e) => {
                            warn!(%e, "resize message serialization failed");
                            continue;
                        }
                    },
                    SocketCommand::Close(code) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: Cow::Borrowed(""),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    debug!(%e, "socket write failed");
                    break;
                }
            }
            writer_open.store(false, Ordering::SeqCst);
        });

        // Reader: binary frames are PTY output; the router frames nothing
        // else, so text frames are forwarded as data too.
        let reader_open = Arc::clone(&open);
        tokio::spawn(async move {
            loop {
                let event = match source.next().await {
                    Some(Ok(Message::Binary(bytes))) => SocketEvent::Data(bytes),
                    Some(Ok(Message::Text(text))) => SocketEvent::Data(text.into_bytes()),
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame
                            .map(|f| u16::from(f.code))
                            .unwrap_or(ABNORMAL_CLOSE_CODE);
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(SocketEvent::Closed { code });
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                    Some(Err(e)) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(SocketEvent::Error {
                            message: e.to_string(),
                        });
                        break;
                    }
                    None => {
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(SocketEvent::Closed {
                            code: ABNORMAL_CLOSE_CODE,
                        });
                        break;
                    }
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        });

        (
            Self {
                outbound: outbound_tx,
                open,
                resize_sent: Arc::new(AtomicBool::new(false)),
            },
            event_rx,
        )
    }
}

impl SessionSocket for WsSocketHandle {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    fn send_input(&self, data: &[u8]) {
        if !self.is_open() {
            return;
        }
        let _ = self.outbound.send(SocketCommand::Input(data.to_vec()));
    }

    fn resize(&self, rows: u16, cols: u16) -> bool {
        // The router forwards everything it receives straight into the PTY,
        // so a mid-session resize control message can corrupt what the user
        // is typing. One resize goes out right after open; everything after
        // that is suppressed for the life of this connection.
        if !self.is_open() {
            return false;
        }
        if self
            .resize_sent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!("suppressing mid-session resize");
            return false;
        }
        self.outbound
            .send(SocketCommand::Resize(ResizeMessage { rows, cols }))
            .is_ok()
    }

    fn close(&self, code: u16) {
        // Mark closed eagerly so callers checking right after see the
        // truth; the writer task sends the close frame and exits.
        self.open.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(SocketCommand::Close(code));
    }
}
