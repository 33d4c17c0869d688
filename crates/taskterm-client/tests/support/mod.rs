//! In-process exec backend for integration tests: the creation HTTP
//! endpoint plus the router WebSocket, with per-workflow controls so tests
//! can push PTY output, close with chosen codes, and inspect what the
//! client sent.

#![allow(dead_code)]

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::broadcast;

use taskterm_client::{ClientConfig, SessionService};
use taskterm_terminal::MemoryTerminalFactory;
use taskterm_types::{ExecSessionRequest, ExecSessionResponse};

pub struct BackendOptions {
    pub create_status: StatusCode,
    pub create_delay: Duration,
    pub affinity_cookie: Option<String>,
    /// Bytes pushed to the client right after the socket is accepted.
    pub greeting: Option<Vec<u8>>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            create_status: StatusCode::OK,
            create_delay: Duration::ZERO,
            affinity_cookie: None,
            greeting: Some(b"$ ".to_vec()),
        }
    }
}

struct ConnControl {
    output_tx: broadcast::Sender<Vec<u8>>,
    close_tx: broadcast::Sender<u16>,
}

pub struct BackendState {
    options: BackendOptions,
    base_url: OnceLock<String>,
    create_calls: AtomicUsize,
    ws_connections: AtomicUsize,
    controls: Mutex<HashMap<String, Arc<ConnControl>>>,
    resize_frames: Mutex<Vec<(String, String)>>,
    inputs: Mutex<Vec<(String, Vec<u8>)>>,
    client_close_codes: Mutex<Vec<(String, u16)>>,
    cookie_headers: Mutex<Vec<String>>,
}

impl BackendState {
    fn control(&self, workflow: &str) -> Arc<ConnControl> {
        let mut controls = self.controls.lock().unwrap();
        Arc::clone(controls.entry(workflow.to_string()).or_insert_with(|| {
            Arc::new(ConnControl {
                output_tx: broadcast::channel(64).0,
                close_tx: broadcast::channel(8).0,
            })
        }))
    }
}

/// The test backend: base URL plus handles for driving and inspecting it.
pub struct TestBackend {
    pub base_url: String,
    state: Arc<BackendState>,
}

impl TestBackend {
    pub async fn start(options: BackendOptions) -> Self {
        let state = Arc::new(BackendState {
            options,
            base_url: OnceLock::new(),
            create_calls: AtomicUsize::new(0),
            ws_connections: AtomicUsize::new(0),
            controls: Mutex::new(HashMap::new()),
            resize_frames: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
            client_close_codes: Mutex::new(Vec::new()),
            cookie_headers: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/exec-sessions", post(create_exec_session))
            .route("/api/router/exec/:workflow/client/:key", get(exec_ws))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test backend");
        let addr = listener.local_addr().expect("local addr");
        let base_url = format!("http://{addr}");
        state.base_url.set(base_url.clone()).expect("set base url");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test backend");
        });

        Self { base_url, state }
    }

    pub fn create_calls(&self) -> usize {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    /// Control messages received for a workflow, as raw JSON strings.
    pub fn resize_frames(&self, workflow: &str) -> Vec<String> {
        self.state
            .resize_frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(w, _)| w == workflow)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Keystroke bytes received for a workflow, concatenated.
    pub fn input_for(&self, workflow: &str) -> Vec<u8> {
        self.state
            .inputs
            .lock()
            .unwrap()
            .iter()
            .filter(|(w, _)| w == workflow)
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }

    pub fn client_close_codes(&self, workflow: &str) -> Vec<u16> {
        self.state
            .client_close_codes
            .lock()
            .unwrap()
            .iter()
            .filter(|(w, _)| w == workflow)
            .map(|(_, code)| *code)
            .collect()
    }

    pub fn cookies_seen(&self) -> Vec<String> {
        self.state.cookie_headers.lock().unwrap().clone()
    }

    /// Push PTY output to every open socket for a workflow.
    pub fn push_output(&self, workflow: &str, bytes: &[u8]) {
        let _ = self.state.control(workflow).output_tx.send(bytes.to_vec());
    }

    /// Close every open socket for a workflow with the given code.
    pub fn close_with(&self, workflow: &str, code: u16) {
        let _ = self.state.control(workflow).close_tx.send(code);
    }
}

async fn create_exec_session(
    State(state): State<Arc<BackendState>>,
    Json(request): Json<ExecSessionRequest>,
) -> impl IntoResponse {
    state.create_calls.fetch_add(1, Ordering::SeqCst);
    if !state.options.create_delay.is_zero() {
        tokio::time::sleep(state.options.create_delay).await;
    }
    if state.options.create_status != StatusCode::OK {
        return (state.options.create_status, "exec session denied").into_response();
    }

    let key = format!(
        "{}-{}",
        request.workflow,
        state.create_calls.load(Ordering::SeqCst)
    );
    Json(ExecSessionResponse {
        connection_key: key,
        router_address: state.base_url.get().expect("base url set").clone(),
        affinity_cookie: state.options.affinity_cookie.clone(),
    })
    .into_response()
}

async fn exec_ws(
    ws: WebSocketUpgrade,
    Path((workflow, _key)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<Arc<BackendState>>,
) -> impl IntoResponse {
    if let Some(cookie) = headers.get("cookie").and_then(|v| v.to_str().ok()) {
        state.cookie_headers.lock().unwrap().push(cookie.to_string());
    }
    ws.on_upgrade(move |socket| handle_socket(socket, workflow, state))
}

async fn handle_socket(mut socket: WebSocket, workflow: String, state: Arc<BackendState>) {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    let control = state.control(&workflow);
    let mut output_rx = control.output_tx.subscribe();
    let mut close_rx = control.close_tx.subscribe();

    if let Some(greeting) = &state.options.greeting {
        let _ = socket.send(Message::Binary(greeting.clone())).await;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => {
                        state.inputs.lock().unwrap().push((workflow.clone(), bytes));
                    }
                    Some(Ok(Message::Text(text))) => {
                        state.resize_frames.lock().unwrap().push((workflow.clone(), text));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            state
                                .client_close_codes
                                .lock()
                                .unwrap()
                                .push((workflow.clone(), frame.code));
                        }
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
            output = output_rx.recv() => {
                if let Ok(bytes) = output {
                    let _ = socket.send(Message::Binary(bytes)).await;
                }
            }
            close = close_rx.recv() => {
                if let Ok(code) = close {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Borrowed(""),
                        })))
                        .await;
                    break;
                }
            }
        }
    }
}

/// A backend plus a session service wired against it, with the terminal
/// factory kept typed so tests can reach the probes.
pub struct Fixture {
    pub backend: TestBackend,
    pub factory: Arc<MemoryTerminalFactory>,
    pub service: SessionService,
}

pub async fn fixture(options: BackendOptions) -> Fixture {
    fixture_with_grace(options, Duration::from_secs(30)).await
}

pub async fn fixture_with_grace(options: BackendOptions, grace: Duration) -> Fixture {
    let backend = TestBackend::start(options).await;
    let factory = Arc::new(MemoryTerminalFactory::new());
    let config = ClientConfig::new(backend.base_url.clone())
        .with_connect_timeout(Duration::from_secs(5))
        .with_first_data_grace(grace);
    let service = SessionService::new(config, factory.clone()).expect("build service");
    Fixture {
        backend,
        factory,
        service,
    }
}

/// Poll `condition` until it holds or a couple of seconds pass.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
