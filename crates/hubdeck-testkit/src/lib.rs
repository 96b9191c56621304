//! A scriptable stand-in for the hub's websocket API.
//!
//! Speaks the real handshake (`auth_required` → `auth` → `auth_ok` /
//! `auth_invalid`), answers `subscribe_events`, `get_states`,
//! `call_service` and `ping`, and lets a test push events or drop every
//! live connection with an arbitrary close code.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

pub const HA_VERSION: &str = "2026.10.0";

#[derive(Debug, Clone)]
enum Command {
    Send(String),
    Close(u16),
}

#[derive(Debug, Default)]
struct Behaviour {
    reject_auth: AtomicBool,
    silent: AtomicBool,
    ignore_requests: AtomicBool,
}

struct Shared {
    token: String,
    states: Mutex<Vec<Value>>,
    service_error: Mutex<Option<(String, String)>>,
    received: Mutex<Vec<Value>>,
    close_codes: Mutex<Vec<u16>>,
    connections: AtomicUsize,
    authenticated: AtomicUsize,
    behaviour: Behaviour,
    commands: broadcast::Sender<Command>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build one entity state in the hub's wire shape.
pub fn entity_state(entity_id: &str, state: &str, attributes: Value) -> Value {
    json!({
        "entity_id": entity_id,
        "state": state,
        "attributes": attributes,
        "last_changed": "2026-10-01T12:00:00+00:00",
        "last_updated": "2026-10-01T12:00:00+00:00",
        "context": { "id": "01TESTCONTEXT", "parent_id": null, "user_id": null }
    })
}

pub struct MockHub {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockHub {
    /// Bind an ephemeral port and start accepting connections.
    pub async fn start(token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("bind mock hub: {e}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("mock hub address: {e}"));
        let (commands, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            token: token.to_owned(),
            states: Mutex::new(Vec::new()),
            service_error: Mutex::new(None),
            received: Mutex::new(Vec::new()),
            close_codes: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            authenticated: AtomicUsize::new(0),
            behaviour: Behaviour::default(),
            commands,
        });

        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_shared)));
            }
        });

        Self {
            addr,
            shared,
            accept_task,
        }
    }

    /// Hub base URL (`http://127.0.0.1:<port>`).
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr))
            .unwrap_or_else(|e| panic!("mock hub url: {e}"))
    }

    pub fn set_states(&self, states: Vec<Value>) {
        *lock(&self.shared.states) = states;
    }

    /// Answer every `call_service` with `success: false`.
    pub fn fail_services(&self, code: &str, message: &str) {
        *lock(&self.shared.service_error) = Some((code.to_owned(), message.to_owned()));
    }

    pub fn reject_auth(&self, reject: bool) {
        self.shared.behaviour.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Accept the TCP/websocket upgrade but never send `auth_required`.
    pub fn go_silent(&self, silent: bool) {
        self.shared.behaviour.silent.store(silent, Ordering::SeqCst);
    }

    /// Stop answering requests (subscriptions are still acknowledged).
    pub fn ignore_requests(&self, ignore: bool) {
        self.shared
            .behaviour
            .ignore_requests
            .store(ignore, Ordering::SeqCst);
    }

    /// Push a `state_changed` event to every authenticated connection.
    pub fn push_state_changed(&self, entity_id: &str, new_state: Option<Value>) {
        self.push_event(
            "state_changed",
            json!({
                "entity_id": entity_id,
                "old_state": null,
                "new_state": new_state,
            }),
        );
    }

    pub fn push_event(&self, event_type: &str, data: Value) {
        let frame = json!({
            "id": 1,
            "type": "event",
            "event": {
                "event_type": event_type,
                "data": data,
                "origin": "LOCAL",
                "time_fired": "2026-10-01T12:00:01+00:00",
            }
        });
        self.send_raw(frame.to_string());
    }

    /// Send arbitrary text to every authenticated connection.
    pub fn send_raw(&self, text: String) {
        let _ = self.shared.commands.send(Command::Send(text));
    }

    /// Close every authenticated connection with `code`.
    pub fn close_all(&self, code: u16) {
        let _ = self.shared.commands.send(Command::Close(code));
    }

    /// Stop accepting new connections and drop the live ones abnormally.
    pub fn stop(&self) {
        self.accept_task.abort();
        self.close_all(1011);
    }

    /// Websocket upgrades accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Handshakes that ended in `auth_ok`.
    pub fn authenticated(&self) -> usize {
        self.shared.authenticated.load(Ordering::SeqCst)
    }

    /// Every post-auth frame received with the given `type`.
    pub fn received(&self, frame_type: &str) -> Vec<Value> {
        lock(&self.shared.received)
            .iter()
            .filter(|frame| frame["type"] == frame_type)
            .cloned()
            .collect()
    }

    /// Close codes sent by clients, in arrival order.
    pub fn close_codes(&self) -> Vec<u16> {
        lock(&self.shared.close_codes).clone()
    }

    /// Poll until `authenticated() >= n`, panicking after `timeout`.
    pub async fn wait_for_authenticated(&self, n: usize, timeout: Duration) {
        let waited = tokio::time::timeout(timeout, async {
            while self.authenticated() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "expected {n} authenticated connections, saw {}",
            self.authenticated()
        );
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    shared.connections.fetch_add(1, Ordering::SeqCst);
    let (mut write, mut read) = ws.split();

    if shared.behaviour.silent.load(Ordering::SeqCst) {
        while let Some(Ok(message)) = read.next().await {
            if let Message::Close(close) = message {
                record_close(&shared, close.as_ref());
                return;
            }
        }
        return;
    }

    let hello = json!({ "type": "auth_required", "ha_version": HA_VERSION });
    if write.send(Message::Text(hello.to_string().into())).await.is_err() {
        return;
    }

    let accepted = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    return;
                };
                if frame["type"] == "auth" {
                    break frame["access_token"] == shared.token.as_str()
                        && !shared.behaviour.reject_auth.load(Ordering::SeqCst);
                }
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return,
        }
    };

    if !accepted {
        let invalid = json!({ "type": "auth_invalid", "message": "Invalid access token or password" });
        let _ = write.send(Message::Text(invalid.to_string().into())).await;
        let _ = write.close().await;
        return;
    }

    let ok = json!({ "type": "auth_ok", "ha_version": HA_VERSION });
    if write.send(Message::Text(ok.to_string().into())).await.is_err() {
        return;
    }
    let mut commands = shared.commands.subscribe();
    shared.authenticated.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        lock(&shared.received).push(frame.clone());
                        if let Some(reply) = respond(&shared, &frame) {
                            if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(close))) => {
                        record_close(&shared, close.as_ref());
                        return;
                    }
                    Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                }
            }
            command = commands.recv() => {
                match command {
                    Ok(Command::Send(text)) => {
                        if write.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                    Ok(Command::Close(code)) => {
                        let close = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "mock hub closing".into(),
                        };
                        let _ = write.send(Message::Close(Some(close))).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

fn record_close(shared: &Shared, close: Option<&CloseFrame>) {
    // 1005: no status code present
    let code = close.map_or(1005, |cf| u16::from(cf.code));
    lock(&shared.close_codes).push(code);
}

fn respond(shared: &Shared, frame: &Value) -> Option<Value> {
    let id = frame["id"].as_u64()?;
    let ignore = shared.behaviour.ignore_requests.load(Ordering::SeqCst);

    match frame["type"].as_str()? {
        "subscribe_events" => Some(json!({ "id": id, "type": "result", "success": true, "result": null })),
        _ if ignore => None,
        "get_states" => {
            let states = lock(&shared.states).clone();
            Some(json!({ "id": id, "type": "result", "success": true, "result": states }))
        }
        "call_service" => match lock(&shared.service_error).clone() {
            Some((code, message)) => Some(json!({
                "id": id,
                "type": "result",
                "success": false,
                "error": { "code": code, "message": message },
            })),
            None => Some(json!({
                "id": id,
                "type": "result",
                "success": true,
                "result": { "context": { "id": "01SERVICECONTEXT" } },
            })),
        },
        "ping" => Some(json!({ "id": id, "type": "pong" })),
        other => Some(json!({
            "id": id,
            "type": "result",
            "success": false,
            "error": { "code": "unknown_command", "message": format!("Unknown command: {other}") },
        })),
    }
}
