//! Hub websocket connection manager with auto-reconnect.
//!
//! Owns the single websocket to the hub: performs the auth handshake,
//! reconnects with exponential backoff, trips a circuit breaker after
//! repeated failures, correlates request/response pairs by id and routes
//! events to registered handlers.
//!
//! # Example
//!
//! ```rust,ignore
//! use hubdeck_api::{ConnectionConfig, ConnectionManager};
//!
//! let config = ConnectionConfig::new(&"http://homeassistant.local:8123".parse()?, token)?;
//! let manager = ConnectionManager::new(config);
//! manager.connect()?;
//!
//! let _sub = manager.subscribe("state_changed", |event| {
//!     println!("{}", event.data);
//!     Ok(())
//! });
//!
//! let states = manager.get_states().await?;
//! manager.shutdown().await;
//! ```

mod breaker;
mod pending;
mod registry;
mod session;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use breaker::{Admission, CircuitBreaker, FailureVerdict, ReconnectPolicy, backoff_delay};
pub use registry::{EventHandler, HandlerError, Subscription};

use crate::error::Error;
use crate::frame::{self, HubEvent, HubState, STATE_CHANGED};
use pending::PendingRequests;
use registry::Registry;
use session::SessionEnd;

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` endpoint, usually `<hub>/api/websocket`.
    pub ws_url: Url,
    pub token: SecretString,
    pub reconnect: ReconnectPolicy,
    /// Limit on connect + auth_required + auth_ok. Default: 10s.
    pub handshake_timeout: Duration,
    /// Limit on waiting for a correlated response. Default: 10s.
    pub request_timeout: Duration,
    /// Event types subscribed on the hub after every successful handshake.
    pub event_types: Vec<String>,
}

impl ConnectionConfig {
    /// Defaults for a hub at `hub_url` (http/https/ws/wss).
    pub fn new(hub_url: &Url, token: SecretString) -> Result<Self, Error> {
        Ok(Self {
            ws_url: websocket_url(hub_url)?,
            token,
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            event_types: vec![STATE_CHANGED.to_owned()],
        })
    }
}

/// Map a hub base URL onto its websocket endpoint:
/// `http → ws`, `https → wss`, path `<base>/api/websocket`.
pub fn websocket_url(hub_url: &Url) -> Result<Url, Error> {
    let scheme = match hub_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::WebSocketConnect(format!(
                "unsupported URL scheme '{other}'"
            )));
        }
    };

    let mut url = hub_url.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot use scheme '{scheme}'")))?;
    let base = hub_url.path().trim_end_matches('/');
    url.set_path(&format!("{base}/api/websocket"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

// ── Observable state ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Circuit breaker tripped or credentials rejected. Only
    /// [`ConnectionManager::reset_circuit_breaker`] or an elapsed
    /// cooldown lets the next `connect` through.
    PermanentlyDisabled,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::PermanentlyDisabled => "permanently disabled",
        })
    }
}

/// Diagnostics snapshot published on every phase change.
///
/// `message_count` in watched values is refreshed on transitions only;
/// [`ConnectionManager::snapshot`] always reports the live count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    pub message_count: u64,
    pub auth_failed: bool,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }
}

// ── Shared internals ────────────────────────────────────────────────

pub(crate) struct Inner {
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    breaker: Mutex<CircuitBreaker>,
    next_id: AtomicU64,
    messages: AtomicU64,
    running: AtomicBool,
    outbound: ArcSwapOption<mpsc::UnboundedSender<String>>,
    registry: Arc<Registry>,
    pending: Arc<PendingRequests>,
    root_cancel: CancellationToken,
    session_cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn count_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        lock(&self.breaker)
    }

    fn update_state(&self, apply: impl FnOnce(&mut ConnectionState)) {
        let messages = self.messages.load(Ordering::Relaxed);
        self.state.send_modify(|state| {
            apply(state);
            state.message_count = messages;
        });
    }

    /// Final state update of the background task.
    fn finish(&self, apply: impl FnOnce(&mut ConnectionState)) {
        self.running.store(false, Ordering::SeqCst);
        self.update_state(apply);
    }

    fn on_connected(&self) {
        self.breaker().record_success();
        self.update_state(|state| {
            state.phase = ConnectionPhase::Connected;
            state.last_error = None;
            state.attempt_count = 0;
        });
    }

    fn disable(&self, message: String) {
        self.update_state(|state| {
            state.phase = ConnectionPhase::PermanentlyDisabled;
            state.last_error = Some(message);
        });
    }
}

// ── ConnectionManager ───────────────────────────────────────────────

/// Handle to the hub websocket. Cheaply cloneable; all clones share
/// one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        let breaker = CircuitBreaker::new(config.reconnect.clone());
        let root_cancel = CancellationToken::new();
        let session_cancel = root_cancel.child_token();
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                breaker: Mutex::new(breaker),
                next_id: AtomicU64::new(1),
                messages: AtomicU64::new(0),
                running: AtomicBool::new(false),
                outbound: ArcSwapOption::empty(),
                registry: Arc::new(Registry::default()),
                pending: Arc::new(PendingRequests::default()),
                root_cancel,
                session_cancel: Mutex::new(session_cancel),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Start the background connection task.
    ///
    /// No-op while a task is already running. Refused with
    /// [`Error::CircuitOpen`] inside the breaker cooldown, and with
    /// [`Error::AuthRejected`] after a rejected token until
    /// [`reset_circuit_breaker`](Self::reset_circuit_breaker).
    pub fn connect(&self) -> Result<(), Error> {
        if self.inner.root_cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut task = lock(&self.inner.task);
        if self.inner.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let admission = self.inner.breaker().admit(Instant::now());
        match admission {
            Admission::Allowed => {}
            Admission::AuthFailed => {
                self.inner
                    .disable("access token rejected by hub".into());
                return Err(Error::AuthRejected {
                    message: "access token previously rejected; reset required".into(),
                });
            }
            Admission::CoolingDown { remaining } => {
                let err = Error::CircuitOpen {
                    retry_in_secs: remaining.as_secs(),
                };
                tracing::warn!(error = %err, "connection attempt refused by circuit breaker");
                self.inner.disable(err.to_string());
                return Err(err);
            }
        }

        let cancel = self.inner.root_cancel.child_token();
        *lock(&self.inner.session_cancel) = cancel.clone();
        self.inner.update_state(|state| {
            state.phase = ConnectionPhase::Connecting;
        });

        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(run_loop(inner, cancel)));
        Ok(())
    }

    /// Close the socket with a normal close code and stop reconnecting.
    pub async fn disconnect(&self) {
        lock(&self.inner.session_cancel).cancel();
        self.join_task().await;
    }

    /// Disconnect for good. Pending requests fail with [`Error::Cancelled`],
    /// every handler is dropped and later `connect` calls are refused.
    pub async fn shutdown(&self) {
        self.inner.root_cancel.cancel();
        self.join_task().await;
        self.inner.pending.fail_all(|_| Error::Cancelled);
        self.inner.registry.clear();
    }

    async fn join_task(&self) {
        let handle = lock(&self.inner.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "connection task ended abnormally");
            }
        }
    }

    /// Clear attempts, cooldown and the auth-failed flag.
    pub fn reset_circuit_breaker(&self) {
        self.inner.breaker().reset();
        self.inner.update_state(|state| {
            state.attempt_count = 0;
            state.auth_failed = false;
            state.last_failure_at = None;
            state.last_error = None;
            if state.phase == ConnectionPhase::PermanentlyDisabled {
                state.phase = ConnectionPhase::Disconnected;
            }
        });
        tracing::info!("circuit breaker reset");
    }

    // ── State ───────────────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> ConnectionState {
        let mut state = self.inner.state.borrow().clone();
        state.message_count = self.inner.messages.load(Ordering::Relaxed);
        state
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.inner.state.borrow().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == ConnectionPhase::Connected
    }

    /// Requests still waiting for their `result` frame.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Send `payload` with a fresh id and wait for the matching response.
    ///
    /// Fails immediately with [`Error::NotConnected`] unless connected.
    pub async fn send_request(&self, payload: Value) -> Result<Value, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let Some(outbound) = self.inner.outbound.load_full() else {
            return Err(Error::NotConnected);
        };

        let id = self.inner.next_id();
        let text = frame::with_id(payload, id)?;
        let (response, _guard) = self.inner.pending.register(id);
        outbound.send(text).map_err(|_| Error::NotConnected)?;
        tracing::trace!(id, "request sent");

        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(Ok(frame))) => frame.into_result(),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_closed)) => Err(Error::ConnectionLost { id }),
            Err(_elapsed) => Err(Error::RequestTimeout {
                id,
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    /// Full entity state list via `get_states`.
    pub async fn get_states(&self) -> Result<Vec<HubState>, Error> {
        let result = self.send_request(frame::get_states_payload()).await?;
        serde_json::from_value(result.clone()).map_err(|e| Error::Deserialization {
            message: format!("invalid get_states result: {e}"),
            body: result.to_string().chars().take(200).collect(),
        })
    }

    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Value,
    ) -> Result<Value, Error> {
        self.send_request(frame::call_service_payload(domain, service, service_data))
            .await
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Register `handler` for `event_type`. Handlers survive reconnects
    /// and stay registered until the returned handle is dropped.
    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&HubEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let key = self.inner.registry.insert(event_type, Arc::new(handler));
        Subscription::new(&self.inner.registry, event_type.to_owned(), key)
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.inner.registry.handler_count(event_type)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("ws_url", &self.inner.config.ws_url.as_str())
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

// ── Background reconnection loop ────────────────────────────────────

/// Main loop: session → on failure, consult breaker → backoff → session.
async fn run_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        let outcome = session::run(&inner, &cancel).await;
        inner.outbound.store(None);

        match outcome {
            Ok(SessionEnd::Cancelled) => {
                inner.pending.fail_all(|_| Error::Cancelled);
                inner.finish(|state| state.phase = ConnectionPhase::Disconnected);
                tracing::info!("Hub websocket disconnected");
                break;
            }
            Ok(SessionEnd::NormalClose) => {
                inner.pending.fail_all(|id| Error::ConnectionLost { id });
                inner.finish(|state| state.phase = ConnectionPhase::Disconnected);
                break;
            }
            Err(Error::AuthRejected { message }) => {
                tracing::error!(message = %message, "Hub rejected access token, not reconnecting");
                inner.breaker().record_auth_rejected();
                inner.pending.fail_all(|id| Error::ConnectionLost { id });
                inner.finish(|state| {
                    state.phase = ConnectionPhase::PermanentlyDisabled;
                    state.auth_failed = true;
                    state.last_error = Some(format!("authentication failed: {message}"));
                });
                break;
            }
            Err(e) => {
                let lost = inner.pending.fail_all(|id| Error::ConnectionLost { id });
                if lost > 0 {
                    tracing::debug!(lost, "failed in-flight requests after connection loss");
                }

                let verdict = inner.breaker().record_failure(Instant::now());
                match verdict {
                    FailureVerdict::Retry { attempt, delay } => {
                        tracing::warn!(error = %e, attempt, "Hub websocket error");
                        inner.update_state(|state| {
                            state.phase = ConnectionPhase::Disconnected;
                            state.attempt_count = attempt;
                            state.last_error = Some(e.to_string());
                        });

                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "Waiting before reconnect"
                        );
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => {
                                inner.finish(|state| state.phase = ConnectionPhase::Disconnected);
                                break;
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                        inner.update_state(|state| state.phase = ConnectionPhase::Connecting);
                    }
                    FailureVerdict::Tripped { attempts } => {
                        tracing::error!(
                            error = %e,
                            attempts,
                            "Reconnection limit reached, circuit breaker open"
                        );
                        inner.finish(|state| {
                            state.phase = ConnectionPhase::PermanentlyDisabled;
                            state.attempt_count = attempts;
                            state.last_error = Some(e.to_string());
                            state.last_failure_at = Some(Utc::now());
                        });
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("Connection loop exiting");
}
