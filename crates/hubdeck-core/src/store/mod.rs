// ── Live entity store ──
//
// Mirrors every hub entity. A bulk load (websocket `get_states`, or REST
// when the socket is down) replaces the snapshot wholesale; `state_changed`
// events then patch it one entity at a time. A background supervisor keeps
// the subscription, the polling fallback and the reconnect reload in step
// with the connection phase.

mod snapshot;
mod sync;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use hubdeck_api::{
    ConnectionManager, ConnectionPhase, ConnectionState, RestClient, StateChangedData, Subscription,
};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use snapshot::{ApplyOutcome, Snapshot};

use crate::config::HubConfig;
use crate::error::CoreError;
use crate::model::Entity;
use crate::stream::EntityStream;

// ── Status ───────────────────────────────────────────────────────────

/// Which hub surface served a bulk load or a service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    WebSocket,
    Rest,
}

/// Load bookkeeping, published through a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatus {
    /// At least one bulk load is in flight.
    pub loading: bool,
    /// Message of the last failed bulk load; cleared by the next success.
    pub error: Option<String>,
    pub initial_load_done: bool,
    /// Incremental inserts and updates applied since start.
    pub realtime_updates: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_full_load: Option<DateTime<Utc>>,
    pub last_source: Option<LoadSource>,
    /// The REST polling fallback is active.
    pub polling: bool,
}

/// Result of [`EntityStore::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { count: usize, source: LoadSource },
    /// A non-forced load found another one in flight.
    Skipped,
}

/// Combined store and connection health, for status displays.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoreDiagnostics {
    pub phase: Option<ConnectionPhase>,
    pub attempt_count: u32,
    pub message_count: u64,
    pub realtime_updates: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_full_load: Option<DateTime<Utc>>,
    pub permanently_disabled: bool,
    pub auth_failed: bool,
    pub connection_error: Option<String>,
    pub loading: bool,
    pub polling: bool,
    pub error: Option<String>,
    pub entity_count: usize,
}

/// What a service call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCallResult {
    pub source: LoadSource,
    /// Entities the hub reported as changed (REST only).
    pub changed: Vec<Entity>,
}

// ── EntityStore ──────────────────────────────────────────────────────

/// Live, self-healing mirror of the hub's entities.
///
/// Cheaply cloneable. Reads never fail and never block on the network;
/// they return whatever snapshot is current.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    config: HubConfig,
    connection: Option<ConnectionManager>,
    rest: RestClient,
    snapshot: watch::Sender<Arc<Snapshot>>,
    status: watch::Sender<StoreStatus>,
    in_flight: AtomicUsize,
    reset_scheduled: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscription: std::sync::Mutex<Option<Subscription>>,
}

impl EntityStore {
    /// Build the store and its hub clients. Does not touch the network
    /// until [`start`](Self::start).
    pub fn new(config: HubConfig) -> Result<Self, CoreError> {
        let rest = RestClient::new(config.url.clone(), &config.token, &config.transport())?;
        let connection = if config.websocket_enabled {
            Some(ConnectionManager::new(config.connection_config()?))
        } else {
            None
        };
        Ok(Self::from_parts(config, connection, rest))
    }

    /// Assemble a store from pre-built clients.
    pub fn from_parts(
        config: HubConfig,
        connection: Option<ConnectionManager>,
        rest: RestClient,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Snapshot::default()));
        let (status, _) = watch::channel(StoreStatus::default());
        Self {
            inner: Arc::new(StoreInner {
                config,
                connection,
                rest,
                snapshot,
                status,
                in_flight: AtomicUsize::new(0),
                reset_scheduled: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                subscription: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn connection(&self) -> Option<&ConnectionManager> {
        self.inner.connection.as_ref()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the event stream, spawn the supervisor and run the initial
    /// forced load.
    ///
    /// The store keeps running when the initial load fails: it retries
    /// once the socket connects, and the error stays visible in
    /// [`status`](Self::status).
    pub async fn start(&self) -> Result<LoadOutcome, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        if let Some(conn) = &self.inner.connection {
            if let Err(e) = conn.connect() {
                warn!(error = %e, "event stream refused; continuing with REST");
            }
        }

        {
            let mut tasks = self.inner.tasks.lock().await;
            if tasks.is_empty() {
                let inner = Arc::clone(&self.inner);
                let cancel = self.inner.cancel.clone();
                tasks.push(tokio::spawn(sync::supervise(inner, cancel)));
            }
        }

        info!(url = %self.inner.config.url, "entity store started");
        self.inner.load(true).await
    }

    /// Stop every background task, drop the subscription and close the
    /// socket. The snapshot stays readable.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let handles: Vec<_> = self.inner.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "store task ended abnormally");
            }
        }

        self.inner.set_subscription(None);
        if let Some(conn) = &self.inner.connection {
            conn.shutdown().await;
        }
        self.inner.status.send_modify(|status| {
            status.polling = false;
        });
        debug!("entity store shut down");
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.borrow().clone()
    }

    /// Entities in snapshot order.
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.snapshot().to_vec()
    }

    /// Category → entities, in first-seen category order.
    pub fn grouped(&self) -> IndexMap<String, Vec<Arc<Entity>>> {
        self.snapshot().grouped().clone()
    }

    pub fn entity(&self, id: &str) -> Option<Arc<Entity>> {
        self.snapshot().get(id).cloned()
    }

    /// Like [`entity`](Self::entity), but a miss is an error.
    pub fn require(&self, id: &str) -> Result<Arc<Entity>, CoreError> {
        self.entity(id).ok_or_else(|| CoreError::EntityNotFound {
            entity_id: id.to_owned(),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.snapshot.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.snapshot.borrow().is_empty()
    }

    /// Reactive view of the snapshot; yields on every change.
    pub fn subscribe_snapshot(&self) -> EntityStream {
        EntityStream::new(self.inner.snapshot.subscribe())
    }

    pub fn status(&self) -> StoreStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<StoreStatus> {
        self.inner.status.subscribe()
    }

    pub fn diagnostics(&self) -> StoreDiagnostics {
        let status = self.status();
        let conn = self
            .inner
            .connection
            .as_ref()
            .map(ConnectionManager::snapshot)
            .unwrap_or_default();
        let phase = self.inner.connection.as_ref().map(|_| conn.phase);
        StoreDiagnostics {
            phase,
            attempt_count: conn.attempt_count,
            message_count: conn.message_count,
            realtime_updates: status.realtime_updates,
            last_update: status.last_update,
            last_full_load: status.last_full_load,
            permanently_disabled: conn.phase == ConnectionPhase::PermanentlyDisabled,
            auth_failed: conn.auth_failed,
            connection_error: conn.last_error,
            loading: status.loading,
            polling: status.polling,
            error: status.error,
            entity_count: self.len(),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Forced bulk reload.
    pub async fn refresh(&self) -> Result<LoadOutcome, CoreError> {
        self.inner.load(true).await
    }

    /// Apply one `state_changed` delta to the snapshot.
    pub fn apply_change(&self, change: StateChangedData) -> ApplyOutcome {
        self.inner.apply_change(change)
    }

    /// Invoke `domain.service` on the hub, over the socket when connected
    /// and over REST otherwise.
    ///
    /// `target` becomes `service_data.entity_id`; keys in `extra` are
    /// merged on top.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target: Option<&str>,
        extra: Option<Map<String, Value>>,
    ) -> Result<ServiceCallResult, CoreError> {
        let mut data = Map::new();
        if let Some(id) = target {
            data.insert("entity_id".into(), Value::String(id.to_owned()));
        }
        data.extend(extra.unwrap_or_default());
        let data = Value::Object(data);

        match self.inner.connection.as_ref().filter(|c| c.is_connected()) {
            Some(conn) => {
                debug!(domain, service, target, "service call via websocket");
                conn.call_service(domain, service, data)
                    .await
                    .map_err(|e| CoreError::service_call(domain, service, e))?;
                Ok(ServiceCallResult {
                    source: LoadSource::WebSocket,
                    changed: Vec::new(),
                })
            }
            None => {
                debug!(domain, service, target, "service call via REST");
                let changed = self
                    .inner
                    .rest
                    .call_service(domain, service, &data)
                    .await
                    .map_err(|e| CoreError::service_call(domain, service, e))?;
                Ok(ServiceCallResult {
                    source: LoadSource::Rest,
                    changed: changed.into_iter().map(Entity::from).collect(),
                })
            }
        }
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("url", &self.inner.config.url.as_str())
            .field("entities", &self.len())
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

// ── Internals ────────────────────────────────────────────────────────

/// Marks one bulk load in flight; keeps `StoreStatus::loading` current.
struct LoadGuard<'a> {
    inner: &'a StoreInner,
    /// Another load was already running when this one entered.
    contended: bool,
}

impl<'a> LoadGuard<'a> {
    fn enter(inner: &'a StoreInner) -> Self {
        let previous = inner.in_flight.fetch_add(1, Ordering::SeqCst);
        inner.status.send_modify(|status| status.loading = true);
        Self {
            inner,
            contended: previous > 0,
        }
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let previous = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.inner.status.send_modify(|status| status.loading = false);
        }
    }
}

impl StoreInner {
    fn connection_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.connection.as_ref().map(ConnectionManager::state)
    }

    fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Bulk load. A non-forced load is skipped while another is in flight.
    pub(crate) async fn load(self: &Arc<Self>, force: bool) -> Result<LoadOutcome, CoreError> {
        let guard = LoadGuard::enter(self);
        if guard.contended && !force {
            debug!("bulk load already in flight; skipping");
            return Ok(LoadOutcome::Skipped);
        }

        let (result, source) = match self.connection.as_ref().filter(|c| c.is_connected()) {
            Some(conn) => (conn.get_states().await, LoadSource::WebSocket),
            None => (self.rest.get_states().await, LoadSource::Rest),
        };

        match result {
            Ok(states) => {
                let snapshot = Snapshot::from_states(states);
                let count = snapshot.len();
                // One assignment: deltas that land after this replace win
                // over it, deltas that landed before are overwritten.
                self.snapshot.send_replace(Arc::new(snapshot));
                self.status.send_modify(|status| {
                    status.initial_load_done = true;
                    status.error = None;
                    status.last_full_load = Some(Utc::now());
                    status.last_source = Some(source);
                });
                info!(count, %source, "entities loaded");
                Ok(LoadOutcome::Loaded { count, source })
            }
            Err(e) => {
                warn!(error = %e, %source, "bulk load failed");
                self.status.send_modify(|status| {
                    status.error = Some(e.to_string());
                });
                if source == LoadSource::WebSocket && e.is_connection_error() {
                    let _ = self.schedule_breaker_reset();
                }
                Err(e.into())
            }
        }
    }

    fn apply_change(&self, change: StateChangedData) -> ApplyOutcome {
        let entity_id = change.entity_id.clone();
        let mut outcome = ApplyOutcome::Absent;
        self.snapshot.send_if_modified(|current| {
            outcome = current.plan(&change);
            if outcome.is_change() {
                Arc::make_mut(current).apply(change);
                true
            } else {
                false
            }
        });

        if outcome.is_update() {
            self.status.send_modify(|status| {
                status.realtime_updates += 1;
                status.last_update = Some(Utc::now());
            });
        }
        debug!(%entity_id, %outcome, "state_changed applied");
        outcome
    }

    /// After a socket-side load failure, reset the breaker and reconnect
    /// once the configured delay has passed. At most one reset is pending;
    /// returns whether this call scheduled it.
    ///
    /// A rejected token is never reset here: that latch only clears through
    /// an explicit [`ConnectionManager::reset_circuit_breaker`].
    fn schedule_breaker_reset(self: &Arc<Self>) -> bool {
        let Some(conn) = self.connection.clone() else {
            return false;
        };
        if self.reset_scheduled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let delay = self.config.breaker_reset_delay;
        let cancel = self.cancel.clone();
        let inner = Arc::downgrade(self);
        debug!(?delay, "breaker reset scheduled");
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => reset_and_reconnect(&conn),
            }
            if let Some(inner) = inner.upgrade() {
                inner.reset_scheduled.store(false, Ordering::SeqCst);
            }
        });
        true
    }

    fn set_subscription(&self, subscription: Option<Subscription>) {
        let previous = {
            let mut slot = self
                .subscription
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::replace(&mut *slot, subscription)
        };
        drop(previous);
    }

    fn has_subscription(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }
}

fn reset_and_reconnect(conn: &ConnectionManager) {
    let state = conn.snapshot();
    if state.auth_failed {
        debug!("token rejected; skipping scheduled breaker reset");
        return;
    }
    conn.reset_circuit_breaker();
    if state.phase == ConnectionPhase::Connected {
        return;
    }
    if let Err(e) = conn.connect() {
        warn!(error = %e, "reconnect after breaker reset failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use hubdeck_api::TransportConfig;
    use secrecy::SecretString;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn rest_only_store(server: &MockServer) -> EntityStore {
        let url = Url::parse(&server.uri()).unwrap();
        let token = SecretString::from("token".to_owned());
        let mut config = HubConfig::new(url.clone(), token.clone());
        config.websocket_enabled = false;
        let rest = RestClient::new(url, &token, &TransportConfig::default()).unwrap();
        EntityStore::from_parts(config, None, rest)
    }

    #[tokio::test]
    async fn non_forced_load_skips_while_one_is_in_flight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "entity_id": "light.a", "state": "on" }]))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        let store = rest_only_store(&server).await;

        let slow = {
            let inner = Arc::clone(&store.inner);
            tokio::spawn(async move { inner.load(true).await })
        };
        tokio::time::timeout(Duration::from_secs(2), async {
            while !store.status().loading {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(store.inner.load(false).await.unwrap(), LoadOutcome::Skipped);
        assert!(matches!(
            slow.await.unwrap().unwrap(),
            LoadOutcome::Loaded { count: 1, source: LoadSource::Rest }
        ));
        assert!(!store.status().loading);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_load_keeps_snapshot_and_records_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "entity_id": "light.a", "state": "on" },
            ])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/states"))
            .respond_with(ResponseTemplate::new(503).set_body_string("restarting"))
            .mount(&server)
            .await;
        let store = rest_only_store(&server).await;

        store.refresh().await.unwrap();
        let err = store.refresh().await.unwrap_err();
        assert!(matches!(err, CoreError::Api { status: Some(503), .. }));

        let status = store.status();
        assert!(status.error.as_deref().is_some_and(|e| e.contains("503")));
        assert!(status.initial_load_done);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn only_one_breaker_reset_is_pending_at_a_time() {
        let url = Url::parse("http://127.0.0.1:9").unwrap();
        let token = SecretString::from("token".to_owned());
        let mut config = HubConfig::new(url.clone(), token.clone());
        config.breaker_reset_delay = Duration::from_millis(50);
        config.reconnect.max_attempts = 0;
        let connection = ConnectionManager::new(config.connection_config().unwrap());
        let rest = RestClient::new(url, &token, &TransportConfig::default()).unwrap();
        let store = EntityStore::from_parts(config, Some(connection), rest);

        assert!(store.inner.schedule_breaker_reset());
        assert!(!store.inner.schedule_breaker_reset());

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.inner.reset_scheduled.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(store.inner.schedule_breaker_reset());

        store.shutdown().await;
    }

    #[test]
    fn apply_change_counts_only_inserts_and_updates() {
        let url = Url::parse("http://hub.invalid:8123").unwrap();
        let token = SecretString::from("token".to_owned());
        let rest = RestClient::new(url.clone(), &token, &TransportConfig::default()).unwrap();
        let store = EntityStore::from_parts(HubConfig::new(url, token), None, rest);

        let change = |id: &str, state: Option<&str>| StateChangedData {
            entity_id: id.to_owned(),
            new_state: state.map(|s| {
                serde_json::from_value(json!({ "entity_id": id, "state": s })).unwrap()
            }),
            old_state: None,
        };

        assert_eq!(store.apply_change(change("light.a", Some("on"))), ApplyOutcome::Inserted);
        assert_eq!(store.apply_change(change("light.a", Some("on"))), ApplyOutcome::Unchanged);
        assert_eq!(store.apply_change(change("light.a", Some("off"))), ApplyOutcome::Updated);
        assert_eq!(store.apply_change(change("light.a", None)), ApplyOutcome::Removed);
        assert_eq!(store.status().realtime_updates, 2);
        assert!(store.is_empty());
        assert!(matches!(
            store.require("light.a"),
            Err(CoreError::EntityNotFound { entity_id }) if entity_id == "light.a"
        ));
    }
}
