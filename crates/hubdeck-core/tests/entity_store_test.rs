#![allow(clippy::unwrap_used)]
// Integration tests for `EntityStore`: websocket side against the mock
// hub, REST fallback against wiremock.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Map, Value, json};
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hubdeck_api::{ConnectionManager, RestClient, STATE_CHANGED};
use hubdeck_core::{
    ConnectionPhase, CoreError, EntityStore, HubConfig, LoadOutcome, LoadSource, ReconnectPolicy,
};
use hubdeck_testkit::{MockHub, entity_state};

const TOKEN: &str = "store-token";
const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(100);

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    hub: MockHub,
    rest: MockServer,
    store: EntityStore,
}

fn initial_states() -> Vec<Value> {
    vec![
        entity_state("light.kitchen", "off", json!({ "friendly_name": "Kitchen" })),
        entity_state("sensor.outside", "12.5", json!({ "unit_of_measurement": "°C" })),
        entity_state("light.hall", "on", json!({})),
    ]
}

fn hub_config(url: Url, max_attempts: u32) -> HubConfig {
    let mut config = HubConfig::new(url, SecretString::from(TOKEN.to_owned()));
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_attempts,
        cooldown: Duration::from_secs(60),
    };
    config.handshake_timeout = Duration::from_millis(300);
    config.request_timeout = Duration::from_millis(300);
    config.poll_interval = POLL;
    config.breaker_reset_delay = Duration::from_millis(100);
    config
}

async fn mount_states(server: &MockServer, states: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(200).set_body_json(states))
        .mount(server)
        .await;
}

fn rest_client(server: &MockServer) -> RestClient {
    let url = Url::parse(&server.uri()).unwrap();
    RestClient::new(
        url,
        &SecretString::from(TOKEN.to_owned()),
        &hubdeck_api::TransportConfig::default(),
    )
    .unwrap()
}

impl Harness {
    /// Mock hub and REST server both serving `initial_states()`.
    async fn new() -> Self {
        let rest = MockServer::start().await;
        mount_states(&rest, initial_states()).await;
        Self::with_rest(rest, 100).await
    }

    async fn with_rest(rest: MockServer, max_attempts: u32) -> Self {
        let hub = MockHub::start(TOKEN).await;
        hub.set_states(initial_states());
        let config = hub_config(hub.url(), max_attempts);
        let connection = ConnectionManager::new(config.connection_config().unwrap());
        let store = EntityStore::from_parts(config, Some(connection), rest_client(&rest));
        Self { hub, rest, store }
    }

    fn connection(&self) -> &ConnectionManager {
        self.store.connection().unwrap()
    }

    async fn wait_subscribed(&self) {
        wait_until("state_changed subscription", || {
            self.connection().handler_count(STATE_CHANGED) == 1
        })
        .await;
    }

    async fn rest_loads(&self) -> usize {
        rest_loads(&self.rest).await
    }
}

async fn rest_loads(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/states")
        .count()
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn ids(store: &EntityStore) -> Vec<String> {
    store.entities().iter().map(|e| e.id.to_string()).collect()
}

// ── Loading ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_loads_full_snapshot() {
    let h = Harness::new().await;
    let outcome = h.store.start().await.unwrap();

    assert!(matches!(outcome, LoadOutcome::Loaded { count: 3, .. }));
    assert_eq!(ids(&h.store), vec!["light.kitchen", "sensor.outside", "light.hall"]);

    let status = h.store.status();
    assert!(status.initial_load_done);
    assert!(status.last_full_load.is_some());
    assert!(status.error.is_none());

    let kitchen = h.store.entity("light.kitchen").unwrap();
    assert_eq!(kitchen.display_name, "Kitchen");
    assert_eq!(kitchen.category, "light");

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_grouped_view_follows_snapshot_order() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();

    let grouped = h.store.grouped();
    let categories: Vec<&str> = grouped.keys().map(String::as_str).collect();
    assert_eq!(categories, vec!["light", "sensor"]);
    let lights: Vec<&str> = grouped["light"].iter().map(|e| e.id.as_str()).collect();
    assert_eq!(lights, vec!["light.kitchen", "light.hall"]);

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_refresh_uses_socket_when_connected() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;

    let mut states = initial_states();
    states.push(entity_state("weather.home", "sunny", json!({})));
    h.hub.set_states(states);

    let outcome = h.store.refresh().await.unwrap();
    assert_eq!(
        outcome,
        LoadOutcome::Loaded {
            count: 4,
            source: LoadSource::WebSocket
        }
    );
    assert_eq!(h.store.status().last_source, Some(LoadSource::WebSocket));
    assert!(h.store.entity("weather.home").is_some());

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_failed_socket_load_keeps_snapshot() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;
    h.hub.ignore_requests(true);

    let err = h.store.refresh().await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout { .. }), "got {err:?}");
    assert_eq!(h.store.len(), 3);
    assert!(h.store.status().error.is_some());

    h.store.shutdown().await;
}

/// Starts a socket refresh the hub never answers, then drops the socket
/// while it is in flight.
async fn fail_refresh_by_connection_loss(h: &Harness) -> CoreError {
    h.hub.ignore_requests(true);
    let refresh = {
        let store = h.store.clone();
        tokio::spawn(async move { store.refresh().await })
    };
    wait_until("request in flight", || h.connection().pending_requests() == 1).await;
    h.hub.close_all(4000);
    refresh.await.unwrap().unwrap_err()
}

#[tokio::test]
async fn test_breaker_resets_and_reconnects_after_socket_load_failure() {
    let rest = MockServer::start().await;
    mount_states(&rest, initial_states()).await;
    let h = Harness::with_rest(rest, 0).await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;

    let err = fail_refresh_by_connection_loss(&h).await;
    assert!(matches!(err, CoreError::ConnectionFailed { .. }), "got {err:?}");
    wait_until("breaker trip", || {
        h.connection().phase() == ConnectionPhase::PermanentlyDisabled
    })
    .await;
    h.hub.ignore_requests(false);

    h.hub.wait_for_authenticated(2, WAIT).await;
    wait_until("reconnect", || h.connection().is_connected()).await;
    let diagnostics = h.store.diagnostics();
    assert_eq!(diagnostics.attempt_count, 0);
    assert!(!diagnostics.auth_failed);
    assert_eq!(h.store.len(), 3);

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_breaker_reset_leaves_rejected_token_alone() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;
    h.hub.reject_auth(true);

    let err = fail_refresh_by_connection_loss(&h).await;
    assert!(matches!(err, CoreError::ConnectionFailed { .. }), "got {err:?}");
    wait_until("auth rejection", || h.connection().snapshot().auth_failed).await;
    assert_eq!(h.hub.connections(), 2);

    // Well past the reset delay.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.hub.connections(), 2, "reconnected with a rejected token");
    let diagnostics = h.store.diagnostics();
    assert!(diagnostics.auth_failed);
    assert_eq!(diagnostics.phase, Some(ConnectionPhase::PermanentlyDisabled));

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_empty_snapshot_reloads_when_socket_connects() {
    let rest = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&rest)
        .await;
    let h = Harness::with_rest(rest, 100).await;

    assert!(h.store.start().await.is_err());

    wait_until("socket reload", || h.store.len() == 3).await;
    let status = h.store.status();
    assert_eq!(status.last_source, Some(LoadSource::WebSocket));
    assert!(status.error.is_none());

    h.store.shutdown().await;
}

// ── Incremental updates ─────────────────────────────────────────────

#[tokio::test]
async fn test_state_changed_updates_entity() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;

    h.hub.push_state_changed(
        "light.kitchen",
        Some(entity_state("light.kitchen", "on", json!({ "friendly_name": "Kitchen" }))),
    );
    wait_until("kitchen on", || {
        h.store.entity("light.kitchen").is_some_and(|e| e.state == "on")
    })
    .await;

    let status = h.store.status();
    assert_eq!(status.realtime_updates, 1);
    assert!(status.last_update.is_some());
    assert_eq!(ids(&h.store), vec!["light.kitchen", "sensor.outside", "light.hall"]);

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_event_is_ignored() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;

    let off = entity_state("light.hall", "off", json!({}));
    h.hub.push_state_changed("light.hall", Some(off.clone()));
    h.hub.push_state_changed("light.hall", Some(off));
    h.hub.push_state_changed("switch.marker", Some(entity_state("switch.marker", "on", json!({}))));

    wait_until("marker", || h.store.entity("switch.marker").is_some()).await;
    assert_eq!(h.store.status().realtime_updates, 2);
    assert_eq!(
        ids(&h.store),
        vec!["light.kitchen", "sensor.outside", "light.hall", "switch.marker"]
    );

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_removal_event_drops_entity() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;

    h.hub.push_state_changed("sensor.outside", None);
    wait_until("sensor removed", || h.store.entity("sensor.outside").is_none()).await;

    assert_eq!(h.store.status().realtime_updates, 0);
    assert!(!h.store.grouped().contains_key("sensor"));

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_stream_sees_changes() {
    let h = Harness::new().await;
    let mut stream = h.store.subscribe_snapshot();
    assert!(stream.current().is_empty());

    h.store.start().await.unwrap();
    let loaded = tokio::time::timeout(WAIT, stream.changed()).await.unwrap().unwrap();
    assert_eq!(loaded.len(), 3);

    h.store.shutdown().await;
}

// ── Polling fallback ────────────────────────────────────────────────

#[tokio::test]
async fn test_polls_rest_without_socket() {
    let rest = MockServer::start().await;
    mount_states(&rest, initial_states()).await;
    let mut config = hub_config(Url::parse(&rest.uri()).unwrap(), 100);
    config.websocket_enabled = false;
    let store = EntityStore::from_parts(config, None, rest_client(&rest));

    store.start().await.unwrap();
    wait_until("polling active", || store.status().polling).await;

    tokio::time::timeout(WAIT, async {
        while rest_loads(&rest).await < 4 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    store.shutdown().await;
    assert!(!store.status().polling);
    let after_shutdown = rest_loads(&rest).await;
    tokio::time::sleep(POLL * 4).await;
    assert_eq!(rest_loads(&rest).await, after_shutdown);
}

#[tokio::test]
async fn test_polling_stops_once_connected() {
    let rest = MockServer::start().await;
    mount_states(&rest, initial_states()).await;
    let h = Harness::with_rest(rest, 1000).await;
    h.hub.go_silent(true);

    h.store.start().await.unwrap();
    wait_until("polling active", || h.store.status().polling).await;
    tokio::time::timeout(WAIT, async {
        while h.rest_loads().await < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    h.hub.go_silent(false);
    wait_until("connected", || h.connection().is_connected()).await;
    wait_until("polling stopped", || !h.store.status().polling).await;

    tokio::time::sleep(POLL).await;
    let settled = h.rest_loads().await;
    tokio::time::sleep(POLL * 4).await;
    assert_eq!(h.rest_loads().await, settled);

    h.wait_subscribed().await;
    h.store.shutdown().await;
}

#[tokio::test]
async fn test_socket_loss_falls_back_to_polling() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;
    let before = h.rest_loads().await;

    h.hub.stop();
    wait_until("subscription dropped", || {
        h.connection().handler_count(STATE_CHANGED) == 0
    })
    .await;
    wait_until("polling active", || h.store.status().polling).await;

    tokio::time::timeout(WAIT, async {
        while h.rest_loads().await < before + 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_tripped_breaker_stops_polling() {
    let rest = MockServer::start().await;
    mount_states(&rest, initial_states()).await;
    let h = Harness::with_rest(rest, 2).await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;

    h.hub.stop();
    wait_until("breaker tripped", || {
        h.connection().phase() == ConnectionPhase::PermanentlyDisabled
    })
    .await;
    wait_until("polling stopped", || !h.store.status().polling).await;

    let diagnostics = h.store.diagnostics();
    assert!(diagnostics.permanently_disabled);
    assert!(!diagnostics.polling);
    assert_eq!(diagnostics.entity_count, 3);

    h.store.shutdown().await;
}

// ── Service calls ───────────────────────────────────────────────────

#[tokio::test]
async fn test_turn_on_over_socket() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;

    let result = h.store.turn_on("light.kitchen").await.unwrap();
    assert_eq!(result.source, LoadSource::WebSocket);

    let calls = h.hub.received("call_service");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["domain"], "light");
    assert_eq!(calls[0]["service"], "turn_on");
    assert_eq!(calls[0]["service_data"]["entity_id"], "light.kitchen");

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_call_service_merges_extra_data() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;

    let mut extra = Map::new();
    extra.insert("brightness_pct".into(), json!(40));
    h.store
        .call_service("light", "turn_on", Some("light.hall"), Some(extra))
        .await
        .unwrap();

    let calls = h.hub.received("call_service");
    assert_eq!(
        calls[0]["service_data"],
        json!({ "entity_id": "light.hall", "brightness_pct": 40 })
    );

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_service_failure_is_wrapped() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;
    h.hub.fail_services("service_not_found", "Service light.dance not found.");

    let err = h.store.call_service("light", "dance", Some("light.hall"), None).await.unwrap_err();
    match err {
        CoreError::ServiceCall {
            domain,
            service,
            message,
        } => {
            assert_eq!(domain, "light");
            assert_eq!(service, "dance");
            assert!(message.contains("service_not_found"), "{message}");
        }
        other => panic!("expected ServiceCall, got {other:?}"),
    }

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_toggle_over_rest_without_socket() {
    let rest = MockServer::start().await;
    mount_states(&rest, initial_states()).await;
    Mock::given(method("POST"))
        .and(path("/api/services/switch/toggle"))
        .and(body_json(json!({ "entity_id": "switch.fan" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([entity_state("switch.fan", "on", json!({}))])),
        )
        .expect(1)
        .mount(&rest)
        .await;
    let mut config = hub_config(Url::parse(&rest.uri()).unwrap(), 100);
    config.websocket_enabled = false;
    let store = EntityStore::from_parts(config, None, rest_client(&rest));

    let result = store.toggle("switch.fan").await.unwrap();
    assert_eq!(result.source, LoadSource::Rest);
    assert_eq!(result.changed.len(), 1);
    assert_eq!(result.changed[0].state, "on");
}

#[tokio::test]
async fn test_invalid_entity_id_is_rejected() {
    let rest = MockServer::start().await;
    let mut config = hub_config(Url::parse(&rest.uri()).unwrap(), 100);
    config.websocket_enabled = false;
    let store = EntityStore::from_parts(config, None, rest_client(&rest));

    let err = store.turn_off("no-domain").await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidEntityId { .. }));
    assert!(rest.received_requests().await.unwrap().is_empty());
}

// ── Lifecycle & diagnostics ─────────────────────────────────────────

#[tokio::test]
async fn test_diagnostics_reflect_connection() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;
    h.hub.push_state_changed("light.hall", Some(entity_state("light.hall", "off", json!({}))));
    wait_until("delta", || h.store.status().realtime_updates == 1).await;

    let diagnostics = h.store.diagnostics();
    assert_eq!(diagnostics.phase, Some(ConnectionPhase::Connected));
    assert_eq!(diagnostics.attempt_count, 0);
    assert!(diagnostics.message_count > 0);
    assert_eq!(diagnostics.realtime_updates, 1);
    assert!(!diagnostics.permanently_disabled);
    assert!(!diagnostics.loading);

    h.store.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_socket_and_refuses_restart() {
    let h = Harness::new().await;
    h.store.start().await.unwrap();
    h.wait_subscribed().await;

    h.store.shutdown().await;
    assert_eq!(h.connection().phase(), ConnectionPhase::Disconnected);
    assert_eq!(h.connection().handler_count(STATE_CHANGED), 0);
    assert_eq!(h.store.len(), 3);
    assert!(matches!(h.store.start().await, Err(CoreError::Cancelled)));
}
