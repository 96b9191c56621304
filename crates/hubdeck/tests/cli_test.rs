//! Integration tests for the `hubdeck` CLI binary.
//!
//! Argument parsing, config handling and one-shot REST commands against a
//! wiremock hub. No live hub needed.
#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::process::Output;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// `hubdeck` with every `HUBDECK_*` variable cleared and config
/// directories pointed at `home`.
fn hubdeck_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("hubdeck");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("HUBDECK_PROFILE")
        .env_remove("HUBDECK_URL")
        .env_remove("HUBDECK_TOKEN")
        .env_remove("HUBDECK_OUTPUT")
        .env_remove("HUBDECK_INSECURE")
        .env_remove("HUBDECK_TIMEOUT")
        .env_remove("HUBDECK_NO_WEBSOCKET")
        .env_remove("RUST_LOG");
    cmd
}

/// Command wired to `server` by flags alone.
fn hub_cmd(home: &Path, server: &MockServer) -> assert_cmd::Command {
    let mut cmd = hubdeck_cmd(home);
    cmd.args(["--url", &server.uri(), "--token", "test-token", "--no-websocket"]);
    cmd
}

/// Run a blocking command without starving the mock server.
async fn run(mut cmd: assert_cmd::Command) -> Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn states_body() -> Value {
    json!([
        {
            "entity_id": "light.kitchen",
            "state": "on",
            "attributes": {"friendly_name": "Kitchen"},
            "last_changed": "2026-10-17T08:00:00+00:00",
            "last_updated": "2026-10-17T08:00:00+00:00"
        },
        {
            "entity_id": "sensor.temperature",
            "state": "21.5",
            "attributes": {"friendly_name": "Temperature", "unit_of_measurement": "°C"},
            "last_changed": "2026-10-17T08:00:00+00:00",
            "last_updated": "2026-10-17T08:01:00+00:00"
        },
        {
            "entity_id": "light.porch",
            "state": "off",
            "attributes": {},
            "last_changed": "2026-10-17T07:00:00+00:00",
            "last_updated": "2026-10-17T07:00:00+00:00"
        }
    ])
}

async fn mock_hub() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(states_body()))
        .mount(&server)
        .await;
    server
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = hubdeck_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("states")
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("toggle")),
    );
}

#[test]
fn version_flag() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hubdeck"));
}

#[test]
fn completions_bash() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Configuration errors ────────────────────────────────────────────

#[test]
fn states_without_any_config_explains_setup() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .arg("states")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No hub configured"));
}

#[test]
fn url_without_token_is_an_auth_error() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .args(["--url", "http://127.0.0.1:9", "states"])
        .assert()
        .code(3);
}

#[test]
fn non_http_url_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .args(["--url", "ftp://hub.local", "--token", "t", "states"])
        .assert()
        .code(2);
}

#[test]
fn unknown_profile_is_reported() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .args(["--profile", "attic", "states"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("attic"));
}

// ── Config commands ─────────────────────────────────────────────────

#[test]
fn config_path_lives_under_the_config_home() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn set_profile_then_show() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .args([
            "config",
            "set-profile",
            "home",
            "--hub-url",
            "http://ha.local:8123",
            "--token-env",
            "HA_TOKEN",
            "--rest-only",
        ])
        .assert()
        .success();

    hubdeck_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[profiles.home]")
                .and(predicate::str::contains("http://ha.local:8123"))
                .and(predicate::str::contains("token_env = \"HA_TOKEN\""))
                .and(predicate::str::contains("default_profile = \"home\"")),
        );
}

#[test]
fn set_profile_rejects_bad_url() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .args(["config", "set-profile", "home", "--hub-url", "not a url"])
        .assert()
        .code(2);
}

#[test]
fn use_unknown_profile_fails() {
    let home = tempfile::tempdir().unwrap();
    hubdeck_cmd(home.path())
        .args(["config", "use", "nowhere"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nowhere"));
}

// ── Entity commands over REST ───────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn states_json_lists_every_entity() {
    let home = tempfile::tempdir().unwrap();
    let server = mock_hub().await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.args(["states", "-o", "json"]);
    let output = run(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));

    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["light.kitchen", "sensor.temperature", "light.porch"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn states_filters_by_domain_and_search() {
    let home = tempfile::tempdir().unwrap();
    let server = mock_hub().await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.args(["states", "-d", "light", "-s", "porch", "-o", "plain"]);
    let output = run(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "light.porch");
}

#[tokio::test(flavor = "multi_thread")]
async fn domains_counts_entities_per_domain() {
    let home = tempfile::tempdir().unwrap();
    let server = mock_hub().await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.args(["domains", "-o", "json-compact"]);
    let output = run(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));

    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        body,
        json!([
            {"domain": "light", "count": 2},
            {"domain": "sensor", "count": 1}
        ])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn get_shows_state_with_unit() {
    let home = tempfile::tempdir().unwrap();
    let server = mock_hub().await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.args(["get", "sensor.temperature"]);
    let output = run(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("21.5 °C"), "{stdout}");
    assert!(stdout.contains("Temperature"), "{stdout}");
}

#[tokio::test(flavor = "multi_thread")]
async fn get_unknown_entity_exits_not_found() {
    let home = tempfile::tempdir().unwrap();
    let server = mock_hub().await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.args(["get", "light.attic"]);
    let output = run(cmd).await;
    assert_eq!(output.status.code(), Some(4), "{}", combined_output(&output));
    assert!(String::from_utf8_lossy(&output.stderr).contains("light.attic"));
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_token_exits_auth() {
    let home = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.arg("states");
    let output = run(cmd).await;
    assert_eq!(output.status.code(), Some(3), "{}", combined_output(&output));
}

#[tokio::test(flavor = "multi_thread")]
async fn on_posts_turn_on_for_the_entity_domain() {
    let home = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_on"))
        .and(body_json(json!({"entity_id": "light.kitchen"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.args(["on", "light.kitchen"]);
    let output = run(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Called light.turn_on via rest"));
}

#[tokio::test(flavor = "multi_thread")]
async fn call_merges_data_and_reports_changes() {
    let home = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_on"))
        .and(body_json(json!({"entity_id": "light.porch", "brightness": 80})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "entity_id": "light.porch",
            "state": "on",
            "attributes": {"brightness": 80},
            "last_changed": "2026-10-17T09:00:00+00:00",
            "last_updated": "2026-10-17T09:00:00+00:00"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.args([
        "call",
        "light",
        "turn_on",
        "--entity",
        "light.porch",
        "--data",
        r#"{"brightness": 80}"#,
        "-o",
        "json",
    ]);
    let output = run(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));

    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["service"], json!("light.turn_on"));
    assert_eq!(body["source"], json!("rest"));
    assert_eq!(body["changed"][0]["state"], json!("on"));
}

#[tokio::test(flavor = "multi_thread")]
async fn call_rejects_non_object_data() {
    let home = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.args(["call", "light", "turn_on", "--data", "[1]"]);
    let output = run(cmd).await;
    assert_eq!(output.status.code(), Some(2), "{}", combined_output(&output));
}

#[tokio::test(flavor = "multi_thread")]
async fn toggle_rejects_malformed_entity_id() {
    let home = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;

    let mut cmd = hub_cmd(home.path(), &server);
    cmd.args(["toggle", "kitchen"]);
    let output = run(cmd).await;
    assert_eq!(output.status.code(), Some(2), "{}", combined_output(&output));
}
