//! Wire frames exchanged with the hub over the websocket.
//!
//! Inbound frames are decoded into [`InboundFrame`] by their `type` tag.
//! Outbound request payloads are plain JSON objects; the connection
//! manager stamps the correlation `id` onto them right before sending.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::Error;

/// Event type the hub emits whenever an entity's state changes.
pub const STATE_CHANGED: &str = "state_changed";

// ── Entity state ────────────────────────────────────────────────────

/// One entity state exactly as the hub serializes it.
///
/// Shared by the websocket `get_states` result, the `state_changed` event
/// payload and the REST `/api/states` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubState {
    pub entity_id: String,

    pub state: String,

    #[serde(default)]
    pub attributes: Map<String, Value>,

    /// ISO-8601 timestamp of the last state change.
    #[serde(default)]
    pub last_changed: String,

    /// ISO-8601 timestamp of the last state or attribute update.
    #[serde(default)]
    pub last_updated: String,
}

// ── Events ──────────────────────────────────────────────────────────

/// A generic hub event, as carried by an `event` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEvent {
    pub event_type: String,

    #[serde(default)]
    pub data: Value,

    #[serde(default)]
    pub origin: Option<String>,

    #[serde(default)]
    pub time_fired: Option<String>,
}

/// Payload of a `state_changed` event.
///
/// `new_state == None` means the entity was removed from the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangedData {
    pub entity_id: String,

    #[serde(default)]
    pub new_state: Option<HubState>,

    #[serde(default)]
    pub old_state: Option<HubState>,
}

impl HubEvent {
    /// Decode the event payload as a `state_changed` delta.
    pub fn state_changed(&self) -> Result<StateChangedData, Error> {
        serde_json::from_value(self.data.clone()).map_err(|e| Error::Deserialization {
            message: format!("invalid state_changed payload: {e}"),
            body: self.data.to_string(),
        })
    }
}

// ── Responses ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// A `result` frame correlated to an earlier request by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,

    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub result: Option<Value>,

    #[serde(default)]
    pub error: Option<HubErrorBody>,
}

impl ResponseFrame {
    /// Unwrap the `result` payload, or turn `success: false` into [`Error::Hub`].
    pub fn into_result(self) -> Result<Value, Error> {
        if self.success {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        let body = self.error.unwrap_or_else(|| HubErrorBody {
            code: "unknown_error".into(),
            message: String::new(),
        });
        Err(Error::Hub {
            message: if body.message.is_empty() {
                "Request failed".into()
            } else {
                body.message
            },
            code: body.code,
        })
    }
}

// ── Inbound frames ──────────────────────────────────────────────────

/// Every frame kind the connection manager understands, keyed by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Event {
        #[serde(default)]
        id: Option<u64>,
        event: HubEvent,
    },
    Result(ResponseFrame),
    Pong {
        id: u64,
    },
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.chars().take(200).collect(),
        })
    }
}

// ── Outbound frames ─────────────────────────────────────────────────

/// The `auth` frame answering `auth_required`.
pub(crate) fn auth_frame(token: &SecretString) -> String {
    json!({
        "type": "auth",
        "access_token": token.expose_secret(),
    })
    .to_string()
}

pub fn subscribe_events_payload(event_type: &str) -> Value {
    json!({
        "type": "subscribe_events",
        "event_type": event_type,
    })
}

pub fn get_states_payload() -> Value {
    json!({ "type": "get_states" })
}

pub fn call_service_payload(domain: &str, service: &str, service_data: Value) -> Value {
    json!({
        "type": "call_service",
        "domain": domain,
        "service": service,
        "service_data": service_data,
    })
}

/// Serialize `{...payload, id}`.
pub(crate) fn with_id(payload: Value, id: u64) -> Result<String, Error> {
    let Value::Object(mut map) = payload else {
        return Err(Error::InvalidPayload(format!(
            "expected a JSON object, got {payload}"
        )));
    };
    map.insert("id".into(), Value::from(id));
    Ok(Value::Object(map).to_string())
}
