// ── Entity snapshot ──
//
// Canonical view of one hub entity as mirrored by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EntityId;

/// One device, sensor or helper known to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub state: String,
    pub attributes: Map<String, Value>,
    /// Domain prefix of `id`; the grouping key.
    pub category: String,
    /// `attributes.friendly_name`, falling back to the id.
    pub display_name: String,
    /// Hub timestamp strings, kept verbatim for change detection.
    pub last_changed: String,
    pub last_updated: String,
}

impl Entity {
    pub fn new(id: EntityId, state: impl Into<String>, attributes: Map<String, Value>) -> Self {
        let display_name = attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map_or_else(|| id.to_string(), str::to_owned);
        Self {
            category: id.domain().to_owned(),
            display_name,
            id,
            state: state.into(),
            attributes,
            last_changed: String::new(),
            last_updated: String::new(),
        }
    }

    pub fn with_timestamps(
        mut self,
        last_changed: impl Into<String>,
        last_updated: impl Into<String>,
    ) -> Self {
        self.last_changed = last_changed.into();
        self.last_updated = last_updated.into();
        self
    }

    /// An incoming version replaces this one only when the state or the
    /// update stamp moved.
    pub fn differs_from(&self, other: &Self) -> bool {
        self.state != other.state || self.last_updated != other.last_updated
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn last_changed_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_changed)
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_updated)
    }

    pub fn unit_of_measurement(&self) -> Option<&str> {
        self.attributes
            .get("unit_of_measurement")
            .and_then(Value::as_str)
    }

    pub fn is_hidden(&self) -> bool {
        self.flag("hidden")
    }

    pub fn is_disabled(&self) -> bool {
        self.flag("disabled")
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), "unavailable" | "unknown")
    }

    /// State with its unit, e.g. `21.5 °C`.
    pub fn display_state(&self) -> String {
        match self.unit_of_measurement() {
            Some(unit) if !self.is_unavailable() => format!("{} {unit}", self.state),
            _ => self.state.clone(),
        }
    }

    /// Loose truthiness: integrations publish these flags as bools,
    /// numbers or strings.
    fn flag(&self, key: &str) -> bool {
        match self.attributes.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v.abs() > f64::EPSILON),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_) | Value::Object(_)) => true,
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
