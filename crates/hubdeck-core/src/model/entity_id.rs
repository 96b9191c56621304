// ── Entity identity ──
//
// Every hub entity is addressed as `<domain>.<object_id>`, e.g.
// `light.kitchen` or `sensor.outside_temperature`. The domain doubles as
// the grouping category and as the service namespace for control calls.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Canonical identifier for any hub entity.
///
/// Construction never fails: the hub is the authority on ids, so ids that
/// do not match the strict `<domain>.<object_id>` grammar are kept as-is
/// and can be checked with [`EntityId::is_valid`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segment before the first `.`, or the whole id when there is none.
    pub fn domain(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(domain, _)| domain)
    }

    /// Segment after the first `.`, empty when there is none.
    pub fn object_id(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, object)| object)
    }

    /// Strict check: a non-empty `[A-Za-z0-9_]+` on both sides of a single
    /// dot. Object ids may start with a digit (`switch.3d_printer`).
    pub fn is_valid(&self) -> bool {
        fn is_slug(part: &str) -> bool {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }

        match self.0.split_once('.') {
            Some((domain, object)) => is_slug(domain) && is_slug(object),
            None => false,
        }
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
