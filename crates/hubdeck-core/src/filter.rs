// ── Entity filter predicates ──
//
// Used by the CLI to narrow a snapshot without another round-trip.

use crate::model::Entity;

/// Filter over entity snapshots. Hidden and disabled entities are
/// excluded unless asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    /// Keep only these categories. Empty keeps all.
    pub domains: Vec<String>,
    pub include_hidden: bool,
    pub include_disabled: bool,
    /// Case-insensitive substring over id and display name.
    pub search: Option<String>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    pub fn search(mut self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.search = (!needle.is_empty()).then_some(needle);
        self
    }

    pub fn include_hidden(mut self, yes: bool) -> Self {
        self.include_hidden = yes;
        self
    }

    pub fn include_disabled(mut self, yes: bool) -> Self {
        self.include_disabled = yes;
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if !self.domains.is_empty() && !self.domains.iter().any(|d| *d == entity.category) {
            return false;
        }
        if !self.include_hidden && entity.is_hidden() {
            return false;
        }
        if !self.include_disabled && entity.is_disabled() {
            return false;
        }
        match &self.search {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                entity.id.as_str().to_lowercase().contains(&needle)
                    || entity.display_name.to_lowercase().contains(&needle)
            }
        }
    }

    /// Keep matching entities, preserving order.
    pub fn apply<'a, T>(&self, entities: impl IntoIterator<Item = &'a T>) -> Vec<&'a T>
    where
        T: AsRef<Entity> + 'a,
    {
        entities
            .into_iter()
            .filter(|e| self.matches((*e).as_ref()))
            .collect()
    }
}
