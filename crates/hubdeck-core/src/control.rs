// ── Entity control helpers ──
//
// On/off/toggle shortcuts over `EntityStore::call_service`. The service
// domain is the entity's own category.

use strum::{Display, EnumIter, EnumString};

use crate::error::CoreError;
use crate::model::EntityId;
use crate::store::{EntityStore, ServiceCallResult};

/// Generic services most switchable domains implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ServiceAction {
    TurnOn,
    TurnOff,
    Toggle,
}

impl ServiceAction {
    pub fn service(self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::Toggle => "toggle",
        }
    }
}

impl EntityStore {
    /// Run `action` against `entity_id` in the entity's own domain.
    pub async fn perform(
        &self,
        action: ServiceAction,
        entity_id: &str,
    ) -> Result<ServiceCallResult, CoreError> {
        let id = EntityId::new(entity_id);
        if !id.is_valid() {
            return Err(CoreError::InvalidEntityId {
                entity_id: entity_id.to_owned(),
            });
        }
        self.call_service(id.domain(), action.service(), Some(id.as_str()), None)
            .await
    }

    pub async fn turn_on(&self, entity_id: &str) -> Result<ServiceCallResult, CoreError> {
        self.perform(ServiceAction::TurnOn, entity_id).await
    }

    pub async fn turn_off(&self, entity_id: &str) -> Result<ServiceCallResult, CoreError> {
        self.perform(ServiceAction::TurnOff, entity_id).await
    }

    pub async fn toggle(&self, entity_id: &str) -> Result<ServiceCallResult, CoreError> {
        self.perform(ServiceAction::Toggle, entity_id).await
    }
}
