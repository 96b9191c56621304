// ── Wire → domain conversion ──

use hubdeck_api::HubState;

use crate::model::{Entity, EntityId};

impl From<HubState> for Entity {
    fn from(raw: HubState) -> Self {
        Entity::new(EntityId::from(raw.entity_id), raw.state, raw.attributes)
            .with_timestamps(raw.last_changed, raw.last_updated)
    }
}
