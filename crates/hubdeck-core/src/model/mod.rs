// ── Domain model ──

mod entity;
mod entity_id;

pub use entity::Entity;
pub use entity_id::EntityId;
