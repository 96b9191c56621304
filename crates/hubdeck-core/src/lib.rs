// hubdeck-core: Live entity store between hubdeck-api and consumers (CLI).

pub mod config;
pub mod control;
pub mod convert;
pub mod error;
pub mod filter;
pub mod model;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{HubConfig, TlsVerification};
pub use control::ServiceAction;
pub use error::CoreError;
pub use filter::EntityFilter;
pub use model::{Entity, EntityId};
pub use store::{
    ApplyOutcome, EntityStore, LoadOutcome, LoadSource, ServiceCallResult, Snapshot,
    StoreDiagnostics, StoreStatus,
};
pub use stream::{EntityStream, SnapshotWatchStream};

// Connection types surface through the store's diagnostics.
pub use hubdeck_api::{ConnectionPhase, ConnectionState, ReconnectPolicy};
