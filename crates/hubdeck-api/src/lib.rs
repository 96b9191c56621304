// hubdeck-api: Async Rust client for the Home Assistant hub (websocket + REST)

pub mod error;
pub mod frame;
pub mod rest;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use frame::{HubEvent, HubState, ResponseFrame, StateChangedData, STATE_CHANGED};
pub use rest::RestClient;
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    ConnectionConfig, ConnectionManager, ConnectionPhase, ConnectionState, HandlerError,
    ReconnectPolicy, Subscription, websocket_url,
};
