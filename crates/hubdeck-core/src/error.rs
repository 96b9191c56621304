// ── Core error types ──
//
// User-facing errors from hubdeck-core. Consumers never see raw frames or
// HTTP bodies; the `From<hubdeck_api::Error>` impl translates wire-level
// failures into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach hub: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Hub event stream is not connected")]
    NotConnected,

    #[error("Hub event stream disabled: {message}")]
    ConnectionDisabled { message: String },

    #[error("Hub did not answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    #[error("Invalid entity id '{entity_id}': expected <domain>.<object_id>")]
    InvalidEntityId { entity_id: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Service call {domain}.{service} failed: {message}")]
    ServiceCall {
        domain: String,
        service: String,
        message: String,
    },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Hub API error: {message}")]
    Api {
        message: String,
        /// Hub error code, e.g. `service_not_found`.
        code: Option<String>,
        /// HTTP status code (REST only).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wrap any error from a service call with the call's identity.
    pub(crate) fn service_call(domain: &str, service: &str, err: impl std::fmt::Display) -> Self {
        Self::ServiceCall {
            domain: domain.to_owned(),
            service: service.to_owned(),
            message: err.to_string(),
        }
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<hubdeck_api::Error> for CoreError {
    fn from(err: hubdeck_api::Error) -> Self {
        use hubdeck_api::Error as Api;

        match err {
            Api::AuthRejected { message } | Api::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            Api::Transport(ref e) if e.is_timeout() => CoreError::Timeout { timeout_secs: 0 },
            Api::Transport(e) => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            Api::Http { status, message } => CoreError::Api {
                message: format!("HTTP {status}: {message}"),
                code: None,
                status: Some(status),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            e @ (Api::WebSocketConnect(_)
            | Api::WebSocketClosed { .. }
            | Api::Handshake(_)
            | Api::ConnectionLost { .. }) => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            Api::HandshakeTimeout { timeout_secs } | Api::RequestTimeout { timeout_secs, .. } => {
                CoreError::Timeout { timeout_secs }
            }
            Api::NotConnected => CoreError::NotConnected,
            e @ Api::CircuitOpen { .. } => CoreError::ConnectionDisabled {
                message: e.to_string(),
            },
            Api::Cancelled => CoreError::Cancelled,
            Api::Hub { code, message } => CoreError::Api {
                message,
                code: Some(code),
                status: None,
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            Api::InvalidPayload(msg) => CoreError::Internal(msg),
        }
    }
}
