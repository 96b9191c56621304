use thiserror::Error;

/// Top-level error type for the `hubdeck-api` crate.
///
/// Covers every failure mode across both hub surfaces: the websocket
/// event stream (handshake, request correlation, circuit breaker) and the
/// REST fallback. `hubdeck-core` maps these into store-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The hub answered the handshake with `auth_invalid`.
    #[error("Authentication rejected by hub: {message}")]
    AuthRejected { message: String },

    /// REST call rejected with HTTP 401.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status from the REST surface.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed with a non-normal close code.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The handshake did not reach `auth_ok` in time.
    #[error("WebSocket handshake timed out after {timeout_secs}s")]
    HandshakeTimeout { timeout_secs: u64 },

    /// The hub broke the handshake sequence.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// A request was issued while the socket was not in the connected phase.
    #[error("WebSocket not connected")]
    NotConnected,

    /// The circuit breaker refused a connection attempt.
    #[error("WebSocket temporarily disabled -- retry in {retry_in_secs}s")]
    CircuitOpen { retry_in_secs: u64 },

    /// The connection dropped while a request was waiting for its response.
    #[error("WebSocket connection lost before response to request {id}")]
    ConnectionLost { id: u64 },

    /// No matching response within the request timeout.
    #[error("Request {id} timed out after {timeout_secs}s")]
    RequestTimeout { id: u64, timeout_secs: u64 },

    /// The manager was shut down while the request was pending.
    #[error("Request cancelled: connection manager shut down")]
    Cancelled,

    // ── Hub ─────────────────────────────────────────────────────────
    /// A `result` frame with `success: false`.
    #[error("Hub error ({code}): {message}")]
    Hub { code: String, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// A request payload was not a JSON object.
    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),
}

impl Error {
    /// Returns `true` if the hub rejected our credentials.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthRejected { .. } | Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. }
            | Self::HandshakeTimeout { .. }
            | Self::RequestTimeout { .. }
            | Self::ConnectionLost { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the failure originates from the websocket channel
    /// itself rather than from the hub's answer.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_)
                | Self::WebSocketClosed { .. }
                | Self::HandshakeTimeout { .. }
                | Self::Handshake(_)
                | Self::NotConnected
                | Self::CircuitOpen { .. }
                | Self::ConnectionLost { .. }
                | Self::RequestTimeout { .. }
        )
    }

    /// Extract the hub error code, if available.
    pub fn hub_error_code(&self) -> Option<&str> {
        match self {
            Self::Hub { code, .. } => Some(code),
            _ => None,
        }
    }
}
