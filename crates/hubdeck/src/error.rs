//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hubdeck_config::ConfigError;
use hubdeck_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the hub: {reason}")]
    #[diagnostic(
        code(hubdeck::connection_failed),
        help(
            "Check that the hub is running and reachable.\n\
             Try: hubdeck status --url http://homeassistant.local:8123"
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Hub event stream unavailable: {message}")]
    #[diagnostic(
        code(hubdeck::stream_disabled),
        help("Retry later, or use --no-websocket to rely on REST polling.")
    )]
    StreamDisabled { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(hubdeck::auth_failed),
        help(
            "Verify the long-lived access token (Profile > Security in the hub UI).\n\
             Run: hubdeck config set-token"
        )
    )]
    AuthFailed { message: String },

    #[error("No access token configured for profile '{profile}'")]
    #[diagnostic(
        code(hubdeck::no_credentials),
        help(
            "Store one with: hubdeck config set-token {profile}\n\
             Or set the HUBDECK_TOKEN environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Entities ─────────────────────────────────────────────────────
    #[error("Entity '{identifier}' not found")]
    #[diagnostic(
        code(hubdeck::not_found),
        help("Run: hubdeck states --search <text> to find entity ids")
    )]
    NotFound { identifier: String },

    // ── Hub ──────────────────────────────────────────────────────────
    #[error("Hub error ({code}): {message}")]
    #[diagnostic(code(hubdeck::api_error))]
    ApiError { code: String, message: String },

    #[error("Service {domain}.{service} failed: {message}")]
    #[diagnostic(code(hubdeck::service_failed))]
    ServiceFailed {
        domain: String,
        service: String,
        message: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hubdeck::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(hubdeck::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: hubdeck config set-profile <name> --hub-url <url>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No hub configured")]
    #[diagnostic(
        code(hubdeck::no_config),
        help(
            "Pass --url and --token, or create a profile with:\n  \
             hubdeck config set-profile default --hub-url <url>\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(hubdeck::config))]
    Config { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(hubdeck::timeout),
        help("Increase timeout with --timeout or check hub responsiveness.")
    )]
    Timeout { seconds: u64 },

    #[error("Interrupted")]
    #[diagnostic(code(hubdeck::cancelled))]
    Cancelled,

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(hubdeck::json))]
    Json(#[from] serde_json::Error),

    #[error("YAML output failed: {0}")]
    #[diagnostic(code(hubdeck::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::StreamDisabled { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed { reason },

            CoreError::NotConnected => CliError::ConnectionFailed {
                reason: "event stream is not connected".into(),
            },

            CoreError::ConnectionDisabled { message } => CliError::StreamDisabled { message },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::Cancelled => CliError::Cancelled,

            CoreError::EntityNotFound { entity_id } => CliError::NotFound {
                identifier: entity_id,
            },

            CoreError::InvalidEntityId { entity_id } => CliError::Validation {
                field: "entity_id".into(),
                reason: format!("'{entity_id}' is not of the form <domain>.<object_id>"),
            },

            CoreError::ServiceCall {
                domain,
                service,
                message,
            } => CliError::ServiceFailed {
                domain,
                service,
                message,
            },

            CoreError::Api {
                message,
                status: Some(401 | 403),
                ..
            } => CliError::AuthFailed { message },

            CoreError::Api {
                message,
                code,
                status,
            } => CliError::ApiError {
                code: code
                    .or_else(|| status.map(|s| s.to_string()))
                    .unwrap_or_else(|| "unknown".into()),
                message,
            },

            CoreError::Config { message } => CliError::Config { message },

            CoreError::Internal(message) => CliError::ApiError {
                code: "internal".into(),
                message,
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: String::new(),
            },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
