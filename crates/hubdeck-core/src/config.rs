// ── Runtime hub configuration ──
//
// These types describe *how* to reach a hub. They carry the credential
// and connection tuning, but never touch disk: the CLI builds a
// `HubConfig` (usually via hubdeck-config) and hands it in.

use std::time::Duration;

use hubdeck_api::{ConnectionConfig, ReconnectPolicy, TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// TLS verification strategy for the REST client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed certs).
    DangerAcceptInvalid,
}

/// Configuration for talking to a single hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub base URL (e.g., `http://homeassistant.local:8123`).
    pub url: Url,
    /// Long-lived access token.
    pub token: SecretString,
    pub tls: TlsVerification,
    /// REST request timeout.
    pub timeout: Duration,
    /// Use the websocket event stream. When off, the store polls REST only.
    pub websocket_enabled: bool,
    pub reconnect: ReconnectPolicy,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    /// Period of the REST polling fallback while the socket is down.
    pub poll_interval: Duration,
    /// Delay before a breaker reset after a bulk load fails on the socket.
    pub breaker_reset_delay: Duration,
}

impl HubConfig {
    pub fn new(url: Url, token: SecretString) -> Self {
        Self {
            url,
            token,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            websocket_enabled: true,
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            breaker_reset_delay: Duration::from_secs(10),
        }
    }

    /// TLS and timeout settings for the REST client.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
        }
    }

    /// Websocket settings: URL derived from `url`, plus the tuning above.
    pub fn connection_config(&self) -> Result<ConnectionConfig, CoreError> {
        let mut config = ConnectionConfig::new(&self.url, self.token.clone())?;
        config.reconnect = self.reconnect.clone();
        config.handshake_timeout = self.handshake_timeout;
        config.request_timeout = self.request_timeout;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HubConfig {
        HubConfig::new(
            Url::parse("https://hub.example.com").unwrap_or_else(|e| panic!("{e}")),
            SecretString::from("token".to_owned()),
        )
    }

    #[test]
    fn defaults() {
        let config = config();
        assert_eq!(config.tls, TlsVerification::SystemDefaults);
        assert!(config.websocket_enabled);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.breaker_reset_delay, Duration::from_secs(10));
    }

    #[test]
    fn connection_config_carries_tuning() {
        let mut config = config();
        config.request_timeout = Duration::from_secs(3);
        let conn = config.connection_config().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(conn.ws_url.as_str(), "wss://hub.example.com/api/websocket");
        assert_eq!(conn.request_timeout, Duration::from_secs(3));
    }
}
