// REST fallback client
//
// Wraps `reqwest::Client` with bearer auth and hub URL construction. Used
// for the bulk entity load whenever the websocket is not connected, and
// for service calls from one-shot CLI commands.

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::frame::HubState;
use crate::transport::TransportConfig;

/// Raw HTTP client for the hub's `/api` REST surface.
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    /// Build a client that authenticates every request with `token`.
    ///
    /// `base_url` is the hub root, e.g. `http://homeassistant.local:8123`.
    pub fn new(
        base_url: Url,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_bearer_client(token)?;
        Ok(Self { http, base_url })
    }

    /// Use a pre-built client; the caller is responsible for auth headers.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/{path}"))?)
    }

    // ── Endpoints ───────────────────────────────────────────────────

    /// `GET /api/` -- cheap reachability and credential check.
    pub async fn check_api(&self) -> Result<String, Error> {
        let body: Value = self.get(self.api_url("")?).await?;
        Ok(body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("API running.")
            .to_owned())
    }

    /// `GET /api/states` -- every entity the hub knows about.
    pub async fn get_states(&self) -> Result<Vec<HubState>, Error> {
        self.get(self.api_url("states")?).await
    }

    /// `GET /api/states/{entity_id}`.
    pub async fn get_state(&self, entity_id: &str) -> Result<HubState, Error> {
        self.get(self.api_url(&format!("states/{entity_id}"))?).await
    }

    /// `POST /api/services/{domain}/{service}`.
    ///
    /// Returns the states the hub reports as changed by the call.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: &Value,
    ) -> Result<Vec<HubState>, Error> {
        let url = self.api_url(&format!("services/{domain}/{service}"))?;
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .json(service_data)
            .send()
            .await
            .map_err(Error::Transport)?;
        Self::parse_body(resp).await
    }

    // ── Request helpers ─────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        Self::parse_body(resp).await
    }

    async fn parse_body<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "access token missing or invalid (HTTP 401)".into(),
            });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
