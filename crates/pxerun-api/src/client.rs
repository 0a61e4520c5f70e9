// Hand-crafted async HTTP client for the Packet device API.
//
// Base path: https://api.packet.net/
// Auth: X-Auth-Token header

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::Error;
use crate::transport::TransportConfig;
use crate::types::{Device, DeviceCreateRequest, ErrorResponse};

/// Default public endpoint of the provider API.
pub const DEFAULT_API_URL: &str = "https://api.packet.net/";

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the Packet device API.
///
/// Uses token authentication and communicates via JSON REST endpoints.
pub struct PacketClient {
    http: reqwest::Client,
    base_url: Url,
}

impl PacketClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from an API token and transport config.
    ///
    /// Injects `X-Auth-Token` as a sensitive default header on every request.
    pub fn from_api_key(
        base_url: &str,
        api_key: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut token =
            HeaderValue::from_str(api_key.expose_secret()).map_err(|e| Error::Authentication {
                message: format!("invalid API key header value: {e}"),
            })?;
        token.set_sensitive(true);
        headers.insert("X-Auth-Token", token);
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        let http = transport.build_client_with_headers(headers)?;
        let base_url = Self::normalize_base_url(base_url)?;

        Ok(Self { http, base_url })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// Ensure the base URL ends with `/` so relative joins keep its path.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        Self::handle_response(resp).await
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("DELETE {url}");

        let resp = self.http.delete(url).send().await?;
        Self::handle_empty(resp).await
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(Self::parse_error(status, resp).await)
        }
    }

    async fn handle_empty(resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::parse_error(status, resp).await)
        }
    }

    async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Error::InvalidApiKey;
        }

        let raw = resp.text().await.unwrap_or_default();

        let message = match serde_json::from_str::<ErrorResponse>(&raw) {
            Ok(err) if !err.errors.is_empty() => err.errors.join("; "),
            _ if raw.is_empty() => status.to_string(),
            _ => raw,
        };

        Error::Api {
            status: status.as_u16(),
            message,
        }
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    // ── Devices ──────────────────────────────────────────────────────

    /// Provision a device in the request's project.
    pub async fn create_device(&self, req: &DeviceCreateRequest) -> Result<Device, Error> {
        self.post(&format!("projects/{}/devices", req.project_id), req)
            .await
    }

    /// Delete (deprovision) a device.
    pub async fn delete_device(&self, device_id: &str) -> Result<(), Error> {
        self.delete(&format!("devices/{device_id}")).await
    }
}
