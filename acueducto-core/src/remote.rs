//! Client for the billing backend's REST API.
//!
//! The sync engine only needs two calls (create a consumption, list all
//! installations) plus a cheap reachability check. They sit behind the
//! [`RemoteApi`] trait so the engine can be driven by a fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::RemoteError;
use crate::models::{Consumption, ConsumptionRecord, Installation};

/// Header carrying the per-record deduplication key on create.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote operations used during synchronization.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Creates a consumption on the server.
    ///
    /// Any success status means the server stored the reading. The
    /// committed row is returned when the response identifies it, `None`
    /// when the body carries no `codigo`.
    async fn create_consumption(
        &self,
        record: &ConsumptionRecord,
        idempotency_key: Uuid,
    ) -> Result<Option<Consumption>, RemoteError>;

    /// Fetches the complete installation list.
    async fn list_installations(&self) -> Result<Vec<Installation>, RemoteError>;

    /// Succeeds when the server answers at all, whatever the status code.
    async fn ping(&self) -> Result<(), RemoteError>;
}

/// Fields of the created row we rely on; the rest is what we sent.
#[derive(Debug, Deserialize)]
struct CreatedConsumption {
    #[serde(rename = "codigo", default)]
    code: Option<i64>,
    #[serde(rename = "nombre", default)]
    name: Option<String>,
}

/// [`RemoteApi`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    server_url: String,
    api_token: Option<String>,
    http: reqwest::Client,
}

impl HttpRemoteApi {
    /// Creates a client with the default timeout.
    pub fn new(
        server_url: impl Into<String>,
        api_token: Option<String>,
    ) -> Result<Self, RemoteError> {
        Self::with_timeout(server_url, api_token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        server_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;
        Ok(Self {
            server_url: server_url.into(),
            api_token,
            http,
        })
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Builds an HTTP URL for a given path.
    fn build_http_url(&self, path: &str) -> String {
        let base_url = if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_consumption(
        &self,
        record: &ConsumptionRecord,
        idempotency_key: Uuid,
    ) -> Result<Option<Consumption>, RemoteError> {
        let response = self
            .authorized(self.http.post(self.build_http_url("/consumo")))
            .header(IDEMPOTENCY_HEADER, idempotency_key.to_string())
            .json(record)
            .send()
            .await
            .map_err(classify)?;

        // Past this point the reading is stored; an unreadable body only
        // means we do not learn its code.
        let body = check_status(response).await?.text().await.unwrap_or_default();
        Ok(committed_from_body(&body, record))
    }

    async fn list_installations(&self) -> Result<Vec<Installation>, RemoteError> {
        let response = self
            .authorized(self.http.get(self.build_http_url("/instalaciones")))
            .send()
            .await
            .map_err(classify)?;

        check_status(response).await?.json().await.map_err(classify)
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.http
            .get(self.build_http_url("/health"))
            .send()
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

/// The committed row described by a successful create response, if any.
fn committed_from_body(body: &str, record: &ConsumptionRecord) -> Option<Consumption> {
    let created: CreatedConsumption = serde_json::from_str(body).ok()?;
    Some(Consumption {
        code: created.code?,
        name: created.name,
        record: record.clone(),
    })
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(RemoteError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Separates "no answer" from "bad answer".
fn classify(e: reqwest::Error) -> RemoteError {
    if e.is_decode() || e.is_body() {
        RemoteError::Decode(e.to_string())
    } else if let Some(status) = e.status() {
        RemoteError::Rejected {
            status: status.as_u16(),
            message: e.to_string(),
        }
    } else {
        RemoteError::Connectivity(e.to_string())
    }
}
