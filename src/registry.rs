//! Registry protocol client
//!
//! The registry resolves (profile version, provider) pairs into provider
//! definitions and map documents. Bind is the primary path; fetching raw map
//! source exists as a fallback when a served map fails validation, and
//! provider info covers locally-mapped providers without a local provider
//! file. The client is a trait so tests can stub it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ast::{MapDocument, ProviderJson};
use crate::error::PerformError;

/// Default public registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.superface.ai";

/// Request for the bind operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BindRequest {
    /// `scope/name` of the profile.
    pub profile_id: String,
    pub version: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_revision: Option<String>,
}

/// Registry answer to a bind request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindResponse {
    pub provider: ProviderJson,
    #[serde(default)]
    pub map_ast: Option<MapDocument>,
}

/// Client side of the registry protocol.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn fetch_bind(&self, request: BindRequest) -> Result<BindResponse, PerformError>;

    /// Raw map source for out-of-band validation; the runtime never parses it.
    async fn fetch_map_source(&self, map_id: &str) -> Result<String, PerformError>;

    async fn fetch_provider_info(&self, provider: &str) -> Result<ProviderJson, PerformError>;
}

/// Reqwest-backed registry client.
pub struct HttpRegistryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PerformError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PerformError::Unexpected(format!("failed to build http client: {e}")))?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    async fn parse_ok<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, PerformError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PerformError::Bind(format!(
                "registry rejected {what} with status {status}: {body}"
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| PerformError::Bind(format!("registry returned an invalid {what}: {e}")))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch_bind(&self, request: BindRequest) -> Result<BindResponse, PerformError> {
        log::debug!(
            "bind {}@{} with provider {}",
            request.profile_id,
            request.version,
            request.provider
        );
        let response = self
            .client
            .post(format!("{}/registry/bind", self.base_url))
            .json(&request)
            .send()
            .await?;
        Self::parse_ok(response, "bind response").await
    }

    async fn fetch_map_source(&self, map_id: &str) -> Result<String, PerformError> {
        let response = self
            .client
            .get(format!("{}/{map_id}", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PerformError::Bind(format!(
                "registry rejected map source {map_id} with status {status}"
            )));
        }
        Ok(response.text().await?)
    }

    async fn fetch_provider_info(&self, provider: &str) -> Result<ProviderJson, PerformError> {
        let response = self
            .client
            .get(format!("{}/providers/{provider}", self.base_url))
            .send()
            .await?;
        Self::parse_ok(response, "provider definition").await
    }
}
