//! Shared fixtures for integration tests
//!
//! The runtime treats the map interpreter as an external collaborator, so
//! the tests plug in a minimal one: it reads `{"method", "path", "security"}`
//! from the map's use-case body, issues a single request against the bound
//! provider's default service, and returns the response body as the mapped
//! result.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use usecase_runtime::error::PerformError;
use usecase_runtime::http::{FetchRequest, HttpClient};
use usecase_runtime::interpret::{InterpretParams, MapInterpreter};
use usecase_runtime::registry::{BindRequest, BindResponse, RegistryClient};
use usecase_runtime::{MapDocument, ProfileDocument, ProviderJson, UseCaseRuntimeBuilder};

pub struct TestInterpreter;

#[async_trait]
impl MapInterpreter for TestInterpreter {
    async fn perform(
        &self,
        params: InterpretParams,
        http: &HttpClient,
    ) -> Result<Value, PerformError> {
        let body = params
            .bound
            .map
            .usecase(&params.usecase)
            .cloned()
            .ok_or_else(|| {
                PerformError::Unexpected(format!("map has no use case {}", params.usecase))
            })?;

        let mut request = FetchRequest::new(
            body["method"].as_str().unwrap_or("GET"),
            body["path"].as_str().unwrap_or("/"),
        );
        request.base_url = params.bound.default_service_url().map(str::to_string);
        request.accept = Some("application/json".to_string());
        request.request_timeout = params.request_timeout;
        if let Some(security) = body["security"].as_array() {
            request.security_requirements =
                security.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        }

        let response = http.fetch(&params.context, request, &params.security).await?;
        Ok(response.body)
    }
}

pub fn profile_doc(id: &str, usecase: &str) -> ProfileDocument {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "version": "1.0.0",
        "usecases": [{"name": usecase}]
    }))
    .unwrap()
}

pub fn map_doc(profile_id: &str, provider: &str, usecase: &str) -> MapDocument {
    serde_json::from_value(serde_json::json!({
        "profile": format!("{profile_id}@1.0"),
        "provider": provider,
        "usecases": {usecase: {"method": "GET", "path": "/test"}}
    }))
    .unwrap()
}

pub fn provider_doc(name: &str, base_url: &str) -> ProviderJson {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "services": [{"id": "default", "baseUrl": base_url}],
        "defaultService": "default"
    }))
    .unwrap()
}

/// Builder pre-loaded with inline documents for one profile and a set of
/// providers, each backed by a mock server base URL.
pub fn runtime_builder(
    profile_id: &str,
    usecase: &str,
    config: &Value,
    providers: &[(&str, String)],
) -> UseCaseRuntimeBuilder {
    let mut builder = usecase_runtime::UseCaseRuntime::builder()
        .with_config(usecase_runtime::normalize(config).unwrap())
        .with_interpreter(Arc::new(TestInterpreter))
        .with_profile_document(profile_id, profile_doc(profile_id, usecase));

    for (name, base_url) in providers {
        builder = builder
            .with_map_document(profile_id, *name, map_doc(profile_id, name, usecase))
            .with_provider_document(*name, provider_doc(name, base_url));
    }

    builder
}

/// Registry stub that only serves provider definitions and counts the calls.
pub struct CountingRegistry {
    pub provider: ProviderJson,
    pub provider_info_calls: AtomicUsize,
}

impl CountingRegistry {
    pub fn new(provider: ProviderJson) -> Self {
        Self { provider, provider_info_calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.provider_info_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for CountingRegistry {
    async fn fetch_bind(&self, request: BindRequest) -> Result<BindResponse, PerformError> {
        Err(PerformError::Bind(format!(
            "bind is not served by this stub (requested {})",
            request.profile_id
        )))
    }

    async fn fetch_map_source(&self, map_id: &str) -> Result<String, PerformError> {
        Err(PerformError::Bind(format!("map source {map_id} is not served by this stub")))
    }

    async fn fetch_provider_info(&self, _provider: &str) -> Result<ProviderJson, PerformError> {
        self.provider_info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.provider.clone())
    }
}
