//! Map interpreter seam
//!
//! Executing a map's use-case body against the HTTP stage is the concern of
//! an external interpreter. The runtime hands it everything a map may need:
//! the bound documents, the composed input, resolved security, integration
//! parameters, the per-attempt timeout, and the perform context that routes
//! its fetches through the event hooks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::bind::BoundProfileProvider;
use crate::error::PerformError;
use crate::events::PerformContext;
use crate::http::HttpClient;
use crate::security::SecurityConfiguration;

/// Everything one interpretation run receives.
pub struct InterpretParams {
    pub usecase: String,
    pub input: Value,
    pub bound: Arc<BoundProfileProvider>,
    pub security: Vec<SecurityConfiguration>,
    pub parameters: BTreeMap<String, String>,
    pub request_timeout: Option<Duration>,
    pub context: PerformContext,
}

/// Executes one use case of a bound map.
#[async_trait]
pub trait MapInterpreter: Send + Sync {
    async fn perform(
        &self,
        params: InterpretParams,
        http: &HttpClient,
    ) -> Result<Value, PerformError>;
}

/// Placeholder interpreter for runtimes constructed without one; every
/// perform fails with a configuration error naming the missing piece.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredInterpreter;

#[async_trait]
impl MapInterpreter for UnconfiguredInterpreter {
    async fn perform(
        &self,
        params: InterpretParams,
        _http: &HttpClient,
    ) -> Result<Value, PerformError> {
        Err(PerformError::Config(format!(
            "no map interpreter configured; cannot perform {}",
            params.usecase
        )))
    }
}
