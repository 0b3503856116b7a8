//! Typed document shapes consumed by the runtime
//!
//! Profile, map, and provider documents are produced by the external parser
//! and accepted here either inline or behind `file://` references. The
//! runtime never re-parses source text; it branches only on these shapes.

use serde::{Deserialize, Serialize};

use crate::security::SecurityScheme;

/// One named operation declared by a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UseCaseDefinition {
    pub name: String,

    /// Declared input shape, opaque to the runtime; the validator consumes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,

    /// Declared result shape, opaque to the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Parsed profile document: the provider-agnostic interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDocument {
    /// `scope/name` without version.
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub usecases: Vec<UseCaseDefinition>,
}

impl ProfileDocument {
    /// Look up a use case declared by this profile.
    pub fn usecase(&self, name: &str) -> Option<&UseCaseDefinition> {
        self.usecases.iter().find(|u| u.name == name)
    }
}

/// Parsed map document: the provider-specific translation of a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDocument {
    /// `scope/name@major.minor` of the profile this map implements.
    pub profile: String,
    /// Provider name; must match the configured provider at bind time.
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Per-use-case map bodies, opaque to the runtime; the interpreter
    /// executes them against the HTTP stage.
    #[serde(default)]
    pub usecases: serde_json::Map<String, serde_json::Value>,
}

impl MapDocument {
    pub fn usecase(&self, name: &str) -> Option<&serde_json::Value> {
        self.usecases.get(name)
    }
}

/// One HTTP service exposed by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderService {
    pub id: String,
    pub base_url: String,
}

/// Integration parameter declared by a provider document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Parsed provider definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderJson {
    pub name: String,
    #[serde(default)]
    pub services: Vec<ProviderService>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_service: Option<String>,
    #[serde(default)]
    pub security_schemes: Vec<SecurityScheme>,
    #[serde(default)]
    pub parameters: Vec<IntegrationParameter>,
}

impl ProviderJson {
    /// Resolve a service id (or the default service) to its base URL.
    pub fn service_url(&self, selector: Option<&str>) -> Option<&str> {
        let id = selector.or(self.default_service.as_deref())?;
        self.services.iter().find(|s| s.id == id).map(|s| s.base_url.as_str())
    }
}
