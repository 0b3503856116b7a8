//! Configuration model
//!
//! The on-disk `super.json` document is permissive (shorthands, omitted
//! defaults). [`normalize`](crate::config::normalize) collapses it into the
//! canonical form defined here, which is the only form the runtime consumes:
//! no shorthands, every default materialized, retry policies fully
//! specified, environment variables resolved, priorities populated.

mod loader;
pub mod normalize;

pub use loader::{discover_super_json, load_super_json, DEFAULT_SUPER_JSON_PATH, MAX_DISCOVERY_LEVELS};
pub use normalize::normalize;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PerformError;
use crate::security::SecurityValues;

/// Default retry budget when a policy omits it.
pub const DEFAULT_MAX_CONTIGUOUS_RETRIES: u32 = 5;
/// Default per-attempt request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default first exponential backoff delay in milliseconds.
pub const DEFAULT_BACKOFF_START_MS: u64 = 2_000;
/// Default exponential backoff factor.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
/// Default circuit open time in milliseconds.
pub const DEFAULT_OPEN_TIME_MS: u64 = 30_000;

/// Profile identifier: optional scope plus name, e.g. `starwars/character-information`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId {
    pub scope: Option<String>,
    pub name: String,
}

fn valid_id_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl FromStr for ProfileId {
    type Err = PerformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scope, name) = match s.split_once('/') {
            Some((scope, name)) => (Some(scope), name),
            None => (None, s),
        };
        if name.contains('/') || !valid_id_segment(name) || !scope.map_or(true, valid_id_segment) {
            return Err(PerformError::Config(format!("invalid profile id: {s}")));
        }
        Ok(ProfileId { scope: scope.map(str::to_string), name: name.to_string() })
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}/{}", scope, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Semantic version of a profile, `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl FromStr for ProfileVersion {
    type Err = PerformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        let mut next = |label: &str| {
            parts
                .next()
                .and_then(|p| p.parse::<u64>().ok())
                .ok_or_else(|| PerformError::Config(format!("invalid {label} in version: {s}")))
        };
        let version =
            ProfileVersion { major: next("major")?, minor: next("minor")?, patch: next("patch")? };
        Ok(version)
    }
}

impl fmt::Display for ProfileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Where a profile document comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileSource {
    Version { version: String },
    File { file: String },
}

/// Where a map document comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapSource {
    File {
        file: String,
    },
    #[serde(rename_all = "camelCase")]
    Registry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_variant: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_revision: Option<String>,
    },
}

/// Exponential backoff parameters of a circuit-breaker policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExponentialBackoffConfig {
    /// First delay in milliseconds.
    pub start: u64,
    pub factor: f64,
}

// Serialized with an explicit kind discriminator so the normalized document
// round-trips through the raw parser unchanged.
impl Serialize for ExponentialBackoffConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("kind", "exponential")?;
        map.serialize_entry("start", &self.start)?;
        map.serialize_entry("factor", &self.factor)?;
        map.end()
    }
}

impl Default for ExponentialBackoffConfig {
    fn default() -> Self {
        Self { start: DEFAULT_BACKOFF_START_MS, factor: DEFAULT_BACKOFF_FACTOR }
    }
}

/// Fully-specified retry policy for one (use case, provider) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RetryPolicyConfig {
    /// Single attempt, abort on failure.
    None,
    /// Up to `max_contiguous_retries` retries with no delay.
    #[serde(rename_all = "camelCase")]
    Simple { max_contiguous_retries: u32, request_timeout: u64 },
    #[serde(rename_all = "camelCase")]
    CircuitBreaker {
        max_contiguous_retries: u32,
        request_timeout: u64,
        open_time: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backoff: Option<ExponentialBackoffConfig>,
    },
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        RetryPolicyConfig::None
    }
}

impl RetryPolicyConfig {
    /// Per-attempt timeout this policy imposes on the HTTP stage.
    pub fn request_timeout_ms(&self) -> u64 {
        match self {
            RetryPolicyConfig::None => DEFAULT_REQUEST_TIMEOUT_MS,
            RetryPolicyConfig::Simple { request_timeout, .. }
            | RetryPolicyConfig::CircuitBreaker { request_timeout, .. } => *request_timeout,
        }
    }
}

/// Per-use-case defaults declared at the profile level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsecaseDefaults {
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub provider_failover: bool,
}

/// Per-use-case defaults declared for one (profile, provider) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileProviderDefaults {
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub retry_policy: RetryPolicyConfig,
}

/// Normalized settings for one provider within a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProfileProviderSettings {
    #[serde(flatten)]
    pub source: MapSource,
    #[serde(default)]
    pub defaults: BTreeMap<String, ProfileProviderDefaults>,
}

/// Normalized settings for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProfileSettings {
    #[serde(flatten)]
    pub source: ProfileSource,
    /// Provider failover order; never empty after normalization unless no
    /// providers are configured at all.
    pub priority: Vec<String>,
    #[serde(default)]
    pub defaults: BTreeMap<String, UsecaseDefaults>,
    #[serde(default)]
    pub providers: BTreeMap<String, NormalizedProfileProviderSettings>,
}

impl NormalizedProfileSettings {
    /// Effective retry policy for (use case, provider).
    pub fn retry_policy(&self, usecase: &str, provider: &str) -> RetryPolicyConfig {
        self.providers
            .get(provider)
            .and_then(|p| p.defaults.get(usecase))
            .map(|d| d.retry_policy.clone())
            .unwrap_or_default()
    }

    /// Whether failover between providers is enabled for a use case.
    pub fn provider_failover(&self, usecase: &str) -> bool {
        self.defaults.get(usecase).map(|d| d.provider_failover).unwrap_or(false)
    }

    /// Default input for a use case: profile-level defaults overlaid with
    /// provider-level defaults.
    pub fn default_input(
        &self,
        usecase: &str,
        provider: &str,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut input = self
            .defaults
            .get(usecase)
            .map(|d| d.input.clone())
            .unwrap_or_default();
        if let Some(provider_defaults) =
            self.providers.get(provider).and_then(|p| p.defaults.get(usecase))
        {
            for (key, value) in &provider_defaults.input {
                input.insert(key.clone(), value.clone());
            }
        }
        input
    }

    /// Stable identity of this configuration, used in cache keys.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Normalized settings for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NormalizedProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub security: Vec<SecurityValues>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl NormalizedProviderSettings {
    /// Stable identity of this configuration, used in cache keys.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// The canonical configuration document the runtime consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NormalizedDocument {
    #[serde(default)]
    pub profiles: BTreeMap<String, NormalizedProfileSettings>,
    #[serde(default)]
    pub providers: BTreeMap<String, NormalizedProviderSettings>,
}

impl NormalizedDocument {
    pub fn profile(&self, id: &str) -> Result<&NormalizedProfileSettings, PerformError> {
        self.profiles
            .get(id)
            .ok_or_else(|| PerformError::Config(format!("profile not configured: {id}")))
    }

    pub fn provider(&self, name: &str) -> Result<&NormalizedProviderSettings, PerformError> {
        self.providers
            .get(name)
            .ok_or_else(|| PerformError::Config(format!("provider not configured: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_id_round_trips() {
        let id: ProfileId = "starwars/character-information".parse().unwrap();
        assert_eq!(id.scope.as_deref(), Some("starwars"));
        assert_eq!(id.name, "character-information");
        assert_eq!(id.to_string(), "starwars/character-information");

        let unscoped: ProfileId = "weather".parse().unwrap();
        assert!(unscoped.scope.is_none());
        assert_eq!(unscoped.to_string(), "weather");
    }

    #[test]
    fn profile_id_rejects_bad_segments() {
        assert!("".parse::<ProfileId>().is_err());
        assert!("a/b/c".parse::<ProfileId>().is_err());
        assert!("Upper/case".parse::<ProfileId>().is_err());
        assert!("ok/".parse::<ProfileId>().is_err());
    }

    #[test]
    fn profile_version_parses_triples() {
        let v: ProfileVersion = "1.0.2".parse().unwrap();
        assert_eq!(v, ProfileVersion { major: 1, minor: 0, patch: 2 });
        assert_eq!(v.to_string(), "1.0.2");

        assert!("1.0".parse::<ProfileVersion>().is_err());
        assert!("1.x.0".parse::<ProfileVersion>().is_err());
    }

    #[test]
    fn retry_policy_wire_shape() {
        let policy = RetryPolicyConfig::CircuitBreaker {
            max_contiguous_retries: 2,
            request_timeout: 1000,
            open_time: DEFAULT_OPEN_TIME_MS,
            backoff: Some(ExponentialBackoffConfig::default()),
        };
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["kind"], "circuit-breaker");
        assert_eq!(value["maxContiguousRetries"], 2);
        assert_eq!(value["backoff"]["kind"], "exponential");
        assert_eq!(value["backoff"]["start"], 2000);

        let back: RetryPolicyConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, policy);
        assert_eq!(back.request_timeout_ms(), 1000);
        assert_eq!(RetryPolicyConfig::None.request_timeout_ms(), DEFAULT_REQUEST_TIMEOUT_MS);
    }

    #[test]
    fn default_input_overlays_provider_defaults() {
        let mut profile_defaults = BTreeMap::new();
        profile_defaults.insert(
            "Test".to_string(),
            UsecaseDefaults {
                input: serde_json::json!({"a": 1, "b": 2}).as_object().unwrap().clone(),
                provider_failover: false,
            },
        );
        let mut provider_defaults = BTreeMap::new();
        provider_defaults.insert(
            "Test".to_string(),
            ProfileProviderDefaults {
                input: serde_json::json!({"b": 3}).as_object().unwrap().clone(),
                retry_policy: RetryPolicyConfig::None,
            },
        );
        let mut providers = BTreeMap::new();
        providers.insert(
            "acme".to_string(),
            NormalizedProfileProviderSettings {
                source: MapSource::Registry { map_variant: None, map_revision: None },
                defaults: provider_defaults,
            },
        );

        let settings = NormalizedProfileSettings {
            source: ProfileSource::Version { version: "1.0.0".to_string() },
            priority: vec!["acme".to_string()],
            defaults: profile_defaults,
            providers,
        };

        let input = settings.default_input("Test", "acme");
        assert_eq!(input.get("a"), Some(&serde_json::json!(1)));
        assert_eq!(input.get("b"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn cache_keys_differ_for_different_settings() {
        let a = NormalizedProviderSettings::default();
        let b = NormalizedProviderSettings {
            parameters: [("k".to_string(), "v".to_string())].into_iter().collect(),
            ..Default::default()
        };
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), a.clone().cache_key());
    }
}
