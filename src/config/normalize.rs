//! Normalization of the raw configuration document
//!
//! The raw document accepts shorthands: a profile entry may be a bare
//! version string or a `file://` URI, a provider entry may be a `file://`
//! URI, and retry policies may be bare kind strings. Normalization collapses
//! all of them, materializes defaults, resolves `$ENV` leaves, and populates
//! priorities, producing the canonical [`NormalizedDocument`].
//!
//! Normalization is idempotent: a normalized document normalizes to itself.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::{
    ExponentialBackoffConfig, MapSource, NormalizedDocument, NormalizedProfileProviderSettings,
    NormalizedProfileSettings, NormalizedProviderSettings, ProfileProviderDefaults, ProfileSource,
    ProfileVersion, RetryPolicyConfig, UsecaseDefaults, DEFAULT_MAX_CONTIGUOUS_RETRIES,
    DEFAULT_OPEN_TIME_MS, DEFAULT_REQUEST_TIMEOUT_MS,
};
use crate::error::PerformError;
use crate::security::SecurityValues;

#[derive(Debug, Deserialize, Default)]
struct RawDocument {
    #[serde(default)]
    profiles: Map<String, Value>,
    #[serde(default)]
    providers: Map<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawProfileSettings {
    version: Option<String>,
    file: Option<String>,
    #[serde(default)]
    priority: Vec<String>,
    #[serde(default)]
    defaults: BTreeMap<String, RawUsecaseDefaults>,
    #[serde(default)]
    providers: Map<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawUsecaseDefaults {
    #[serde(default)]
    input: Map<String, Value>,
    provider_failover: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawProfileProviderSettings {
    file: Option<String>,
    map_variant: Option<String>,
    map_revision: Option<String>,
    #[serde(default)]
    defaults: BTreeMap<String, RawProfileProviderDefaults>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawProfileProviderDefaults {
    #[serde(default)]
    input: Map<String, Value>,
    retry_policy: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct RawProviderSettings {
    file: Option<String>,
    #[serde(default)]
    security: Vec<SecurityValues>,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
}

/// Resolve `$NAME` against the process environment; unset names stay literal.
fn resolve_env(value: &str) -> String {
    let Some(name) = value.strip_prefix('$') else {
        return value.to_string();
    };
    match std::env::var(name) {
        Ok(resolved) => resolved,
        Err(_) => {
            log::warn!("environment variable {name} is not set; keeping literal value");
            value.to_string()
        }
    }
}

fn resolve_env_in_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.starts_with('$') {
                *s = resolve_env(s);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(resolve_env_in_value),
        Value::Object(map) => map.values_mut().for_each(resolve_env_in_value),
        _ => {}
    }
}

fn resolve_env_in_input(input: &mut Map<String, Value>) {
    input.values_mut().for_each(resolve_env_in_value);
}

fn is_file_uri(s: &str) -> bool {
    s.starts_with("file://")
}

fn parse<T: serde::de::DeserializeOwned>(what: &str, value: Value) -> Result<T, PerformError> {
    serde_json::from_value(value)
        .map_err(|e| PerformError::Config(format!("malformed {what}: {e}")))
}

fn normalize_retry_policy(raw: Option<&Value>) -> Result<RetryPolicyConfig, PerformError> {
    let Some(raw) = raw else {
        return Ok(RetryPolicyConfig::None);
    };

    let (kind, object) = match raw {
        Value::String(kind) => (kind.as_str(), None),
        Value::Object(object) => {
            let kind = object
                .get("kind")
                .and_then(Value::as_str)
                .ok_or_else(|| PerformError::Config("retry policy object requires a kind".to_string()))?;
            (kind, Some(object))
        }
        Value::Null => return Ok(RetryPolicyConfig::None),
        other => {
            return Err(PerformError::Config(format!(
                "retry policy must be a kind string or object, got: {other}"
            )))
        }
    };

    let u64_field = |name: &str, default: u64| -> Result<u64, PerformError> {
        match object.and_then(|o| o.get(name)) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value
                .as_u64()
                .ok_or_else(|| PerformError::Config(format!("retry policy {name} must be a number"))),
        }
    };
    let retries = u64_field("maxContiguousRetries", DEFAULT_MAX_CONTIGUOUS_RETRIES as u64)? as u32;
    let request_timeout = u64_field("requestTimeout", DEFAULT_REQUEST_TIMEOUT_MS)?;

    match kind {
        "none" => Ok(RetryPolicyConfig::None),
        "simple" => Ok(RetryPolicyConfig::Simple {
            max_contiguous_retries: retries,
            request_timeout,
        }),
        "circuit-breaker" => {
            let backoff = match object.and_then(|o| o.get("backoff")) {
                None | Some(Value::Null) => None,
                Some(value) => {
                    let defaults = ExponentialBackoffConfig::default();
                    let object = value.as_object().ok_or_else(|| {
                        PerformError::Config("retry policy backoff must be an object".to_string())
                    })?;
                    match object.get("kind").and_then(Value::as_str) {
                        Some("exponential") | None => {}
                        Some(other) => {
                            return Err(PerformError::Config(format!(
                                "unknown backoff kind: {other}"
                            )))
                        }
                    }
                    let start = match object.get("start") {
                        None | Some(Value::Null) => defaults.start,
                        Some(v) => v.as_u64().ok_or_else(|| {
                            PerformError::Config("backoff start must be a number".to_string())
                        })?,
                    };
                    let factor = match object.get("factor") {
                        None | Some(Value::Null) => defaults.factor,
                        Some(v) => v.as_f64().ok_or_else(|| {
                            PerformError::Config("backoff factor must be a number".to_string())
                        })?,
                    };
                    Some(ExponentialBackoffConfig { start, factor })
                }
            };
            Ok(RetryPolicyConfig::CircuitBreaker {
                max_contiguous_retries: retries,
                request_timeout,
                open_time: u64_field("openTime", DEFAULT_OPEN_TIME_MS)?,
                backoff,
            })
        }
        other => Err(PerformError::Config(format!("unknown retry policy kind: {other}"))),
    }
}

fn normalize_profile_provider(
    profile: &str,
    provider: &str,
    entry: Value,
) -> Result<NormalizedProfileProviderSettings, PerformError> {
    let raw: RawProfileProviderSettings = match entry {
        Value::String(uri) if is_file_uri(&uri) => {
            RawProfileProviderSettings { file: Some(uri), ..Default::default() }
        }
        Value::String(other) => {
            return Err(PerformError::Config(format!(
                "profile {profile} provider {provider} shorthand must be a file:// URI, got: {other}"
            )))
        }
        value => parse(&format!("provider entry {provider} of profile {profile}"), value)?,
    };

    let source = match (&raw.file, &raw.map_variant, &raw.map_revision) {
        (Some(file), None, None) => MapSource::File { file: file.clone() },
        (None, variant, revision) => MapSource::Registry {
            map_variant: variant.clone(),
            map_revision: revision.clone(),
        },
        (Some(_), _, _) => {
            return Err(PerformError::Config(format!(
                "profile {profile} provider {provider} must set either file or mapVariant/mapRevision, not both"
            )))
        }
    };

    let mut defaults = BTreeMap::new();
    for (usecase, raw_defaults) in raw.defaults {
        let mut input = raw_defaults.input;
        resolve_env_in_input(&mut input);
        defaults.insert(
            usecase,
            ProfileProviderDefaults {
                input,
                retry_policy: normalize_retry_policy(raw_defaults.retry_policy.as_ref())?,
            },
        );
    }

    Ok(NormalizedProfileProviderSettings { source, defaults })
}

fn normalize_profile(
    name: &str,
    entry: Value,
    top_level_order: &[String],
) -> Result<NormalizedProfileSettings, PerformError> {
    let raw: RawProfileSettings = match entry {
        Value::String(uri) if is_file_uri(&uri) => {
            RawProfileSettings { file: Some(uri), ..Default::default() }
        }
        Value::String(version) => {
            version.parse::<ProfileVersion>().map_err(|_| {
                PerformError::Config(format!(
                    "profile {name} entry must be a semver version or file:// URI, got: {version}"
                ))
            })?;
            RawProfileSettings { version: Some(version), ..Default::default() }
        }
        value => parse(&format!("profile entry {name}"), value)?,
    };

    let source = match (raw.version, raw.file) {
        (Some(version), None) => {
            version.parse::<ProfileVersion>().map_err(|_| {
                PerformError::Config(format!("profile {name} version is not semver: {version}"))
            })?;
            ProfileSource::Version { version }
        }
        (None, Some(file)) => ProfileSource::File { file },
        (Some(_), Some(_)) => {
            return Err(PerformError::Config(format!(
                "profile {name} must set either version or file, not both"
            )))
        }
        (None, None) => {
            return Err(PerformError::Config(format!(
                "profile {name} must set version or file"
            )))
        }
    };

    // Own providers' insertion order beats the inherited top-level order.
    let own_order: Vec<String> = raw.providers.keys().cloned().collect();
    let priority = if !raw.priority.is_empty() {
        raw.priority
    } else if !own_order.is_empty() {
        own_order
    } else {
        top_level_order.to_vec()
    };

    let mut defaults = BTreeMap::new();
    for (usecase, raw_defaults) in raw.defaults {
        let mut input = raw_defaults.input;
        resolve_env_in_input(&mut input);
        defaults.insert(
            usecase,
            UsecaseDefaults {
                input,
                provider_failover: raw_defaults.provider_failover.unwrap_or(false),
            },
        );
    }

    let mut providers = BTreeMap::new();
    for (provider, entry) in raw.providers {
        providers.insert(
            provider.clone(),
            normalize_profile_provider(name, &provider, entry)?,
        );
    }

    Ok(NormalizedProfileSettings { source, priority, defaults, providers })
}

fn normalize_provider(name: &str, entry: Value) -> Result<NormalizedProviderSettings, PerformError> {
    let raw: RawProviderSettings = match entry {
        Value::String(uri) if is_file_uri(&uri) => {
            RawProviderSettings { file: Some(uri), ..Default::default() }
        }
        Value::String(other) => {
            return Err(PerformError::Config(format!(
                "provider {name} shorthand must be a file:// URI, got: {other}"
            )))
        }
        value => parse(&format!("provider entry {name}"), value)?,
    };

    let mut security = raw.security;
    for values in &mut security {
        values.for_each_value_mut(|s| *s = resolve_env(s));
    }
    let parameters = raw
        .parameters
        .into_iter()
        .map(|(key, value)| (key, resolve_env(&value)))
        .collect();

    Ok(NormalizedProviderSettings { file: raw.file, security, parameters })
}

/// Normalize a raw configuration document into the canonical form.
pub fn normalize(document: &Value) -> Result<NormalizedDocument, PerformError> {
    let raw: RawDocument = parse("configuration document", document.clone())?;

    let top_level_order: Vec<String> = raw.providers.keys().cloned().collect();

    let mut providers = BTreeMap::new();
    for (name, entry) in raw.providers {
        providers.insert(name.clone(), normalize_provider(&name, entry)?);
    }

    let mut profiles = BTreeMap::new();
    for (name, entry) in raw.profiles {
        let settings = normalize_profile(&name, entry, &top_level_order)?;

        for provider in settings.priority.iter().chain(settings.providers.keys()) {
            if !providers.contains_key(provider) {
                return Err(PerformError::Config(format!(
                    "profile {name} references provider {provider} which is not configured under providers"
                )));
            }
        }

        profiles.insert(name, settings);
    }

    Ok(NormalizedDocument { profiles, providers })
}
