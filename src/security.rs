//! Security schemes and credential resolution
//!
//! A provider document declares security schemes; the configuration supplies
//! values for them. Resolution pairs the two by id into
//! [`SecurityConfiguration`]s ready to be applied to outgoing requests by the
//! HTTP stage.

use serde::{Deserialize, Serialize};

use crate::error::PerformError;

/// Where an api key is injected into the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyPlacement {
    Header,
    Body,
    Query,
    Path,
}

/// HTTP authentication flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpScheme {
    Basic,
    Bearer,
    Digest,
}

/// Security scheme declared by a provider document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SecurityScheme {
    #[serde(rename = "apiKey")]
    ApiKey {
        id: String,
        #[serde(rename = "in")]
        placement: ApiKeyPlacement,
        name: String,
    },
    #[serde(rename = "http")]
    Http { id: String, scheme: HttpScheme },
}

impl SecurityScheme {
    pub fn id(&self) -> &str {
        match self {
            SecurityScheme::ApiKey { id, .. } | SecurityScheme::Http { id, .. } => id,
        }
    }

    fn expected_values(&self) -> &'static str {
        match self {
            SecurityScheme::ApiKey { .. } => "{apikey}",
            SecurityScheme::Http { scheme: HttpScheme::Basic, .. } => "{username, password}",
            SecurityScheme::Http { scheme: HttpScheme::Bearer, .. } => "{token}",
            SecurityScheme::Http { scheme: HttpScheme::Digest, .. } => "{digest}",
        }
    }
}

/// User-supplied credential values, keyed by scheme id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecurityValues {
    ApiKey { id: String, apikey: String },
    Basic { id: String, username: String, password: String },
    Bearer { id: String, token: String },
    Digest { id: String, digest: String },
}

impl SecurityValues {
    pub fn id(&self) -> &str {
        match self {
            SecurityValues::ApiKey { id, .. }
            | SecurityValues::Basic { id, .. }
            | SecurityValues::Bearer { id, .. }
            | SecurityValues::Digest { id, .. } => id,
        }
    }

    /// Visit every credential string mutably (env substitution hook).
    pub fn for_each_value_mut(&mut self, mut f: impl FnMut(&mut String)) {
        match self {
            SecurityValues::ApiKey { apikey, .. } => f(apikey),
            SecurityValues::Basic { username, password, .. } => {
                f(username);
                f(password);
            }
            SecurityValues::Bearer { token, .. } => f(token),
            SecurityValues::Digest { digest, .. } => f(digest),
        }
    }
}

/// A scheme matched with its values, ready to apply to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityConfiguration {
    ApiKey { id: String, placement: ApiKeyPlacement, name: String, apikey: String },
    Basic { id: String, username: String, password: String },
    Bearer { id: String, token: String },
    /// Digest carries an already-obtained `Authorization` credential; the
    /// challenge handshake is a concern of whatever produced the value.
    Digest { id: String, digest: String },
}

impl SecurityConfiguration {
    pub fn id(&self) -> &str {
        match self {
            SecurityConfiguration::ApiKey { id, .. }
            | SecurityConfiguration::Basic { id, .. }
            | SecurityConfiguration::Bearer { id, .. }
            | SecurityConfiguration::Digest { id, .. } => id,
        }
    }
}

/// Match supplied values against declared schemes.
///
/// Every values entry must name an existing scheme of a compatible kind;
/// anything else is a hard configuration error.
pub fn resolve_security(
    schemes: &[SecurityScheme],
    values: &[SecurityValues],
) -> Result<Vec<SecurityConfiguration>, PerformError> {
    let mut resolved = Vec::with_capacity(values.len());

    for value in values {
        let scheme = schemes.iter().find(|s| s.id() == value.id()).ok_or_else(|| {
            PerformError::Config(format!("security scheme not found: {}", value.id()))
        })?;

        let configuration = match (scheme, value) {
            (
                SecurityScheme::ApiKey { id, placement, name },
                SecurityValues::ApiKey { apikey, .. },
            ) => SecurityConfiguration::ApiKey {
                id: id.clone(),
                placement: *placement,
                name: name.clone(),
                apikey: apikey.clone(),
            },
            (
                SecurityScheme::Http { id, scheme: HttpScheme::Basic },
                SecurityValues::Basic { username, password, .. },
            ) => SecurityConfiguration::Basic {
                id: id.clone(),
                username: username.clone(),
                password: password.clone(),
            },
            (
                SecurityScheme::Http { id, scheme: HttpScheme::Bearer },
                SecurityValues::Bearer { token, .. },
            ) => SecurityConfiguration::Bearer { id: id.clone(), token: token.clone() },
            (
                SecurityScheme::Http { id, scheme: HttpScheme::Digest },
                SecurityValues::Digest { digest, .. },
            ) => SecurityConfiguration::Digest { id: id.clone(), digest: digest.clone() },
            (scheme, _) => {
                return Err(PerformError::Config(format!(
                    "invalid security values for scheme {}: expected {}",
                    scheme.id(),
                    scheme.expected_values()
                )))
            }
        };

        resolved.push(configuration);
    }

    Ok(resolved)
}

/// Merge base security values with per-call overrides.
///
/// Merged by id, override wins on collision; order is left-to-right first
/// appearance across base then overrides.
pub fn merge_security(base: &[SecurityValues], overrides: &[SecurityValues]) -> Vec<SecurityValues> {
    let mut merged: Vec<SecurityValues> = Vec::with_capacity(base.len() + overrides.len());

    for value in base {
        let effective = overrides.iter().find(|o| o.id() == value.id()).unwrap_or(value);
        merged.push(effective.clone());
    }
    for value in overrides {
        if !merged.iter().any(|m| m.id() == value.id()) {
            merged.push(value.clone());
        }
    }

    merged
}
