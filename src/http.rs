//! HTTP request stage
//!
//! Maps describe requests declaratively; this stage turns a [`FetchRequest`]
//! into a real call: URL composition with path-variable interpolation,
//! query/header/body encoding, security application, a per-attempt timeout,
//! and response shaping. Every fetch is wrapped by the pre-fetch/post-fetch
//! hooks of the event bus, and non-2xx statuses surface as HTTP errors the
//! map interpreter may choose to handle.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine as _;
use serde_json::Value;

use crate::error::{HttpCallError, PerformError, RequestSnapshot};
use crate::events::{EventBus, FetchResult, PerformContext};
use crate::security::{ApiKeyPlacement, SecurityConfiguration};

pub const JSON_CONTENT: &str = "application/json";
pub const URLENCODED_CONTENT: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_CONTENT: &str = "multipart/form-data";

/// One declarative HTTP request produced by a map.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// HTTP method name, case-insensitive.
    pub method: String,
    /// Absolute URL, or a path relative to `base_url`. `{name}` segments are
    /// replaced from `path_parameters` (dotted paths allowed).
    pub url: String,
    pub base_url: Option<String>,
    /// Caller headers in insertion order; security may append more.
    pub headers: Vec<(String, String)>,
    /// Caller query parameters in insertion order; security may append more.
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub path_parameters: Value,
    /// Ids of the security configurations to apply.
    pub security_requirements: Vec<String>,
    pub request_timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self { method: method.into(), url: url.into(), ..Default::default() }
    }
}

/// Shaped response handed back to the map interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON when the content type (or the request accept) says JSON,
    /// otherwise the raw text.
    pub body: Value,
    /// Snapshot of the request that produced this response.
    pub debug: RequestSnapshot,
}

fn lookup<'a>(parameters: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = parameters;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace `{name}` segments in `url` from `parameters`.
///
/// Missing names are fatal; the diagnostic lists every missing key, every
/// key that did resolve, and the variables that were available.
fn interpolate_url(url: &str, parameters: &Value) -> Result<String, PerformError> {
    let mut output = String::with_capacity(url.len());
    let mut missing = Vec::new();
    let mut found = Vec::new();
    let mut rest = url;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            PerformError::InvalidRequest(format!("unterminated path variable in url: {url}"))
        })?;
        let name = &after[..close];
        match lookup(parameters, name) {
            Some(value) => {
                output.push_str(&stringify(value));
                found.push(name.to_string());
            }
            None => missing.push(name.to_string()),
        }
        rest = &after[close + 1..];
    }
    output.push_str(rest);

    if !missing.is_empty() {
        let available: Vec<String> = parameters
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        return Err(PerformError::InvalidRequest(format!(
            "missing values for url path replacement: {}\nfound: {}\navailable variables: {}",
            missing.join(", "),
            found.join(", "),
            available.join(", "),
        )));
    }

    Ok(output)
}

/// Join a relative path onto a base URL and interpolate path variables.
fn compose_url(request: &FetchRequest) -> Result<reqwest::Url, PerformError> {
    let raw = if request.url.starts_with('/') && !request.url.starts_with("//") {
        let base = request.base_url.as_deref().ok_or_else(|| {
            PerformError::InvalidRequest(format!(
                "relative url {} requires a base url",
                request.url
            ))
        })?;
        format!("{}{}", base.trim_end_matches('/'), request.url)
    } else {
        request.url.clone()
    };

    let interpolated = interpolate_url(&raw, &request.path_parameters)?;
    let mut url = reqwest::Url::parse(&interpolated)
        .map_err(|e| PerformError::InvalidRequest(format!("invalid url {interpolated}: {e}")))?;

    if !request.query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in &request.query {
            pairs.append_pair(name, value);
        }
    }

    Ok(url)
}

/// Inject the requested security configurations into the request.
fn apply_security(
    request: &mut FetchRequest,
    configurations: &[SecurityConfiguration],
) -> Result<(), PerformError> {
    for id in request.security_requirements.clone() {
        let configuration =
            configurations.iter().find(|c| c.id() == id).ok_or_else(|| {
                PerformError::Config(format!(
                    "security configuration not found for requirement: {id}"
                ))
            })?;

        match configuration {
            SecurityConfiguration::ApiKey { placement, name, apikey, .. } => match placement {
                ApiKeyPlacement::Header => {
                    request.headers.push((name.clone(), apikey.clone()));
                }
                ApiKeyPlacement::Query => {
                    request.query.push((name.clone(), apikey.clone()));
                }
                ApiKeyPlacement::Path => {
                    if !request.path_parameters.is_object() {
                        request.path_parameters = Value::Object(serde_json::Map::new());
                    }
                    request.path_parameters[name.as_str()] = Value::String(apikey.clone());
                }
                ApiKeyPlacement::Body => match request.body.as_mut() {
                    Some(Value::Object(object)) => {
                        object.insert(name.clone(), Value::String(apikey.clone()));
                    }
                    None => {
                        let mut object = serde_json::Map::new();
                        object.insert(name.clone(), Value::String(apikey.clone()));
                        request.body = Some(Value::Object(object));
                    }
                    Some(_) => {
                        return Err(PerformError::InvalidRequest(format!(
                            "api key {id} is placed in the body, which requires an object body"
                        )))
                    }
                },
            },
            SecurityConfiguration::Basic { username, password, .. } => {
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                request.headers.push(("Authorization".to_string(), format!("Basic {credentials}")));
            }
            SecurityConfiguration::Bearer { token, .. } => {
                request.headers.push(("Authorization".to_string(), format!("Bearer {token}")));
            }
            // The digest value is an already-obtained Authorization credential.
            SecurityConfiguration::Digest { digest, .. } => {
                request.headers.push(("Authorization".to_string(), digest.clone()));
            }
        }
    }

    Ok(())
}

fn form_pairs(body: &Value, content: &str) -> Result<Vec<(String, String)>, PerformError> {
    let object = body.as_object().ok_or_else(|| {
        PerformError::InvalidRequest(format!("{content} body must be an object"))
    })?;
    Ok(object.iter().map(|(name, value)| (name.clone(), stringify(value))).collect())
}

/// The transport owned by the runtime; every map fetch flows through here.
pub struct HttpClient {
    client: reqwest::Client,
    bus: std::sync::Arc<EventBus>,
}

impl HttpClient {
    pub fn new(bus: std::sync::Arc<EventBus>) -> Result<Self, PerformError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PerformError::Unexpected(format!("failed to build http client: {e}")))?;
        Ok(Self { client, bus })
    }

    /// Execute one declarative request, wrapped by the fetch hooks.
    pub async fn fetch(
        &self,
        context: &PerformContext,
        request: FetchRequest,
        security: &[SecurityConfiguration],
    ) -> FetchResult {
        self.bus
            .wrapped_fetch(context, request, |request| self.fetch_once(context, request, security))
            .await
    }

    async fn fetch_once(
        &self,
        context: &PerformContext,
        mut request: FetchRequest,
        security: &[SecurityConfiguration],
    ) -> FetchResult {
        apply_security(&mut request, security)?;
        let url = compose_url(&request)?;

        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| {
                PerformError::InvalidRequest(format!("invalid http method: {}", request.method))
            })?;

        let needs_content_type = method == reqwest::Method::POST
            || method == reqwest::Method::PUT
            || method == reqwest::Method::PATCH;
        if needs_content_type && request.body.is_some() && request.content_type.is_none() {
            return Err(PerformError::InvalidRequest(format!(
                "{} requests with a body require a content type",
                method
            )));
        }

        let mut builder = self.client.request(method.clone(), url.clone());
        if let Some(timeout) = request.request_timeout {
            builder = builder.timeout(timeout);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(accept) = &request.accept {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }

        if let Some(body) = &request.body {
            match request.content_type.as_deref() {
                Some(content) if content.starts_with(JSON_CONTENT) => {
                    builder = builder.json(body);
                }
                Some(content) if content.starts_with(URLENCODED_CONTENT) => {
                    builder = builder.form(&form_pairs(body, URLENCODED_CONTENT)?);
                }
                Some(content) if content.starts_with(MULTIPART_CONTENT) => {
                    let mut form = reqwest::multipart::Form::new();
                    for (name, value) in form_pairs(body, MULTIPART_CONTENT)? {
                        form = form.text(name, value);
                    }
                    builder = builder.multipart(form);
                }
                Some(other) => {
                    return Err(PerformError::InvalidRequest(format!(
                        "unsupported content type: {other}"
                    )))
                }
                // Bodies on methods outside the content-type rule go out as JSON.
                None => builder = builder.json(body),
            }
        }

        let snapshot = RequestSnapshot {
            url: url.to_string(),
            method: method.to_string(),
            headers: request.headers.iter().cloned().collect(),
            body: request.body.clone(),
        };

        log::debug!("{} {}", snapshot.method, snapshot.url);

        let response = tokio::select! {
            _ = context.cancellation.cancelled() => return Err(PerformError::Cancelled),
            response = builder.send() => response?,
        };

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let json_response = headers
            .get("content-type")
            .map(|c| c.contains(JSON_CONTENT))
            .unwrap_or(false)
            || request.accept.as_deref().map(|a| a.contains("json")).unwrap_or(false);

        let text = tokio::select! {
            _ = context.cancellation.cancelled() => return Err(PerformError::Cancelled),
            text = response.text() => text?,
        };
        let body = if text.is_empty() {
            Value::Null
        } else if json_response {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        if !(200..300).contains(&status) {
            log::warn!("{} {} failed with status {}", snapshot.method, snapshot.url, status);
            return Err(PerformError::Http(HttpCallError {
                status_code: status,
                request: snapshot,
                response_headers: headers,
                response_body: if body.is_null() { None } else { Some(body) },
            }));
        }

        Ok(HttpResponse { status, headers, body, debug: snapshot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{ApiKeyPlacement, SecurityConfiguration};

    #[test]
    fn relative_url_joins_base_and_strips_trailing_slashes() {
        let mut request = FetchRequest::new("GET", "/people/1");
        request.base_url = Some("https://swapi.dev/api/".to_string());
        let url = compose_url(&request).unwrap();
        assert_eq!(url.as_str(), "https://swapi.dev/api/people/1");
    }

    #[test]
    fn relative_url_without_base_is_an_error() {
        let request = FetchRequest::new("GET", "/people/1");
        let err = compose_url(&request).unwrap_err();
        assert!(err.to_string().contains("requires a base url"));
    }

    #[test]
    fn path_variables_resolve_dotted_paths() {
        let mut request = FetchRequest::new("GET", "https://api.test/users/{user.id}/items/{item}");
        request.path_parameters = serde_json::json!({
            "user": {"id": 42},
            "item": "abc"
        });
        let url = compose_url(&request).unwrap();
        assert_eq!(url.as_str(), "https://api.test/users/42/items/abc");
    }

    #[test]
    fn missing_path_variables_list_missing_found_and_available() {
        let mut request = FetchRequest::new("GET", "https://api.test/{a}/{b}/{c}");
        request.path_parameters = serde_json::json!({"b": "ok", "other": 1});
        let err = compose_url(&request).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("missing values for url path replacement: a, c"));
        assert!(message.contains("found: b"));
        assert!(message.contains("available variables: b, other"));
    }

    #[test]
    fn query_parameters_keep_caller_order_then_auth() {
        let mut request = FetchRequest::new("GET", "https://api.test/search");
        request.query = vec![
            ("q".to_string(), "a b".to_string()),
            ("page".to_string(), "2".to_string()),
        ];
        request.security_requirements = vec!["key".to_string()];
        apply_security(
            &mut request,
            &[SecurityConfiguration::ApiKey {
                id: "key".to_string(),
                placement: ApiKeyPlacement::Query,
                name: "api_key".to_string(),
                apikey: "secret".to_string(),
            }],
        )
        .unwrap();

        let url = compose_url(&request).unwrap();
        assert_eq!(url.query(), Some("q=a+b&page=2&api_key=secret"));
    }

    #[test]
    fn basic_auth_encodes_credentials() {
        let mut request = FetchRequest::new("GET", "https://api.test/");
        request.security_requirements = vec!["basic".to_string()];
        apply_security(
            &mut request,
            &[SecurityConfiguration::Basic {
                id: "basic".to_string(),
                username: "user".to_string(),
                password: "pass".to_string(),
            }],
        )
        .unwrap();

        // base64("user:pass")
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Basic dXNlcjpwYXNz".to_string())]
        );
    }

    #[test]
    fn bearer_and_header_apikey_append_headers() {
        let mut request = FetchRequest::new("GET", "https://api.test/");
        request.security_requirements = vec!["bearer".to_string(), "key".to_string()];
        apply_security(
            &mut request,
            &[
                SecurityConfiguration::Bearer { id: "bearer".to_string(), token: "tok".to_string() },
                SecurityConfiguration::ApiKey {
                    id: "key".to_string(),
                    placement: ApiKeyPlacement::Header,
                    name: "X-API-Key".to_string(),
                    apikey: "secret".to_string(),
                },
            ],
        )
        .unwrap();

        assert_eq!(
            request.headers,
            vec![
                ("Authorization".to_string(), "Bearer tok".to_string()),
                ("X-API-Key".to_string(), "secret".to_string()),
            ]
        );
    }

    #[test]
    fn body_apikey_requires_object_body() {
        let mut request = FetchRequest::new("POST", "https://api.test/");
        request.body = Some(serde_json::json!([1, 2]));
        request.security_requirements = vec!["key".to_string()];
        let err = apply_security(
            &mut request,
            &[SecurityConfiguration::ApiKey {
                id: "key".to_string(),
                placement: ApiKeyPlacement::Body,
                name: "token".to_string(),
                apikey: "secret".to_string(),
            }],
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires an object body"));
    }

    #[test]
    fn body_apikey_inserts_into_object() {
        let mut request = FetchRequest::new("POST", "https://api.test/");
        request.body = Some(serde_json::json!({"existing": true}));
        request.security_requirements = vec!["key".to_string()];
        apply_security(
            &mut request,
            &[SecurityConfiguration::ApiKey {
                id: "key".to_string(),
                placement: ApiKeyPlacement::Body,
                name: "token".to_string(),
                apikey: "secret".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(
            request.body,
            Some(serde_json::json!({"existing": true, "token": "secret"}))
        );
    }

    #[test]
    fn path_apikey_adds_path_parameter() {
        let mut request = FetchRequest::new("GET", "https://api.test/{token}/data");
        request.security_requirements = vec!["key".to_string()];
        apply_security(
            &mut request,
            &[SecurityConfiguration::ApiKey {
                id: "key".to_string(),
                placement: ApiKeyPlacement::Path,
                name: "token".to_string(),
                apikey: "secret".to_string(),
            }],
        )
        .unwrap();
        let url = compose_url(&request).unwrap();
        assert_eq!(url.as_str(), "https://api.test/secret/data");
    }

    #[test]
    fn missing_security_configuration_fails_before_sending() {
        let mut request = FetchRequest::new("GET", "https://api.test/");
        request.security_requirements = vec!["ghost".to_string()];
        let err = apply_security(&mut request, &[]).unwrap_err();
        assert!(err.to_string().contains("security configuration not found for requirement: ghost"));
        assert!(matches!(err, PerformError::Config(_)));
    }

    #[test]
    fn digest_value_is_applied_verbatim() {
        let mut request = FetchRequest::new("GET", "https://api.test/");
        request.security_requirements = vec!["digest".to_string()];
        apply_security(
            &mut request,
            &[SecurityConfiguration::Digest {
                id: "digest".to_string(),
                digest: "Digest username=\"u\", response=\"abc\"".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(request.headers[0].0, "Authorization");
        assert!(request.headers[0].1.starts_with("Digest "));
    }

    #[test]
    fn non_string_path_values_are_json_encoded() {
        let mut request = FetchRequest::new("GET", "https://api.test/{flag}/{count}");
        request.path_parameters = serde_json::json!({"flag": true, "count": 7});
        let url = compose_url(&request).unwrap();
        assert_eq!(url.as_str(), "https://api.test/true/7");
    }
}
