//! Binding: resolving documents into an immutable invocable
//!
//! A bind takes the (profile, provider) configurations and produces a
//! [`BoundProfileProvider`]: profile AST + map AST + provider definition +
//! resolved security + integration parameters, frozen for the lifetime of
//! one cache entry. Documents are accepted inline, from `file://`
//! references, or from the registry; binding never re-parses source text.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{MapDocument, ProfileDocument, ProviderJson};
use crate::config::{
    MapSource, NormalizedProfileSettings, NormalizedProviderSettings, ProfileSource,
};
use crate::error::PerformError;
use crate::registry::{BindRequest, RegistryClient};
use crate::security::{resolve_security, SecurityConfiguration};

/// An immutable (profile, map, provider) triple ready to execute.
#[derive(Debug, Clone)]
pub struct BoundProfileProvider {
    pub profile: ProfileDocument,
    pub map: MapDocument,
    pub provider: ProviderJson,
    pub security: Vec<SecurityConfiguration>,
    /// Integration parameters: provider-document defaults overlaid with the
    /// configured values.
    pub parameters: BTreeMap<String, String>,
}

impl BoundProfileProvider {
    /// Base URL of the provider's default service.
    pub fn default_service_url(&self) -> Option<&str> {
        self.provider.service_url(None)
    }
}

/// Cache key of a bound provider: both configurations' identities.
pub fn bound_cache_key(
    profile_id: &str,
    profile: &NormalizedProfileSettings,
    provider_name: &str,
    provider: &NormalizedProviderSettings,
) -> String {
    format!("{profile_id}|{}#{provider_name}|{}", profile.cache_key(), provider.cache_key())
}

fn load_json_file<T: serde::de::DeserializeOwned>(uri: &str, what: &str) -> Result<T, PerformError> {
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    let content = std::fs::read_to_string(path)
        .map_err(|e| PerformError::Bind(format!("failed to read {what} at {path}: {e}")))?;
    serde_json::from_str(&content)
        .map_err(|e| PerformError::Bind(format!("invalid {what} at {path}: {e}")))
}

/// Resolves documents for the executor. Inline documents win over files,
/// files win over the registry.
pub struct Binder {
    registry: std::sync::Arc<dyn RegistryClient>,
    inline_profiles: HashMap<String, ProfileDocument>,
    inline_maps: HashMap<(String, String), MapDocument>,
    inline_providers: HashMap<String, ProviderJson>,
}

impl Binder {
    pub fn new(
        registry: std::sync::Arc<dyn RegistryClient>,
        inline_profiles: HashMap<String, ProfileDocument>,
        inline_maps: HashMap<(String, String), MapDocument>,
        inline_providers: HashMap<String, ProviderJson>,
    ) -> Self {
        Self { registry, inline_profiles, inline_maps, inline_providers }
    }

    fn resolve_profile(
        &self,
        profile_id: &str,
        source: &ProfileSource,
    ) -> Result<ProfileDocument, PerformError> {
        if let Some(document) = self.inline_profiles.get(profile_id) {
            return Ok(document.clone());
        }
        match source {
            ProfileSource::File { file } => load_json_file(file, "profile document"),
            ProfileSource::Version { version } => Err(PerformError::Bind(format!(
                "profile document {profile_id}@{version} is not available; provide it inline or as a file"
            ))),
        }
    }

    pub async fn bind(
        &self,
        profile_id: &str,
        profile_settings: &NormalizedProfileSettings,
        provider_name: &str,
        provider_settings: &NormalizedProviderSettings,
    ) -> Result<BoundProfileProvider, PerformError> {
        let profile = self.resolve_profile(profile_id, &profile_settings.source)?;
        if let ProfileSource::Version { version } = &profile_settings.source {
            if &profile.version != version {
                return Err(PerformError::Bind(format!(
                    "profile {profile_id} is configured at {version} but the document is {}",
                    profile.version
                )));
            }
        }

        let map_source = profile_settings
            .providers
            .get(provider_name)
            .map(|p| p.source.clone())
            .unwrap_or(MapSource::Registry { map_variant: None, map_revision: None });

        let inline_map =
            self.inline_maps.get(&(profile_id.to_string(), provider_name.to_string()));

        // Provider definition delivered alongside a registry map.
        let mut bound_provider_doc: Option<ProviderJson> = None;

        let map: MapDocument = if let Some(map) = inline_map {
            map.clone()
        } else {
            match &map_source {
                MapSource::File { file } => load_json_file(file, "map document")?,
                MapSource::Registry { map_variant, map_revision } => {
                    if provider_settings.file.is_some() {
                        return Err(PerformError::Config(format!(
                            "provider {provider_name} is configured from a local file but its map for {profile_id} comes from the registry"
                        )));
                    }
                    let response = self
                        .registry
                        .fetch_bind(BindRequest {
                            profile_id: profile_id.to_string(),
                            version: profile.version.clone(),
                            provider: provider_name.to_string(),
                            map_variant: map_variant.clone(),
                            map_revision: map_revision.clone(),
                        })
                        .await?;
                    let map = response.map_ast.ok_or_else(|| {
                        PerformError::Bind(format!(
                            "registry did not return a map for {profile_id} with provider {provider_name}"
                        ))
                    })?;
                    bound_provider_doc = Some(response.provider);
                    map
                }
            }
        };

        let provider: ProviderJson = if let Some(document) = self.inline_providers.get(provider_name)
        {
            document.clone()
        } else if let Some(file) = &provider_settings.file {
            load_json_file(file, "provider definition")?
        } else if let Some(document) = bound_provider_doc {
            document
        } else {
            self.registry.fetch_provider_info(provider_name).await?
        };

        if map.provider != provider_name {
            return Err(PerformError::Bind(format!(
                "provider name mismatch: the map is for {} but the configuration selected {provider_name}",
                map.provider
            )));
        }
        let map_profile_id = map.profile.split('@').next().unwrap_or(&map.profile);
        if map_profile_id != profile_id {
            return Err(PerformError::Bind(format!(
                "profile mismatch: the map implements {map_profile_id} but {profile_id} was requested"
            )));
        }
        if provider.name != provider_name {
            return Err(PerformError::Bind(format!(
                "provider name mismatch: the provider definition is {} but the configuration selected {provider_name}",
                provider.name
            )));
        }

        let security = resolve_security(&provider.security_schemes, &provider_settings.security)?;

        let mut parameters: BTreeMap<String, String> = provider
            .parameters
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect();
        for (name, value) in &provider_settings.parameters {
            parameters.insert(name.clone(), value.clone());
        }

        Ok(BoundProfileProvider { profile, map, provider, security, parameters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::UseCaseDefinition;
    use crate::registry::BindResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubRegistry {
        bind_calls: AtomicUsize,
        map: Option<MapDocument>,
        provider: ProviderJson,
    }

    #[async_trait]
    impl RegistryClient for StubRegistry {
        async fn fetch_bind(&self, _request: BindRequest) -> Result<BindResponse, PerformError> {
            self.bind_calls.fetch_add(1, Ordering::SeqCst);
            Ok(BindResponse { provider: self.provider.clone(), map_ast: self.map.clone() })
        }

        async fn fetch_map_source(&self, _map_id: &str) -> Result<String, PerformError> {
            Err(PerformError::Bind("no source".to_string()))
        }

        async fn fetch_provider_info(&self, _provider: &str) -> Result<ProviderJson, PerformError> {
            Ok(self.provider.clone())
        }
    }

    fn profile_doc() -> ProfileDocument {
        ProfileDocument {
            id: "scope/profile".to_string(),
            version: "1.0.0".to_string(),
            usecases: vec![UseCaseDefinition { name: "Test".to_string(), input: None, result: None }],
        }
    }

    fn map_doc(provider: &str) -> MapDocument {
        serde_json::from_value(serde_json::json!({
            "profile": "scope/profile@1.0",
            "provider": provider,
            "usecases": {"Test": {}}
        }))
        .unwrap()
    }

    fn provider_doc(name: &str) -> ProviderJson {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "services": [{"id": "default", "baseUrl": "https://api.test"}],
            "defaultService": "default",
            "securitySchemes": [],
            "parameters": [{"name": "tenant", "default": "main"}]
        }))
        .unwrap()
    }

    fn settings() -> NormalizedProfileSettings {
        NormalizedProfileSettings {
            source: ProfileSource::Version { version: "1.0.0".to_string() },
            priority: vec!["acme".to_string()],
            defaults: BTreeMap::new(),
            providers: BTreeMap::new(),
        }
    }

    fn binder_with(
        registry: StubRegistry,
        profile: Option<ProfileDocument>,
        map: Option<MapDocument>,
        provider: Option<ProviderJson>,
    ) -> Binder {
        let mut profiles = HashMap::new();
        if let Some(p) = profile {
            profiles.insert("scope/profile".to_string(), p);
        }
        let mut maps = HashMap::new();
        if let Some(m) = map {
            maps.insert(("scope/profile".to_string(), "acme".to_string()), m);
        }
        let mut providers = HashMap::new();
        if let Some(p) = provider {
            providers.insert("acme".to_string(), p);
        }
        Binder::new(Arc::new(registry), profiles, maps, providers)
    }

    fn stub_registry() -> StubRegistry {
        StubRegistry {
            bind_calls: AtomicUsize::new(0),
            map: Some(map_doc("acme")),
            provider: provider_doc("acme"),
        }
    }

    #[tokio::test]
    async fn binds_inline_documents_without_registry() {
        let registry = stub_registry();
        let binder = binder_with(
            registry,
            Some(profile_doc()),
            Some(map_doc("acme")),
            Some(provider_doc("acme")),
        );

        let bound = binder
            .bind("scope/profile", &settings(), "acme", &NormalizedProviderSettings::default())
            .await
            .unwrap();

        assert_eq!(bound.map.provider, "acme");
        assert_eq!(bound.default_service_url(), Some("https://api.test"));
        assert_eq!(bound.parameters["tenant"], "main");
    }

    #[tokio::test]
    async fn registry_bind_supplies_map_and_provider() {
        let binder = binder_with(stub_registry(), Some(profile_doc()), None, None);

        let bound = binder
            .bind("scope/profile", &settings(), "acme", &NormalizedProviderSettings::default())
            .await
            .unwrap();
        assert_eq!(bound.provider.name, "acme");
        assert_eq!(bound.map.profile, "scope/profile@1.0");
    }

    #[tokio::test]
    async fn missing_profile_document_is_a_bind_error() {
        let binder = binder_with(stub_registry(), None, None, None);
        let err = binder
            .bind("scope/profile", &settings(), "acme", &NormalizedProviderSettings::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("provide it inline or as a file"));
    }

    #[tokio::test]
    async fn profile_version_mismatch_is_a_bind_error() {
        let mut document = profile_doc();
        document.version = "2.0.0".to_string();
        let binder = binder_with(stub_registry(), Some(document), None, None);
        let err = binder
            .bind("scope/profile", &settings(), "acme", &NormalizedProviderSettings::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("configured at 1.0.0"));
    }

    #[tokio::test]
    async fn map_provider_mismatch_is_a_bind_error() {
        let binder = binder_with(
            stub_registry(),
            Some(profile_doc()),
            Some(map_doc("other")),
            Some(provider_doc("acme")),
        );
        let err = binder
            .bind("scope/profile", &settings(), "acme", &NormalizedProviderSettings::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("provider name mismatch"));
    }

    #[tokio::test]
    async fn local_provider_with_registry_map_is_a_config_error() {
        let binder = binder_with(stub_registry(), Some(profile_doc()), None, None);
        let provider_settings = NormalizedProviderSettings {
            file: Some("file://acme.provider.json".to_string()),
            ..Default::default()
        };
        let err = binder
            .bind("scope/profile", &settings(), "acme", &provider_settings)
            .await
            .unwrap_err();
        assert!(matches!(err, PerformError::Config(_)));
        assert!(err.to_string().contains("local file"));
    }

    #[tokio::test]
    async fn configured_parameters_override_document_defaults() {
        let registry = stub_registry();
        let binder = binder_with(
            registry,
            Some(profile_doc()),
            Some(map_doc("acme")),
            Some(provider_doc("acme")),
        );
        let provider_settings = NormalizedProviderSettings {
            parameters: [("tenant".to_string(), "eu".to_string())].into_iter().collect(),
            ..Default::default()
        };

        let bound = binder
            .bind("scope/profile", &settings(), "acme", &provider_settings)
            .await
            .unwrap();
        assert_eq!(bound.parameters["tenant"], "eu");
    }

    #[tokio::test]
    async fn missing_registry_map_is_a_bind_error() {
        let registry = StubRegistry {
            bind_calls: AtomicUsize::new(0),
            map: None,
            provider: provider_doc("acme"),
        };
        let binder = binder_with(registry, Some(profile_doc()), None, None);
        let err = binder
            .bind("scope/profile", &settings(), "acme", &NormalizedProviderSettings::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not return a map"));
    }
}
