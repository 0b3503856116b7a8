//! Use-case executor
//!
//! [`UseCaseRuntime`] is the embedding surface: it owns the normalized
//! configuration, the event bus, the bound-provider cache, and the failover
//! routers, and exposes a single `perform` operation. A perform selects a
//! provider, binds (resolving documents and security), composes and
//! validates input, hands the map to the interpreter, and validates the
//! result; the whole flow is wrapped by the bus so the router governs
//! retries, backoff, and provider switches.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::ast::{MapDocument, ProfileDocument, ProviderJson};
use crate::bind::{bound_cache_key, Binder, BoundProfileProvider};
use crate::cache::ExpiringCache;
use crate::cancel::Cancellation;
use crate::config::{self, NormalizedDocument, NormalizedProfileSettings};
use crate::error::PerformError;
use crate::events::{EventBus, EventFilter, PerformArgs, PerformContext, PerformHook};
use crate::http::HttpClient;
use crate::interpret::{InterpretParams, MapInterpreter, UnconfiguredInterpreter};
use crate::logging::{LoggingHook, LOGGING_HOOK_PRIORITY};
use crate::policy::{policy_from_config, FailoverRouter, ROUTER_HOOK_PRIORITY};
use crate::profile::Profile;
use crate::registry::{HttpRegistryClient, RegistryClient, DEFAULT_REGISTRY_URL};
use crate::security::{merge_security, resolve_security, SecurityValues};
use crate::time::{Clock, MonotonicClock, Sleeper, TokioSleeper};
use crate::validate::{AcceptAllValidator, Validator};

/// How long a bound provider stays usable before a rebind.
pub const DEFAULT_BOUND_PROVIDER_TTL: Duration = Duration::from_secs(3600);

/// Per-call options for [`UseCaseRuntime::perform`].
#[derive(Debug, Clone, Default)]
pub struct PerformOptions {
    /// Pin a provider; pinning disables failover for this call.
    pub provider: Option<String>,
    /// Security values merged over the provider's configured ones.
    pub security: Vec<SecurityValues>,
    /// Integration parameters merged over the bound ones.
    pub parameters: BTreeMap<String, String>,
    pub cancellation: Cancellation,
}

impl PerformOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_security(mut self, values: Vec<SecurityValues>) -> Self {
        self.security = values;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Deep-merge `overlay` onto `base`; the overlay wins at leaves, objects
/// merge recursively, and a null overlay keeps the base.
fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Builder for [`UseCaseRuntime`].
pub struct UseCaseRuntimeBuilder {
    config: Option<NormalizedDocument>,
    config_path: Option<PathBuf>,
    registry: Option<Arc<dyn RegistryClient>>,
    registry_url: String,
    validator: Arc<dyn Validator>,
    interpreter: Arc<dyn MapInterpreter>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
    logging: Option<LoggingHook>,
    inline_profiles: HashMap<String, ProfileDocument>,
    inline_maps: HashMap<(String, String), MapDocument>,
    inline_providers: HashMap<String, ProviderJson>,
}

impl Default for UseCaseRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UseCaseRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            config_path: None,
            registry: None,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            validator: Arc::new(AcceptAllValidator),
            interpreter: Arc::new(UnconfiguredInterpreter),
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(MonotonicClock::default()),
            cache_ttl: DEFAULT_BOUND_PROVIDER_TTL,
            logging: None,
            inline_profiles: HashMap::new(),
            inline_maps: HashMap::new(),
            inline_providers: HashMap::new(),
        }
    }

    /// Use an already-normalized configuration document.
    pub fn with_config(mut self, config: NormalizedDocument) -> Self {
        self.config = Some(config);
        self
    }

    /// Load the configuration document from an explicit path.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_interpreter(mut self, interpreter: Arc<dyn MapInterpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Install a [`LoggingHook`] on both the perform and fetch boundaries.
    pub fn with_logging(mut self, hook: LoggingHook) -> Self {
        self.logging = Some(hook);
        self
    }

    /// Provide a parsed profile document inline.
    pub fn with_profile_document(mut self, id: impl Into<String>, document: ProfileDocument) -> Self {
        self.inline_profiles.insert(id.into(), document);
        self
    }

    /// Provide a parsed map document inline.
    pub fn with_map_document(
        mut self,
        profile: impl Into<String>,
        provider: impl Into<String>,
        document: MapDocument,
    ) -> Self {
        self.inline_maps.insert((profile.into(), provider.into()), document);
        self
    }

    /// Provide a parsed provider definition inline.
    pub fn with_provider_document(
        mut self,
        name: impl Into<String>,
        document: ProviderJson,
    ) -> Self {
        self.inline_providers.insert(name.into(), document);
        self
    }

    pub fn build(self) -> Result<UseCaseRuntime, PerformError> {
        let config = match (self.config, self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => config::load_super_json(&path)?,
            (None, None) => {
                let cwd = std::env::current_dir().map_err(|e| {
                    PerformError::Config(format!("cannot determine working directory: {e}"))
                })?;
                let path = config::discover_super_json(&cwd).ok_or_else(|| {
                    PerformError::Config(
                        "no configuration found; provide one or create superface/super.json"
                            .to_string(),
                    )
                })?;
                config::load_super_json(&path)?
            }
        };

        let registry: Arc<dyn RegistryClient> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(HttpRegistryClient::new(self.registry_url)?),
        };

        let bus = Arc::new(EventBus::new(Arc::clone(&self.clock)));
        let http = HttpClient::new(Arc::clone(&bus))?;

        if let Some(hook) = self.logging {
            let hook = Arc::new(hook);
            bus.on_perform(LOGGING_HOOK_PRIORITY, None, Arc::clone(&hook) as Arc<dyn PerformHook>);
            bus.on_fetch(LOGGING_HOOK_PRIORITY, None, hook as Arc<dyn crate::events::FetchHook>);
        }

        Ok(UseCaseRuntime {
            config,
            cache: ExpiringCache::new(Arc::clone(&self.clock), self.cache_ttl),
            binder: Binder::new(
                registry,
                self.inline_profiles,
                self.inline_maps,
                self.inline_providers,
            ),
            bus,
            http,
            validator: self.validator,
            interpreter: self.interpreter,
            sleeper: self.sleeper,
            routers: Mutex::new(HashMap::new()),
            cycles: AtomicU64::new(0),
        })
    }
}

/// The runtime: one instance per embedding, no globals.
pub struct UseCaseRuntime {
    config: NormalizedDocument,
    bus: Arc<EventBus>,
    http: HttpClient,
    cache: ExpiringCache<Arc<BoundProfileProvider>>,
    binder: Binder,
    validator: Arc<dyn Validator>,
    interpreter: Arc<dyn MapInterpreter>,
    sleeper: Arc<dyn Sleeper>,
    routers: Mutex<HashMap<(String, String), Arc<FailoverRouter>>>,
    cycles: AtomicU64,
}

impl UseCaseRuntime {
    pub fn builder() -> UseCaseRuntimeBuilder {
        UseCaseRuntimeBuilder::new()
    }

    pub fn config(&self) -> &NormalizedDocument {
        &self.config
    }

    /// The event bus; register listeners here.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Number of live bound providers in the cache.
    pub fn bound_provider_count(&self) -> usize {
        self.cache.len()
    }

    /// Handle on a configured profile.
    pub fn profile<'r>(&'r self, id: &'r str) -> Result<Profile<'r>, PerformError> {
        self.config.profile(id)?;
        Ok(Profile::new(self, id))
    }

    /// Lazily build the router of one (profile, use case) pair and register
    /// it on the bus, filtered to exactly that pair.
    fn router(
        &self,
        profile_id: &str,
        usecase: &str,
        settings: &NormalizedProfileSettings,
    ) -> Arc<FailoverRouter> {
        let key = (profile_id.to_string(), usecase.to_string());
        let mut routers = self.routers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(router) = routers.get(&key) {
            return Arc::clone(router);
        }

        let factory_settings = settings.clone();
        let factory_usecase = usecase.to_string();
        let router = Arc::new(FailoverRouter::new(
            profile_id,
            usecase,
            settings.priority.clone(),
            Box::new(move |provider| {
                policy_from_config(&factory_settings.retry_policy(&factory_usecase, provider))
            }),
            Arc::clone(&self.sleeper),
        ));
        self.bus.on_perform(
            ROUTER_HOOK_PRIORITY,
            Some(EventFilter::usecase(profile_id, usecase)),
            Arc::clone(&router) as Arc<dyn PerformHook>,
        );
        routers.insert(key, Arc::clone(&router));
        router
    }

    /// Invoke one use case by name.
    pub async fn perform(
        &self,
        profile_id: &str,
        usecase: &str,
        input: Value,
        options: PerformOptions,
    ) -> Result<Value, PerformError> {
        let settings = self.config.profile(profile_id)?;
        if let Some(provider) = &options.provider {
            self.config.provider(provider)?;
        }

        let router = self.router(profile_id, usecase, settings);
        let allow_failover =
            options.provider.is_none() && settings.provider_failover(usecase);

        let initial_provider = options
            .provider
            .clone()
            .or_else(|| router.current_provider())
            .or_else(|| settings.priority.first().cloned())
            .ok_or_else(|| {
                PerformError::Config(format!("no configured provider for profile {profile_id}"))
            })?;

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed);
        router.begin_cycle(cycle, options.provider.clone(), allow_failover);

        let context = PerformContext {
            profile: profile_id.to_string(),
            usecase: usecase.to_string(),
            cycle,
            cancellation: options.cancellation.clone(),
        };
        let args = PerformArgs { provider: Some(initial_provider), request_timeout: None };

        let result = self
            .bus
            .wrapped_perform(&context, args, |args| {
                self.perform_once(profile_id, usecase, settings, &input, &options, &context, args)
            })
            .await;

        router.end_cycle(cycle);
        result
    }

    /// One guarded attempt: bind, compose, validate, interpret, validate.
    #[allow(clippy::too_many_arguments)]
    async fn perform_once(
        &self,
        profile_id: &str,
        usecase: &str,
        settings: &NormalizedProfileSettings,
        input: &Value,
        options: &PerformOptions,
        context: &PerformContext,
        args: PerformArgs,
    ) -> Result<Value, PerformError> {
        let provider_name = args.provider.ok_or_else(|| {
            PerformError::Unexpected("perform attempt without a selected provider".to_string())
        })?;
        let provider_settings = self.config.provider(&provider_name)?;

        let key = bound_cache_key(profile_id, settings, &provider_name, provider_settings);
        let bound = self
            .cache
            .get_or_create(&key, || async {
                let bound = self
                    .binder
                    .bind(profile_id, settings, &provider_name, provider_settings)
                    .await?;
                Ok(Arc::new(bound))
            })
            .await?;

        let usecase_def = bound.profile.usecase(usecase).ok_or_else(|| {
            PerformError::InvalidRequest(format!(
                "use case not found: {usecase} is not declared by {profile_id}"
            ))
        })?;

        let defaults = settings.default_input(usecase, &provider_name);
        let composed = deep_merge(Value::Object(defaults), input.clone());

        if context.cancellation.is_cancelled() {
            return Err(PerformError::Cancelled);
        }

        self.validator
            .validate_input(usecase_def, &composed)
            .await
            .map_err(|issues| PerformError::InputValidation(issues.to_string()))?;

        let security = if options.security.is_empty() {
            bound.security.clone()
        } else {
            let merged = merge_security(&provider_settings.security, &options.security);
            resolve_security(&bound.provider.security_schemes, &merged)?
        };

        let mut parameters = bound.parameters.clone();
        for (name, value) in &options.parameters {
            parameters.insert(name.clone(), value.clone());
        }

        let params = InterpretParams {
            usecase: usecase.to_string(),
            input: composed,
            bound: Arc::clone(&bound),
            security,
            parameters,
            request_timeout: args.request_timeout,
            context: context.clone(),
        };
        let result = self.interpreter.perform(params, &self.http).await?;

        self.validator
            .validate_result(usecase_def, &result)
            .await
            .map_err(|issues| PerformError::ResultValidation(issues.to_string()))?;

        Ok(result)
    }
}
