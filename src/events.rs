//! Event bus wiring the pipeline stages together
//!
//! Perform and fetch boundaries are wrapped with pre/post hooks. Hooks
//! register with a numeric priority (lower runs first, ties in registration
//! order) and an optional profile/use-case filter, and answer with control
//! tokens: a pre hook may modify the arguments or abort with a result, a
//! post hook may modify the result or demand a retry. A retry re-enters the
//! cycle from the pre hooks, which is what lets the failover router apply a
//! queued provider switch before the next attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::Cancellation;
use crate::error::PerformError;
use crate::http::{FetchRequest, HttpResponse};
use crate::time::Clock;

/// Outcome of one perform cycle.
pub type PerformResult = Result<serde_json::Value, PerformError>;
/// Outcome of one fetch.
pub type FetchResult = Result<HttpResponse, PerformError>;

/// Identity of one top-level perform, shared by every event it emits.
#[derive(Debug, Clone)]
pub struct PerformContext {
    pub profile: String,
    pub usecase: String,
    /// Unique id of this perform cycle; routers key per-cycle state on it.
    pub cycle: u64,
    pub cancellation: Cancellation,
}

/// Mutable routing arguments threaded through perform hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformArgs {
    pub provider: Option<String>,
    pub request_timeout: Option<Duration>,
}

pub struct PrePerformEvent<'a> {
    pub context: &'a PerformContext,
    pub time_millis: u64,
    pub args: &'a PerformArgs,
}

pub struct PostPerformEvent<'a> {
    pub context: &'a PerformContext,
    pub time_millis: u64,
    pub args: &'a PerformArgs,
    pub result: &'a PerformResult,
}

#[derive(Debug)]
pub enum PrePerformControl {
    Continue,
    Modify(PerformArgs),
    Abort(PerformResult),
}

#[derive(Debug)]
pub enum PostPerformControl {
    Continue,
    Modify(PerformResult),
    /// Re-invoke the wrapped operation, optionally with new arguments.
    Retry(Option<PerformArgs>),
}

pub struct PreFetchEvent<'a> {
    pub context: &'a PerformContext,
    pub time_millis: u64,
    pub request: &'a FetchRequest,
}

pub struct PostFetchEvent<'a> {
    pub context: &'a PerformContext,
    pub time_millis: u64,
    pub request: &'a FetchRequest,
    pub result: &'a FetchResult,
}

#[derive(Debug)]
pub enum PreFetchControl {
    Continue,
    Modify(Box<FetchRequest>),
    Abort(FetchResult),
}

#[derive(Debug)]
pub enum PostFetchControl {
    Continue,
    Modify(FetchResult),
    Retry(Option<Box<FetchRequest>>),
}

/// Hook around the perform boundary. Implement only `pre_perform` for a
/// before hook, only `post_perform` for an after hook, or both for an
/// around hook.
#[async_trait]
pub trait PerformHook: Send + Sync {
    async fn pre_perform(&self, _event: &PrePerformEvent<'_>) -> PrePerformControl {
        PrePerformControl::Continue
    }

    async fn post_perform(&self, _event: &PostPerformEvent<'_>) -> PostPerformControl {
        PostPerformControl::Continue
    }
}

/// Hook around every outgoing HTTP fetch.
#[async_trait]
pub trait FetchHook: Send + Sync {
    async fn pre_fetch(&self, _event: &PreFetchEvent<'_>) -> PreFetchControl {
        PreFetchControl::Continue
    }

    async fn post_fetch(&self, _event: &PostFetchEvent<'_>) -> PostFetchControl {
        PostFetchControl::Continue
    }
}

/// Restricts a hook to events of one profile and/or use case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub profile: Option<String>,
    pub usecase: Option<String>,
}

impl EventFilter {
    pub fn profile(profile: impl Into<String>) -> Self {
        Self { profile: Some(profile.into()), usecase: None }
    }

    pub fn usecase(profile: impl Into<String>, usecase: impl Into<String>) -> Self {
        Self { profile: Some(profile.into()), usecase: Some(usecase.into()) }
    }

    fn matches(&self, context: &PerformContext) -> bool {
        self.profile.as_ref().map_or(true, |p| *p == context.profile)
            && self.usecase.as_ref().map_or(true, |u| *u == context.usecase)
    }
}

struct Registration<H: ?Sized> {
    priority: u32,
    seq: u64,
    filter: Option<EventFilter>,
    hook: Arc<H>,
}

impl<H: ?Sized> Registration<H> {
    fn applies(&self, context: &PerformContext) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(context))
    }
}

type HookList<H> = Mutex<Arc<Vec<Registration<H>>>>;

/// Dispatcher owned by one executor instance.
///
/// Listener lists are copy-on-write: registration clones the list, emits
/// read a cheap snapshot. Listeners for one emit run serially in priority
/// order and all observe the same emit timestamp.
pub struct EventBus {
    clock: Arc<dyn Clock>,
    perform_hooks: HookList<dyn PerformHook>,
    fetch_hooks: HookList<dyn FetchHook>,
    seq: AtomicU64,
}

impl EventBus {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            perform_hooks: Mutex::new(Arc::new(Vec::new())),
            fetch_hooks: Mutex::new(Arc::new(Vec::new())),
            seq: AtomicU64::new(0),
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn on_perform(
        &self,
        priority: u32,
        filter: Option<EventFilter>,
        hook: Arc<dyn PerformHook>,
    ) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.perform_hooks.lock().unwrap_or_else(|p| p.into_inner());
        let mut list: Vec<Registration<dyn PerformHook>> = guard
            .iter()
            .map(|r| Registration {
                priority: r.priority,
                seq: r.seq,
                filter: r.filter.clone(),
                hook: Arc::clone(&r.hook),
            })
            .collect();
        list.push(Registration { priority, seq, filter, hook });
        list.sort_by_key(|r| (r.priority, r.seq));
        *guard = Arc::new(list);
    }

    pub fn on_fetch(&self, priority: u32, filter: Option<EventFilter>, hook: Arc<dyn FetchHook>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.fetch_hooks.lock().unwrap_or_else(|p| p.into_inner());
        let mut list: Vec<Registration<dyn FetchHook>> = guard
            .iter()
            .map(|r| Registration {
                priority: r.priority,
                seq: r.seq,
                filter: r.filter.clone(),
                hook: Arc::clone(&r.hook),
            })
            .collect();
        list.push(Registration { priority, seq, filter, hook });
        list.sort_by_key(|r| (r.priority, r.seq));
        *guard = Arc::new(list);
    }

    fn perform_snapshot(&self) -> Arc<Vec<Registration<dyn PerformHook>>> {
        Arc::clone(&self.perform_hooks.lock().unwrap_or_else(|p| p.into_inner()))
    }

    fn fetch_snapshot(&self) -> Arc<Vec<Registration<dyn FetchHook>>> {
        Arc::clone(&self.fetch_hooks.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Run `operation` wrapped by the perform hooks.
    ///
    /// Pre hooks accumulate argument modifications and short-circuit on
    /// abort. Post hooks short-circuit on modify; a retry re-enters the
    /// whole cycle with the returned (or current) arguments.
    pub async fn wrapped_perform<F, Fut>(
        &self,
        context: &PerformContext,
        mut args: PerformArgs,
        operation: F,
    ) -> PerformResult
    where
        F: Fn(PerformArgs) -> Fut,
        Fut: std::future::Future<Output = PerformResult>,
    {
        let hooks = self.perform_snapshot();
        loop {
            let time_millis = self.clock.now_millis();
            for registration in hooks.iter().filter(|r| r.applies(context)) {
                let event = PrePerformEvent { context, time_millis, args: &args };
                match registration.hook.pre_perform(&event).await {
                    PrePerformControl::Continue => {}
                    PrePerformControl::Modify(new_args) => args = new_args,
                    PrePerformControl::Abort(result) => return result,
                }
            }

            let mut result = operation(args.clone()).await;

            let time_millis = self.clock.now_millis();
            let mut retry = None;
            for registration in hooks.iter().filter(|r| r.applies(context)) {
                let event = PostPerformEvent { context, time_millis, args: &args, result: &result };
                match registration.hook.post_perform(&event).await {
                    PostPerformControl::Continue => {}
                    PostPerformControl::Modify(new_result) => {
                        result = new_result;
                        break;
                    }
                    PostPerformControl::Retry(new_args) => {
                        retry = Some(new_args);
                        break;
                    }
                }
            }

            match retry {
                Some(Some(new_args)) => args = new_args,
                Some(None) => {}
                None => return result,
            }
        }
    }

    /// Run one HTTP fetch wrapped by the fetch hooks; same dispatch
    /// semantics as [`EventBus::wrapped_perform`].
    pub async fn wrapped_fetch<F, Fut>(
        &self,
        context: &PerformContext,
        mut request: FetchRequest,
        operation: F,
    ) -> FetchResult
    where
        F: Fn(FetchRequest) -> Fut,
        Fut: std::future::Future<Output = FetchResult>,
    {
        let hooks = self.fetch_snapshot();
        loop {
            let time_millis = self.clock.now_millis();
            for registration in hooks.iter().filter(|r| r.applies(context)) {
                let event = PreFetchEvent { context, time_millis, request: &request };
                match registration.hook.pre_fetch(&event).await {
                    PreFetchControl::Continue => {}
                    PreFetchControl::Modify(new_request) => request = *new_request,
                    PreFetchControl::Abort(result) => return result,
                }
            }

            let mut result = operation(request.clone()).await;

            let time_millis = self.clock.now_millis();
            let mut retry = None;
            for registration in hooks.iter().filter(|r| r.applies(context)) {
                let event = PostFetchEvent { context, time_millis, request: &request, result: &result };
                match registration.hook.post_fetch(&event).await {
                    PostFetchControl::Continue => {}
                    PostFetchControl::Modify(new_result) => {
                        result = new_result;
                        break;
                    }
                    PostFetchControl::Retry(new_request) => {
                        retry = Some(new_request);
                        break;
                    }
                }
            }

            match retry {
                Some(Some(new_request)) => request = *new_request,
                Some(None) => {}
                None => return result,
            }
        }
    }
}
