//! Failure-policy router
//!
//! One router exists per (profile, use case). It owns one policy per
//! provider (built lazily from the normalized retry policy), walks providers
//! strictly in priority order, and talks to the event bus as an around hook
//! on the perform boundary: the pre phase selects a provider and enforces
//! the policy's gate (continue, backoff sleep, abort-with-failover), the
//! post phase records the outcome and decides between retry, provider
//! switch, and abort.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{PerformError, REASON_NO_PROVIDERS};
use crate::events::{
    PerformArgs, PerformHook, PostPerformControl, PostPerformEvent, PrePerformControl,
    PrePerformEvent,
};
use crate::policy::{AfterFailure, BeforeExecution, ExecutionInfo, FailurePolicy};
use crate::time::Sleeper;

/// Bus priority of router hooks. High so user listeners observe events
/// before the router decides retries and switches.
pub const ROUTER_HOOK_PRIORITY: u32 = 1000;

type PolicyFactory = Box<dyn Fn(&str) -> Box<dyn FailurePolicy> + Send + Sync>;

struct RouterState {
    providers_by_priority: Vec<String>,
    /// Provider the next perform starts from; survives across cycles so a
    /// failover sticks until something changes it.
    current: Option<String>,
    policies: HashMap<String, Box<dyn FailurePolicy>>,
}

/// Per-cycle bookkeeping: which providers this perform has visited, and a
/// provider switch queued by the post phase for the next pre phase.
struct CycleState {
    pinned: Option<String>,
    allow_failover: bool,
    visited: HashSet<String>,
    queued_switch: Option<String>,
}

pub struct FailoverRouter {
    profile: String,
    usecase: String,
    sleeper: Arc<dyn Sleeper>,
    factory: PolicyFactory,
    state: Mutex<RouterState>,
    cycles: Mutex<HashMap<u64, CycleState>>,
}

impl FailoverRouter {
    pub fn new(
        profile: impl Into<String>,
        usecase: impl Into<String>,
        providers_by_priority: Vec<String>,
        factory: PolicyFactory,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            profile: profile.into(),
            usecase: usecase.into(),
            sleeper,
            factory,
            state: Mutex::new(RouterState {
                providers_by_priority,
                current: None,
                policies: HashMap::new(),
            }),
            cycles: Mutex::new(HashMap::new()),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn usecase(&self) -> &str {
        &self.usecase
    }

    /// Provider the next perform will start from.
    pub fn current_provider(&self) -> Option<String> {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).current.clone()
    }

    /// Start one perform cycle.
    pub fn begin_cycle(&self, cycle: u64, pinned: Option<String>, allow_failover: bool) {
        if !allow_failover {
            let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if state.providers_by_priority.len() > 1 {
                log::warn!(
                    "provider failover is disabled for {}/{}; only the first provider is used",
                    self.profile,
                    self.usecase
                );
            }
        }
        self.cycles.lock().unwrap_or_else(|p| p.into_inner()).insert(
            cycle,
            CycleState { pinned, allow_failover, visited: HashSet::new(), queued_switch: None },
        );
    }

    /// Drop the bookkeeping of a finished cycle.
    pub fn end_cycle(&self, cycle: u64) {
        self.cycles.lock().unwrap_or_else(|p| p.into_inner()).remove(&cycle);
    }

    fn with_policy<R>(
        &self,
        provider: &str,
        f: impl FnOnce(&mut Box<dyn FailurePolicy>) -> R,
    ) -> R {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !state.policies.contains_key(provider) {
            let policy = (self.factory)(provider);
            state.policies.insert(provider.to_string(), policy);
        }
        f(state.policies.get_mut(provider).expect("policy inserted above"))
    }

    fn mark_visited(&self, cycle: u64, provider: &str) {
        if let Some(state) =
            self.cycles.lock().unwrap_or_else(|p| p.into_inner()).get_mut(&cycle)
        {
            state.visited.insert(provider.to_string());
        }
    }

    fn set_current(&self, provider: &str) {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).current =
            Some(provider.to_string());
    }

    /// First provider in priority order this cycle has not visited yet.
    fn next_unvisited(&self, cycle: u64) -> Option<String> {
        let priority = {
            let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.providers_by_priority.clone()
        };
        let cycles = self.cycles.lock().unwrap_or_else(|p| p.into_inner());
        let visited = &cycles.get(&cycle)?.visited;
        priority.into_iter().find(|p| !visited.contains(p))
    }

    fn cycle_flags(&self, cycle: u64) -> (Option<String>, bool, Option<String>) {
        let mut cycles = self.cycles.lock().unwrap_or_else(|p| p.into_inner());
        match cycles.get_mut(&cycle) {
            Some(state) => {
                (state.pinned.clone(), state.allow_failover, state.queued_switch.take())
            }
            None => (None, false, None),
        }
    }

    fn queue_switch(&self, cycle: u64, provider: String) {
        if let Some(state) =
            self.cycles.lock().unwrap_or_else(|p| p.into_inner()).get_mut(&cycle)
        {
            state.queued_switch = Some(provider);
        }
    }
}

impl std::fmt::Debug for FailoverRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverRouter")
            .field("profile", &self.profile)
            .field("usecase", &self.usecase)
            .finish()
    }
}

#[async_trait]
impl PerformHook for FailoverRouter {
    async fn pre_perform(&self, event: &PrePerformEvent<'_>) -> PrePerformControl {
        let cycle = event.context.cycle;
        let info = ExecutionInfo { time_millis: event.time_millis };
        let (pinned, allow_failover, queued) = self.cycle_flags(cycle);

        if let Some(next) = queued {
            self.set_current(&next);
        }

        let mut provider = match pinned.or_else(|| self.current_provider()).or_else(|| {
            self.state
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .providers_by_priority
                .first()
                .cloned()
        }) {
            Some(provider) => provider,
            None => {
                return PrePerformControl::Abort(Err(PerformError::PolicyAbort(
                    REASON_NO_PROVIDERS.to_string(),
                )))
            }
        };

        loop {
            self.mark_visited(cycle, &provider);
            self.set_current(&provider);
            let decision = self.with_policy(&provider, |policy| policy.before_execute(&info));

            match decision {
                BeforeExecution::Continue { request_timeout } => {
                    let mut args = event.args.clone();
                    args.provider = Some(provider);
                    args.request_timeout = Some(request_timeout);
                    return PrePerformControl::Modify(args);
                }
                BeforeExecution::Backoff { delay, request_timeout } => {
                    log::debug!(
                        "backing off {}ms before {}/{} via {provider}",
                        delay.as_millis(),
                        self.profile,
                        self.usecase
                    );
                    tokio::select! {
                        _ = event.context.cancellation.cancelled() => {
                            return PrePerformControl::Abort(Err(PerformError::Cancelled));
                        }
                        _ = self.sleeper.sleep(delay) => {}
                    }
                    let mut args = event.args.clone();
                    args.provider = Some(provider);
                    args.request_timeout = Some(request_timeout);
                    return PrePerformControl::Modify(args);
                }
                BeforeExecution::Abort { reason } => {
                    if allow_failover {
                        if let Some(next) = self.next_unvisited(cycle) {
                            log::info!(
                                "provider {provider} refused ({reason}); failing over to {next}"
                            );
                            provider = next;
                            continue;
                        }
                    }
                    return PrePerformControl::Abort(Err(PerformError::PolicyAbort(reason)));
                }
            }
        }
    }

    async fn post_perform(&self, event: &PostPerformEvent<'_>) -> PostPerformControl {
        let cycle = event.context.cycle;
        let info = ExecutionInfo { time_millis: event.time_millis };
        let provider = match event.args.provider.clone().or_else(|| self.current_provider()) {
            Some(provider) => provider,
            None => return PostPerformControl::Continue,
        };

        let error = match event.result {
            Ok(_) => {
                self.with_policy(&provider, |policy| policy.after_success(&info));
                return PostPerformControl::Continue;
            }
            Err(error) => error,
        };

        // Validation, configuration, bind, and cancellation failures are not
        // the policy's business; they propagate untouched.
        if !error.is_retryable() {
            return PostPerformControl::Continue;
        }

        match self.with_policy(&provider, |policy| policy.after_failure(&info)) {
            AfterFailure::Retry => PostPerformControl::Retry(None),
            AfterFailure::Abort { reason } => {
                let allow_failover = {
                    let cycles = self.cycles.lock().unwrap_or_else(|p| p.into_inner());
                    cycles.get(&cycle).map(|c| c.allow_failover).unwrap_or(false)
                };
                if allow_failover {
                    if let Some(next) = self.next_unvisited(cycle) {
                        log::info!("provider {provider} aborted; failing over to {next}");
                        self.queue_switch(cycle, next);
                        return PostPerformControl::Retry(None);
                    }
                }
                match reason {
                    Some(reason) => {
                        PostPerformControl::Modify(Err(PerformError::PolicyAbort(reason)))
                    }
                    // No reason: the original error is the story.
                    None => PostPerformControl::Continue,
                }
            }
        }
    }
}
