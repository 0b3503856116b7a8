//! Logging hooks for perform/fetch tracking
//!
//! An optional pair of event-bus hooks that log perform outcomes and every
//! outgoing fetch through the `log` facade. The runtime installs nothing by
//! itself; register a [`LoggingHook`] on the bus (or through the builder) to
//! get visibility.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::events::{
    FetchHook, PerformHook, PostFetchControl, PostFetchEvent, PostPerformControl,
    PostPerformEvent, PreFetchControl, PreFetchEvent, PrePerformControl, PrePerformEvent,
};

/// Bus priority of logging hooks: before the router, so attempts and
/// retries are visible as they happen.
pub const LOGGING_HOOK_PRIORITY: u32 = 10;

/// Logging hook for tracking performs and fetches
#[derive(Debug)]
pub struct LoggingHook {
    /// Whether to log perform input/result details
    log_bodies: bool,
    /// Whether to log timing information
    log_timing: bool,
    started_at_millis: AtomicU64,
}

impl LoggingHook {
    /// Create a new logging hook with default settings
    pub fn new() -> Self {
        Self { log_bodies: true, log_timing: true, started_at_millis: AtomicU64::new(0) }
    }

    /// Create a minimal logging hook (outcomes and timing only)
    pub fn minimal() -> Self {
        Self { log_bodies: false, log_timing: true, started_at_millis: AtomicU64::new(0) }
    }

    /// Set whether to log bodies
    pub fn with_bodies(mut self, enabled: bool) -> Self {
        self.log_bodies = enabled;
        self
    }

    /// Set whether to log timing information
    pub fn with_timing(mut self, enabled: bool) -> Self {
        self.log_timing = enabled;
        self
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PerformHook for LoggingHook {
    async fn pre_perform(&self, event: &PrePerformEvent<'_>) -> PrePerformControl {
        self.started_at_millis.store(event.time_millis, Ordering::Relaxed);
        log::info!(
            "performing {}/{} via {}",
            event.context.profile,
            event.context.usecase,
            event.args.provider.as_deref().unwrap_or("<unselected>")
        );
        PrePerformControl::Continue
    }

    async fn post_perform(&self, event: &PostPerformEvent<'_>) -> PostPerformControl {
        match event.result {
            Ok(value) => {
                log::info!("{}/{} succeeded", event.context.profile, event.context.usecase);
                if self.log_bodies {
                    log::debug!("result: {value}");
                }
            }
            Err(error) => {
                log::warn!(
                    "{}/{} failed: {error}",
                    event.context.profile,
                    event.context.usecase
                );
            }
        }
        if self.log_timing {
            let started = self.started_at_millis.load(Ordering::Relaxed);
            log::debug!("perform took {}ms", event.time_millis.saturating_sub(started));
        }
        PostPerformControl::Continue
    }
}

#[async_trait]
impl FetchHook for LoggingHook {
    async fn pre_fetch(&self, event: &PreFetchEvent<'_>) -> PreFetchControl {
        log::debug!("fetch {} {}", event.request.method, event.request.url);
        PreFetchControl::Continue
    }

    async fn post_fetch(&self, event: &PostFetchEvent<'_>) -> PostFetchControl {
        match event.result {
            Ok(response) => {
                log::debug!(
                    "fetch {} {} -> {}",
                    event.request.method,
                    event.request.url,
                    response.status
                );
            }
            Err(error) => {
                log::debug!(
                    "fetch {} {} failed: {error}",
                    event.request.method,
                    event.request.url
                );
            }
        }
        PostFetchControl::Continue
    }
}
