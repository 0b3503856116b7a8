//! Failure policies
//!
//! A policy is a state machine consulted around every execution attempt of a
//! (profile, use case, provider) triple: before the attempt it may let the
//! call through, demand a backoff sleep, or refuse outright; after the
//! attempt it records success or decides between retry and abort.

pub mod backoff;
mod router;

pub use backoff::{Backoff, BackoffStrategy};
pub use router::{FailoverRouter, ROUTER_HOOK_PRIORITY};

use std::time::Duration;

use crate::config::{RetryPolicyConfig, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::error::{REASON_CIRCUIT_OPEN, REASON_MAX_RETRIES};

/// Context shared with policies; the timestamp is the emit instant of the
/// surrounding event, identical for every observer of one phase.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInfo {
    pub time_millis: u64,
}

/// Decision taken before an execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum BeforeExecution {
    /// Proceed, bounding the attempt by `request_timeout`.
    Continue { request_timeout: Duration },
    /// Sleep for `delay`, then proceed.
    Backoff { delay: Duration, request_timeout: Duration },
    /// Refuse the attempt.
    Abort { reason: String },
}

/// Decision taken after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AfterFailure {
    Retry,
    /// Stop. With a reason the router surfaces a policy abort; without one
    /// the original error propagates unchanged.
    Abort { reason: Option<String> },
}

/// State machine deciding retry, backoff, and abort per provider.
pub trait FailurePolicy: Send + std::fmt::Debug {
    fn before_execute(&mut self, info: &ExecutionInfo) -> BeforeExecution;
    fn after_success(&mut self, info: &ExecutionInfo);
    fn after_failure(&mut self, info: &ExecutionInfo) -> AfterFailure;
    fn reset(&mut self);
}

/// Build the policy matching a normalized retry policy configuration.
pub fn policy_from_config(config: &RetryPolicyConfig) -> Box<dyn FailurePolicy> {
    match config {
        RetryPolicyConfig::None => Box::new(AbortPolicy::new()),
        RetryPolicyConfig::Simple { max_contiguous_retries, request_timeout } => Box::new(
            RetryPolicy::new(*max_contiguous_retries, Duration::from_millis(*request_timeout)),
        ),
        RetryPolicyConfig::CircuitBreaker {
            max_contiguous_retries,
            request_timeout,
            open_time,
            backoff,
        } => {
            let backoff = backoff.as_ref().map(|b| {
                Backoff::new(BackoffStrategy::exponential(
                    Duration::from_millis(b.start),
                    b.factor,
                ))
            });
            Box::new(CircuitBreakerPolicy::new(
                *max_contiguous_retries,
                Duration::from_millis(*request_timeout),
                Duration::from_millis(*open_time),
                backoff,
            ))
        }
    }
}

/// Single attempt, no retries.
#[derive(Debug)]
pub struct AbortPolicy {
    request_timeout: Duration,
}

impl AbortPolicy {
    pub fn new() -> Self {
        Self { request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS) }
    }
}

impl Default for AbortPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FailurePolicy for AbortPolicy {
    fn before_execute(&mut self, _info: &ExecutionInfo) -> BeforeExecution {
        BeforeExecution::Continue { request_timeout: self.request_timeout }
    }

    fn after_success(&mut self, _info: &ExecutionInfo) {}

    fn after_failure(&mut self, _info: &ExecutionInfo) -> AfterFailure {
        AfterFailure::Abort { reason: None }
    }

    fn reset(&mut self) {}
}

/// Up to `max_contiguous_retries` retries with no delay between attempts.
#[derive(Debug)]
pub struct RetryPolicy {
    max_contiguous_retries: u32,
    remaining: u32,
    exhausted: bool,
    request_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_contiguous_retries: u32, request_timeout: Duration) -> Self {
        Self {
            max_contiguous_retries,
            remaining: max_contiguous_retries,
            exhausted: false,
            request_timeout,
        }
    }
}

impl FailurePolicy for RetryPolicy {
    fn before_execute(&mut self, _info: &ExecutionInfo) -> BeforeExecution {
        if self.exhausted {
            BeforeExecution::Abort { reason: REASON_MAX_RETRIES.to_string() }
        } else {
            BeforeExecution::Continue { request_timeout: self.request_timeout }
        }
    }

    fn after_success(&mut self, _info: &ExecutionInfo) {
        self.remaining = self.max_contiguous_retries;
        self.exhausted = false;
    }

    fn after_failure(&mut self, _info: &ExecutionInfo) -> AfterFailure {
        if self.remaining == 0 {
            self.exhausted = true;
            AfterFailure::Abort { reason: Some(REASON_MAX_RETRIES.to_string()) }
        } else {
            self.remaining -= 1;
            AfterFailure::Retry
        }
    }

    fn reset(&mut self) {
        self.remaining = self.max_contiguous_retries;
        self.exhausted = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker: opens after `max_contiguous_retries` contiguous
/// failures, rejects while open, probes once after `open_time`, and applies
/// exponential backoff between in-cycle retries when configured.
#[derive(Debug)]
pub struct CircuitBreakerPolicy {
    max_contiguous_retries: u32,
    request_timeout: Duration,
    open_time: Duration,
    backoff: Option<Backoff>,
    state: CircuitState,
    contiguous_failures: u32,
    open_since_millis: u64,
}

impl CircuitBreakerPolicy {
    pub fn new(
        max_contiguous_retries: u32,
        request_timeout: Duration,
        open_time: Duration,
        backoff: Option<Backoff>,
    ) -> Self {
        Self {
            max_contiguous_retries,
            request_timeout,
            open_time,
            backoff,
            state: CircuitState::Closed,
            contiguous_failures: 0,
            open_since_millis: 0,
        }
    }

    fn open(&mut self, now_millis: u64) {
        self.state = CircuitState::Open;
        self.open_since_millis = now_millis;
        log::warn!(
            "circuit breaker opened after {} contiguous failures",
            self.contiguous_failures
        );
    }
}

impl FailurePolicy for CircuitBreakerPolicy {
    fn before_execute(&mut self, info: &ExecutionInfo) -> BeforeExecution {
        match self.state {
            CircuitState::Closed => {
                if self.contiguous_failures > 0 {
                    if let Some(backoff) = &self.backoff {
                        return BeforeExecution::Backoff {
                            delay: backoff.current(),
                            request_timeout: self.request_timeout,
                        };
                    }
                }
                BeforeExecution::Continue { request_timeout: self.request_timeout }
            }
            CircuitState::Open => {
                let elapsed = info.time_millis.saturating_sub(self.open_since_millis);
                if elapsed >= self.open_time.as_millis() as u64 {
                    self.state = CircuitState::HalfOpen;
                    log::debug!("circuit breaker half-open, probing");
                    BeforeExecution::Continue { request_timeout: self.request_timeout }
                } else {
                    BeforeExecution::Abort { reason: REASON_CIRCUIT_OPEN.to_string() }
                }
            }
            CircuitState::HalfOpen => {
                BeforeExecution::Continue { request_timeout: self.request_timeout }
            }
        }
    }

    fn after_success(&mut self, _info: &ExecutionInfo) {
        if self.state == CircuitState::HalfOpen {
            log::info!("circuit breaker closed after successful probe");
        }
        self.state = CircuitState::Closed;
        self.contiguous_failures = 0;
        if let Some(backoff) = &mut self.backoff {
            backoff.reset();
        }
    }

    fn after_failure(&mut self, info: &ExecutionInfo) -> AfterFailure {
        self.contiguous_failures = self.contiguous_failures.saturating_add(1);
        if let Some(backoff) = &mut self.backoff {
            backoff.advance();
        }

        match self.state {
            CircuitState::HalfOpen => {
                self.open(info.time_millis);
                AfterFailure::Abort { reason: Some(REASON_CIRCUIT_OPEN.to_string()) }
            }
            CircuitState::Closed if self.contiguous_failures >= self.max_contiguous_retries => {
                self.open(info.time_millis);
                AfterFailure::Abort { reason: Some(REASON_CIRCUIT_OPEN.to_string()) }
            }
            CircuitState::Closed => AfterFailure::Retry,
            // A failure observed while open: keep rejecting.
            CircuitState::Open => {
                AfterFailure::Abort { reason: Some(REASON_CIRCUIT_OPEN.to_string()) }
            }
        }
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.contiguous_failures = 0;
        self.open_since_millis = 0;
        if let Some(backoff) = &mut self.backoff {
            backoff.reset();
        }
    }
}
