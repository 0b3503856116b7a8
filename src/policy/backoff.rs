//! Backoff primitives
//!
//! A [`BackoffStrategy`] computes the delay for a given step; [`Backoff`]
//! tracks a position within a strategy that advances on failure, steps back
//! on recovery, and resets on success. Delays saturate instead of
//! overflowing and can be clamped to a maximum.

use std::time::Duration;

/// Largest delay any strategy will produce, used as the saturation point.
const SATURATION: Duration = Duration::from_secs(60 * 60);

/// How the delay grows with the step number.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Same delay at every step.
    Constant { delay: Duration },
    /// `base * (step + 1)`.
    Linear { base: Duration },
    /// `start * factor^step`, optionally clamped to `max`.
    Exponential { start: Duration, factor: f64, max: Option<Duration> },
}

impl BackoffStrategy {
    pub fn constant(delay: Duration) -> Self {
        BackoffStrategy::Constant { delay }
    }

    pub fn linear(base: Duration) -> Self {
        BackoffStrategy::Linear { base }
    }

    pub fn exponential(start: Duration, factor: f64) -> Self {
        BackoffStrategy::Exponential { start, factor, max: None }
    }

    /// Clamp exponential growth to `max`. No effect on other strategies.
    pub fn with_max(mut self, limit: Duration) -> Self {
        if let BackoffStrategy::Exponential { ref mut max, .. } = self {
            *max = Some(limit);
        }
        self
    }

    /// Delay at a zero-indexed step.
    pub fn delay(&self, step: u32) -> Duration {
        match self {
            BackoffStrategy::Constant { delay } => *delay,
            BackoffStrategy::Linear { base } => {
                base.checked_mul(step.saturating_add(1)).unwrap_or(SATURATION).min(SATURATION)
            }
            BackoffStrategy::Exponential { start, factor, max } => {
                let millis = start.as_millis() as f64 * factor.powf(step as f64);
                let delay = if millis.is_finite() && millis >= 0.0 {
                    Duration::from_millis(millis.min(SATURATION.as_millis() as f64) as u64)
                } else {
                    SATURATION
                };
                match max {
                    Some(max) => delay.min(*max),
                    None => delay,
                }
            }
        }
    }
}

/// A reversible position within a backoff strategy.
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: BackoffStrategy,
    step: u32,
    jitter_fraction: f64,
}

impl Backoff {
    pub fn new(strategy: BackoffStrategy) -> Self {
        Self { strategy, step: 0, jitter_fraction: 0.0 }
    }

    /// Add up to `fraction` of the delay as random extra wait. Additive only,
    /// so lower-bound guarantees on observed delays hold.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.max(0.0);
        self
    }

    /// Delay at the current step, jitter applied.
    pub fn current(&self) -> Duration {
        let delay = self.strategy.delay(self.step);
        if self.jitter_fraction > 0.0 {
            let extra = delay.as_millis() as f64 * self.jitter_fraction * rand::random::<f64>();
            (delay + Duration::from_millis(extra as u64)).min(SATURATION)
        } else {
            delay
        }
    }

    /// Move one step forward (after a failure).
    pub fn advance(&mut self) {
        self.step = self.step.saturating_add(1);
    }

    /// Move one step back (after a partial recovery).
    pub fn step_back(&mut self) {
        self.step = self.step.saturating_sub(1);
    }

    /// Return to the starting position (after a success).
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_strategy_is_flat() {
        let strategy = BackoffStrategy::constant(Duration::from_millis(250));
        assert_eq!(strategy.delay(0), Duration::from_millis(250));
        assert_eq!(strategy.delay(7), Duration::from_millis(250));
    }

    #[test]
    fn linear_strategy_grows_by_base() {
        let strategy = BackoffStrategy::linear(Duration::from_millis(100));
        assert_eq!(strategy.delay(0), Duration::from_millis(100));
        assert_eq!(strategy.delay(1), Duration::from_millis(200));
        assert_eq!(strategy.delay(4), Duration::from_millis(500));
    }

    #[test]
    fn exponential_strategy_multiplies() {
        let strategy = BackoffStrategy::exponential(Duration::from_millis(2000), 2.0);
        assert_eq!(strategy.delay(0), Duration::from_millis(2000));
        assert_eq!(strategy.delay(1), Duration::from_millis(4000));
        assert_eq!(strategy.delay(3), Duration::from_millis(16000));
    }

    #[test]
    fn exponential_strategy_respects_max() {
        let strategy = BackoffStrategy::exponential(Duration::from_millis(1000), 2.0)
            .with_max(Duration::from_secs(5));
        assert_eq!(strategy.delay(1), Duration::from_millis(2000));
        assert_eq!(strategy.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn exponential_strategy_saturates_instead_of_overflowing() {
        let strategy = BackoffStrategy::exponential(Duration::from_secs(10), 10.0);
        assert_eq!(strategy.delay(u32::MAX), SATURATION);
    }

    #[test]
    fn backoff_steps_are_reversible() {
        let mut backoff =
            Backoff::new(BackoffStrategy::exponential(Duration::from_millis(1000), 2.0));
        assert_eq!(backoff.current(), Duration::from_millis(1000));

        backoff.advance();
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_millis(4000));

        backoff.step_back();
        assert_eq!(backoff.current(), Duration::from_millis(2000));

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(1000));

        // step_back below zero stays at the start
        backoff.step_back();
        assert_eq!(backoff.current(), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_only_adds_delay() {
        let base = Duration::from_millis(1000);
        let backoff = Backoff::new(BackoffStrategy::constant(base)).with_jitter(0.5);
        for _ in 0..50 {
            let delay = backoff.current();
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_millis(500));
        }
    }
}
