//! Retry policy value object
//!
//! Computes the delay before retry attempt *n* given a strategy and bounds,
//! across the four strategies (`none`/`fixed`/`linear`/`exponential`) this
//! system supports.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Backoff strategy between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// No retries regardless of `max_retries`
    None,
    /// Always wait `initial_delay`
    Fixed,
    /// `initial_delay * (attempt + 1)`, capped at `max_delay`
    Linear,
    /// `initial_delay * backoff_base ^ attempt`, capped at `max_delay`
    Exponential,
}

impl std::str::FromStr for RetryStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "fixed" => Ok(Self::Fixed),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(ValidationError::UnknownRetryStrategy(other.to_string())),
        }
    }
}

/// Retry policy for a task
///
/// Immutable once constructed — `RetryPolicy::new` is the sole fallible
/// constructor and enforces the invariants from the data model section.
///
/// # Example
///
/// ```
/// use waymark_orchestrator::retry::{RetryPolicy, RetryStrategy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(
///     true,
///     3,
///     RetryStrategy::Exponential,
///     Duration::from_secs(1),
///     Duration::from_secs(60),
///     2,
/// ).unwrap();
///
/// assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
/// assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Whether retries are attempted at all
    pub enabled: bool,
    /// Maximum number of retries (not counting the initial attempt)
    pub max_retries: u32,
    /// Backoff strategy
    pub strategy: RetryStrategy,
    /// Delay before the first retry
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,
    /// Upper bound on any computed delay
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    /// Multiplier for the exponential strategy
    pub backoff_base: u32,
}

impl RetryPolicy {
    /// Construct a retry policy, validating the invariants from the data model
    pub fn new(
        enabled: bool,
        max_retries: u32,
        strategy: RetryStrategy,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_base: u32,
    ) -> Result<Self, ValidationError> {
        if max_delay < initial_delay {
            return Err(ValidationError::MaxDelayBelowInitial {
                max_delay,
                initial_delay,
            });
        }
        if backoff_base < 1 {
            return Err(ValidationError::BackoffBaseBelowOne);
        }
        Ok(Self {
            enabled,
            max_retries,
            strategy,
            initial_delay,
            max_delay,
            backoff_base,
        })
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            strategy: RetryStrategy::None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_base: 1,
        }
    }

    /// Sensible default: exponential backoff, 3 retries, 1s..60s, base 2
    pub fn exponential_default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            strategy: RetryStrategy::Exponential,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_base: 2,
        }
    }

    /// A policy with a constant delay between attempts
    pub fn fixed_delay(max_retries: u32, delay: Duration) -> Self {
        Self {
            enabled: true,
            max_retries,
            strategy: RetryStrategy::Fixed,
            initial_delay: delay,
            max_delay: delay,
            backoff_base: 1,
        }
    }

    /// Check if a further retry is permitted after `attempt` (0-indexed) failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_retries
    }

    /// Delay before the retry following the `attempt`-th (0-indexed) failure
    ///
    /// Returns `Duration::ZERO` once `attempt >= max_retries` — there is no
    /// further retry to delay.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt >= self.max_retries {
            return Duration::ZERO;
        }

        match self.strategy {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::Fixed => self.initial_delay,
            RetryStrategy::Linear => {
                let delay = self.initial_delay * (attempt + 1);
                delay.min(self.max_delay)
            }
            RetryStrategy::Exponential => {
                let factor = self.backoff_base.saturating_pow(attempt);
                let delay = self.initial_delay.saturating_mul(factor);
                delay.min(self.max_delay)
            }
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_max_delay_below_initial() {
        let err = RetryPolicy::new(
            true,
            3,
            RetryStrategy::Fixed,
            Duration::from_secs(10),
            Duration::from_secs(5),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MaxDelayBelowInitial { .. }));
    }

    #[test]
    fn validates_backoff_base() {
        let err = RetryPolicy::new(
            true,
            3,
            RetryStrategy::Exponential,
            Duration::from_secs(1),
            Duration::from_secs(60),
            0,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::BackoffBaseBelowOne);
    }

    #[test]
    fn none_strategy_never_delays() {
        let policy = RetryPolicy::new(
            true,
            5,
            RetryStrategy::None,
            Duration::from_secs(5),
            Duration::from_secs(60),
            2,
        )
        .unwrap();
        assert_eq!(policy.calculate_delay(0), Duration::ZERO);
        assert_eq!(policy.calculate_delay(3), Duration::ZERO);
    }

    #[test]
    fn fixed_strategy_returns_initial_delay() {
        let policy = RetryPolicy::fixed_delay(3, Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(5));
    }

    #[test]
    fn linear_strategy_scales_with_attempt() {
        let policy = RetryPolicy::new(
            true,
            5,
            RetryStrategy::Linear,
            Duration::from_secs(2),
            Duration::from_secs(100),
            1,
        )
        .unwrap();
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(4));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(6));
    }

    #[test]
    fn exponential_strategy_matches_scenario_3() {
        let policy = RetryPolicy::new(
            true,
            2,
            RetryStrategy::Exponential,
            Duration::from_secs(1),
            Duration::from_secs(60),
            2,
        )
        .unwrap();
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let policy = RetryPolicy::new(
            true,
            10,
            RetryStrategy::Exponential,
            Duration::from_secs(1),
            Duration::from_secs(5),
            2,
        )
        .unwrap();
        assert_eq!(policy.calculate_delay(9), Duration::from_secs(5));
    }

    #[test]
    fn no_delay_once_retries_exhausted() {
        let policy = RetryPolicy::fixed_delay(2, Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(2), Duration::ZERO);
    }

    #[test]
    fn should_retry_respects_enabled_flag() {
        let mut policy = RetryPolicy::exponential_default();
        assert!(policy.should_retry(0));
        policy.enabled = false;
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let policy = RetryPolicy::fixed_delay(2, Duration::from_secs(1));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn strategy_parses_from_wire_string() {
        use std::str::FromStr;
        assert_eq!(RetryStrategy::from_str("exponential").unwrap(), RetryStrategy::Exponential);
        assert!(RetryStrategy::from_str("bogus").is_err());
    }

    #[test]
    fn serde_round_trip() {
        let policy = RetryPolicy::exponential_default();
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }
}
