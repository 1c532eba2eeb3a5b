//! Commit with bounded retry
//!
//! Every state-mutating engine operation is committed through
//! [`SaveOrchestrator::save_with_retry`]. The orchestrator knows nothing about
//! what is being committed: it calls [`Commit::commit`] once, then retries up to
//! `max_retries` times with a wait computed from the [`WaitPattern`]. When all
//! attempts fail, the **last** failure is returned inside `Error::SaveExhausted`.
//!
//! Cancellation is checked at attempt boundaries only. A commit in flight
//! or a backoff sleep that has started always runs to completion.

use crate::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Wait used when the configured base is not positive
pub const DEFAULT_WAIT_SECONDS: u64 = 30;

/// Backoff shape between commit retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum WaitPattern {
    /// `base`
    #[default]
    Equal,
    /// `base * attempt`
    Progressive,
    /// `base * (attempt + rand[1, 10])`
    RandomlyProgressive,
}

impl WaitPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "Equal",
            Self::Progressive => "Progressive",
            Self::RandomlyProgressive => "RandomlyProgressive",
        }
    }
}

impl std::str::FromStr for WaitPattern {
    type Err = Error;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "equal" | "0" => Ok(Self::Equal),
            "progressive" | "1" => Ok(Self::Progressive),
            "randomlyprogressive" | "randomly_progressive" | "2" => Ok(Self::RandomlyProgressive),
            other => Err(Error::Config(format!(
                "unknown retry wait pattern '{}'; expected Equal, Progressive or RandomlyProgressive",
                other
            ))),
        }
    }
}

/// Retry policy for one operation invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub wait_pattern: WaitPattern,
    /// Base wait in seconds
    pub base_wait_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            wait_pattern: WaitPattern::Equal,
            base_wait_seconds: DEFAULT_WAIT_SECONDS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait_pattern: WaitPattern, base_wait_seconds: u64) -> Self {
        Self {
            max_retries,
            wait_pattern,
            base_wait_seconds,
        }
    }

    fn base(&self) -> u64 {
        if self.base_wait_seconds > 0 {
            self.base_wait_seconds
        } else {
            DEFAULT_WAIT_SECONDS
        }
    }

    /// Wait before retry number `attempt` (1-based) with an explicit jitter
    /// factor for the randomly progressive pattern.
    pub fn wait_seconds_with_jitter(&self, attempt: u32, jitter: u64) -> u64 {
        let base = self.base();
        match self.wait_pattern {
            WaitPattern::Equal => base,
            WaitPattern::Progressive => base * attempt as u64,
            WaitPattern::RandomlyProgressive => base * (attempt as u64 + jitter),
        }
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn wait_time(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(1..=10);
        Duration::from_secs(self.wait_seconds_with_jitter(attempt, jitter))
    }
}

/// A retryable commit
#[async_trait]
pub trait Commit: Send {
    async fn commit(&mut self) -> Result<()>;
}

/// Runs commits under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct SaveOrchestrator {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl SaveOrchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop retrying once `cancel` fires. The next attempt boundary returns `Error::Cancelled`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Commit `target`, retrying failures per the policy.
    pub async fn save_with_retry<C: Commit + ?Sized>(&self, target: &mut C) -> Result<()> {
        let mut last_error = match target.commit().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        for attempt in 1..=self.policy.max_retries {
            if self.cancel.is_cancelled() {
                warn!(attempt, error = %last_error, "Commit retry cancelled");
                return Err(Error::Cancelled);
            }

            let wait = self.policy.wait_time(attempt);
            metrics::counter!(
                "tabulon_save_retries_total",
                "pattern" => self.policy.wait_pattern.as_str()
            )
            .increment(1);
            metrics::histogram!(
                "tabulon_save_backoff_seconds",
                "pattern" => self.policy.wait_pattern.as_str()
            )
            .record(wait.as_secs_f64());
            warn!(
                attempt,
                max_retries = self.policy.max_retries,
                wait_secs = wait.as_secs(),
                transient = last_error.is_transient(),
                error = %last_error,
                "Commit failed, retrying"
            );
            tokio::time::sleep(wait).await;

            if self.cancel.is_cancelled() {
                warn!(attempt, error = %last_error, "Commit retry cancelled");
                return Err(Error::Cancelled);
            }

            match target.commit().await {
                Ok(()) => {
                    debug!(attempt, "Commit succeeded after retry");
                    return Ok(());
                }
                Err(e) => last_error = e,
            }
        }

        let attempts = self.policy.max_retries + 1;
        metrics::counter!("tabulon_save_exhausted_total").increment(1);
        Err(Error::SaveExhausted {
            attempts,
            source: Box::new(last_error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    /// Fails the first `failures` commits, each with a numbered error.
    struct FlakyCommit {
        failures: u32,
        calls: u32,
        call_times: Vec<Instant>,
    }

    impl FlakyCommit {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: 0,
                call_times: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Commit for FlakyCommit {
        async fn commit(&mut self) -> Result<()> {
            self.calls += 1;
            self.call_times.push(Instant::now());
            if self.calls <= self.failures {
                Err(Error::TransientCommit(format!("failure {}", self.calls)))
            } else {
                Ok(())
            }
        }
    }

    fn gaps(times: &[Instant]) -> Vec<u64> {
        times
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try_makes_one_call() {
        let saver = SaveOrchestrator::new(RetryPolicy::new(3, WaitPattern::Equal, 30));
        let mut commit = FlakyCommit::new(0);
        saver.save_with_retry(&mut commit).await.unwrap();
        assert_eq!(commit.calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_failure() {
        let saver = SaveOrchestrator::new(RetryPolicy::new(2, WaitPattern::Equal, 30));
        let mut commit = FlakyCommit::new(u32::MAX);
        let err = saver.save_with_retry(&mut commit).await.unwrap_err();

        assert_eq!(commit.calls, 3);
        match err {
            Error::SaveExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, Error::TransientCommit(ref m) if m == "failure 3"));
            }
            other => panic!("expected SaveExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_single_attempt() {
        let saver = SaveOrchestrator::new(RetryPolicy::default());
        let mut commit = FlakyCommit::new(1);
        let err = saver.save_with_retry(&mut commit).await.unwrap_err();
        assert_eq!(commit.calls, 1);
        assert!(matches!(err, Error::SaveExhausted { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_success() {
        let saver = SaveOrchestrator::new(RetryPolicy::new(5, WaitPattern::Equal, 1));
        let mut commit = FlakyCommit::new(2);
        saver.save_with_retry(&mut commit).await.unwrap();
        assert_eq!(commit.calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_pattern_waits_constant() {
        let saver = SaveOrchestrator::new(RetryPolicy::new(3, WaitPattern::Equal, 30));
        let mut commit = FlakyCommit::new(3);
        saver.save_with_retry(&mut commit).await.unwrap();
        assert_eq!(gaps(&commit.call_times), vec![30, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progressive_pattern_waits_increase() {
        let saver = SaveOrchestrator::new(RetryPolicy::new(3, WaitPattern::Progressive, 10));
        let mut commit = FlakyCommit::new(3);
        saver.save_with_retry(&mut commit).await.unwrap();
        assert_eq!(gaps(&commit.call_times), vec![10, 20, 30]);
    }

    #[test]
    fn test_randomly_progressive_bounds() {
        let policy = RetryPolicy::new(5, WaitPattern::RandomlyProgressive, 2);
        assert_eq!(policy.wait_seconds_with_jitter(3, 1), 8);
        assert_eq!(policy.wait_seconds_with_jitter(3, 10), 26);
        for _ in 0..100 {
            let secs = policy.wait_time(3).as_secs();
            assert!((8..=26).contains(&secs), "wait {} out of range", secs);
        }
    }

    #[test]
    fn test_non_positive_base_uses_default() {
        let policy = RetryPolicy::new(1, WaitPattern::Equal, 0);
        assert_eq!(policy.wait_time(1), Duration::from_secs(DEFAULT_WAIT_SECONDS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_next_attempt() {
        let cancel = CancellationToken::new();
        let saver = SaveOrchestrator::new(RetryPolicy::new(5, WaitPattern::Equal, 1))
            .with_cancellation(cancel.clone());
        cancel.cancel();

        let mut commit = FlakyCommit::new(u32::MAX);
        let err = saver.save_with_retry(&mut commit).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(commit.calls, 1);
    }

    #[test]
    fn test_wait_pattern_from_str() {
        assert_eq!("progressive".parse::<WaitPattern>().unwrap(), WaitPattern::Progressive);
        assert_eq!(
            "RandomlyProgressive".parse::<WaitPattern>().unwrap(),
            WaitPattern::RandomlyProgressive
        );
        assert!("exponential".parse::<WaitPattern>().is_err());
    }
}
