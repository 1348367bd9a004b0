//! Bounded Polling
//!
//! One primitive for every "retry until predicate or budget exhausted"
//! wait in the engine.
//!
//! ## Semantics
//!
//! - At most `max_attempts` evaluations of the predicate.
//! - Each attempt is bounded by `per_attempt_timeout`; an overrun counts as
//!   a failed attempt.
//! - The poller sleeps `interval` after every failed attempt, the last one
//!   included, so an exhausted poll takes roughly
//!   `max_attempts × interval` plus predicate time.
//! - Transient predicate errors ([`SurveyorError::is_transient`]) count as
//!   failed attempts; anything else aborts and propagates.
//! - Exhaustion is a value ([`PollOutcome::TimedOut`]), not an error.

use crate::result::{SurveyorError, SurveyorResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

// =============================================================================
// POLICY
// =============================================================================

/// Attempt budget for a bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Maximum number of predicate evaluations (at least 1)
    pub max_attempts: u32,
    /// Pause after each failed attempt
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
    /// Upper bound on a single evaluation
    #[serde(rename = "per_attempt_timeout_ms", with = "millis")]
    pub per_attempt_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::existence()
    }
}

impl PollPolicy {
    /// Create a validated policy
    ///
    /// # Errors
    ///
    /// Returns [`SurveyorError::Config`] if `max_attempts` is zero or
    /// `per_attempt_timeout` is zero.
    pub fn new(
        max_attempts: u32,
        interval: Duration,
        per_attempt_timeout: Duration,
    ) -> SurveyorResult<Self> {
        let policy = Self {
            max_attempts,
            interval,
            per_attempt_timeout,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check the policy invariants
    ///
    /// # Errors
    ///
    /// Returns [`SurveyorError::Config`] on a zero attempt count or timeout.
    pub fn validate(&self) -> SurveyorResult<()> {
        if self.max_attempts == 0 {
            return Err(SurveyorError::config("max_attempts must be at least 1"));
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(SurveyorError::config(
                "per_attempt_timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Set the attempt count
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the pause between attempts
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the per-attempt bound
    #[must_use]
    pub const fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    /// Short existence wait for element lookup (10 × 500 ms)
    #[must_use]
    pub const fn existence() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(500),
            per_attempt_timeout: Duration::from_secs(2),
        }
    }

    /// Wait for a mutation to be reflected in the UI (15 × 200 ms)
    #[must_use]
    pub const fn post_condition() -> Self {
        Self {
            max_attempts: 15,
            interval: Duration::from_millis(200),
            per_attempt_timeout: Duration::from_secs(2),
        }
    }

    /// Stepper convergence, one reload per attempt (15 × 2 s)
    #[must_use]
    pub const fn stepper() -> Self {
        Self {
            max_attempts: 15,
            interval: Duration::from_secs(2),
            per_attempt_timeout: Duration::from_secs(8),
        }
    }

    /// Review decision convergence, one reload per attempt (15 × 3 s)
    #[must_use]
    pub const fn review() -> Self {
        Self {
            max_attempts: 15,
            interval: Duration::from_secs(3),
            per_attempt_timeout: Duration::from_secs(6),
        }
    }

    /// External inbox delivery (10 × 10 s)
    #[must_use]
    pub const fn inbox() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(10),
            per_attempt_timeout: Duration::from_secs(30),
        }
    }

    /// First control of an embedded widget (6 × 500 ms)
    #[must_use]
    pub const fn handshake() -> Self {
        Self {
            max_attempts: 6,
            interval: Duration::from_millis(500),
            per_attempt_timeout: Duration::from_secs(3),
        }
    }

    /// Progress indicator lifetime (20 × 500 ms)
    #[must_use]
    pub const fn loading_mask() -> Self {
        Self {
            max_attempts: 20,
            interval: Duration::from_millis(500),
            per_attempt_timeout: Duration::from_secs(2),
        }
    }

    /// Re-read text until it settles (3 × 2 s)
    #[must_use]
    pub const fn text_convergence() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(2),
            per_attempt_timeout: Duration::from_secs(5),
        }
    }

    /// Upper bound on a poll's wall time when the predicate never returns early
    ///
    /// Saturates at [`Duration::MAX`].
    #[must_use]
    pub fn worst_case(&self) -> Duration {
        self.interval
            .checked_add(self.per_attempt_timeout)
            .and_then(|round| round.checked_mul(self.max_attempts))
            .unwrap_or(Duration::MAX)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Result of a bounded poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The predicate produced a value
    Success {
        /// Produced value
        value: T,
        /// Attempts used, including the successful one
        attempts: u32,
        /// Time since the poll started
        elapsed: Duration,
    },
    /// The attempt budget was exhausted
    TimedOut {
        /// Attempts performed
        attempts: u32,
        /// Time since the poll started
        elapsed: Duration,
        /// Last transient error or overrun, if any
        last_error: Option<String>,
    },
}

impl<T> PollOutcome<T> {
    /// Whether the predicate succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Attempts performed
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::TimedOut { attempts, .. } => *attempts,
        }
    }

    /// Time spent polling
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        match self {
            Self::Success { elapsed, .. } | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }

    /// The produced value, if any
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::TimedOut { .. } => None,
        }
    }

    /// Convert exhaustion into a caller-chosen error
    ///
    /// # Errors
    ///
    /// Returns the error built by `on_timeout` when the poll timed out.
    pub fn into_result<F>(self, on_timeout: F) -> SurveyorResult<T>
    where
        F: FnOnce(u32, Duration, Option<String>) -> SurveyorError,
    {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::TimedOut {
                attempts,
                elapsed,
                last_error,
            } => Err(on_timeout(attempts, elapsed, last_error)),
        }
    }

    /// Convert exhaustion into [`SurveyorError::TimedOut`]
    ///
    /// # Errors
    ///
    /// Returns [`SurveyorError::TimedOut`] when the poll timed out.
    pub fn or_timed_out(self, waited_for: impl Into<String>) -> SurveyorResult<T> {
        let waited_for = waited_for.into();
        self.into_result(|attempts, elapsed, _| SurveyorError::TimedOut {
            waited_for,
            attempts,
            elapsed,
        })
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// Runs a predicate under a [`PollPolicy`]
///
/// ```ignore
/// let outcome = Poller::new(PollPolicy::inbox())
///     .describe("welcome email")
///     .poll(|_| async { inbox.search(to, &query).await.map(|ids| ids.into_iter().next()) })
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Poller {
    policy: PollPolicy,
    description: String,
}

impl Poller {
    /// Create a poller
    #[must_use]
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            description: String::from("condition"),
        }
    }

    /// Name the awaited condition for logs
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The policy in force
    #[must_use]
    pub const fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Evaluate `attempt` until it yields `Some`, or the budget is spent.
    ///
    /// The closure receives the 1-based attempt number, so it can refresh
    /// the view before evaluating.
    ///
    /// # Errors
    ///
    /// Propagates the first non-transient error returned by `attempt`.
    pub async fn poll<T, F, Fut>(&self, mut attempt: F) -> SurveyorResult<PollOutcome<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SurveyorResult<Option<T>>>,
    {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for n in 1..=max_attempts {
            match tokio::time::timeout(self.policy.per_attempt_timeout, attempt(n)).await {
                Ok(Ok(Some(value))) => {
                    trace!(what = %self.description, attempt = n, "poll satisfied");
                    return Ok(PollOutcome::Success {
                        value,
                        attempts: n,
                        elapsed: start.elapsed(),
                    });
                }
                Ok(Ok(None)) => {
                    trace!(what = %self.description, attempt = n, "poll not yet satisfied");
                }
                Ok(Err(e)) if e.is_transient() => {
                    trace!(what = %self.description, attempt = n, error = %e, "transient error");
                    last_error = Some(e.to_string());
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    trace!(what = %self.description, attempt = n, "attempt overran");
                    last_error = Some(format!(
                        "attempt {n} exceeded {:?}",
                        self.policy.per_attempt_timeout
                    ));
                }
            }
            tokio::time::sleep(self.policy.interval).await;
        }

        let elapsed = start.elapsed();
        debug!(
            what = %self.description,
            attempts = max_attempts,
            ?elapsed,
            "poll exhausted"
        );
        Ok(PollOutcome::TimedOut {
            attempts: max_attempts,
            elapsed,
            last_error,
        })
    }

    /// Poll a boolean condition
    ///
    /// # Errors
    ///
    /// Propagates the first non-transient error returned by `condition`.
    pub async fn until<F, Fut>(&self, mut condition: F) -> SurveyorResult<PollOutcome<()>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SurveyorResult<bool>>,
    {
        self.poll(|n| {
            let fut = condition(n);
            async move { fut.await.map(|ok| ok.then_some(())) }
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn paused_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
    }

    /// Poll that succeeds on attempt `succeed_on` (never when 0)
    async fn run(policy: PollPolicy, succeed_on: u32) -> (PollOutcome<u32>, u32) {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let outcome = Poller::new(policy)
            .poll(|n| async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Ok((n == succeed_on).then_some(n))
            })
            .await
            .unwrap();
        (outcome, calls.load(Ordering::SeqCst))
    }

    mod policy_tests {
        use super::*;

        #[test]
        fn test_new_rejects_zero_attempts() {
            let err = PollPolicy::new(0, Duration::from_secs(1), Duration::from_secs(1));
            assert!(matches!(err, Err(SurveyorError::Config { .. })));
        }

        #[test]
        fn test_new_rejects_zero_timeout() {
            let err = PollPolicy::new(3, Duration::from_secs(1), Duration::ZERO);
            assert!(err.is_err());
        }

        #[test]
        fn test_named_defaults() {
            let inbox = PollPolicy::inbox();
            assert_eq!(inbox.max_attempts, 10);
            assert_eq!(inbox.interval, Duration::from_secs(10));
            assert!(PollPolicy::existence().validate().is_ok());
            assert!(PollPolicy::stepper().worst_case() > Duration::from_secs(30));
        }

        #[test]
        fn test_worst_case_saturates() {
            let policy = PollPolicy::inbox()
                .with_max_attempts(100_000)
                .with_interval(Duration::from_millis(u64::MAX));
            assert_eq!(policy.worst_case(), Duration::MAX);
        }

        #[test]
        fn test_serde_uses_milliseconds() {
            let json = serde_json::to_value(PollPolicy::handshake()).unwrap();
            assert_eq!(json["interval_ms"], 500);
            assert_eq!(json["per_attempt_timeout_ms"], 3000);
            let back: PollPolicy = serde_json::from_value(json).unwrap();
            assert_eq!(back, PollPolicy::handshake());
        }
    }

    mod poller_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_success_on_third_attempt() {
            let policy = PollPolicy::existence().with_interval(Duration::from_secs(1));
            let (outcome, calls) = run(policy, 3).await;
            assert!(outcome.is_success());
            assert_eq!(outcome.attempts(), 3);
            assert_eq!(calls, 3);
            assert!(outcome.elapsed() >= Duration::from_secs(2));
            assert!(outcome.elapsed() < Duration::from_secs(3));
        }

        #[tokio::test(start_paused = true)]
        async fn test_inbox_budget_elapses_about_100_seconds() {
            let (outcome, calls) = run(PollPolicy::inbox(), 0).await;
            assert!(!outcome.is_success());
            assert_eq!(calls, 10);
            assert_eq!(outcome.attempts(), 10);
            assert!(outcome.elapsed() >= Duration::from_secs(100));
            assert!(outcome.elapsed() < Duration::from_secs(101));
        }

        #[tokio::test(start_paused = true)]
        async fn test_transient_errors_count_as_attempts() {
            let policy = PollPolicy::post_condition().with_max_attempts(3);
            let outcome: PollOutcome<()> = Poller::new(policy)
                .poll(|_| async { Err(SurveyorError::surface("detached")) })
                .await
                .unwrap();
            match outcome {
                PollOutcome::TimedOut {
                    attempts,
                    last_error,
                    ..
                } => {
                    assert_eq!(attempts, 3);
                    assert!(last_error.unwrap().contains("detached"));
                }
                PollOutcome::Success { .. } => panic!("expected timeout"),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_structural_errors_abort() {
            let calls = AtomicU32::new(0);
            let calls_ref = &calls;
            let result: SurveyorResult<PollOutcome<()>> = Poller::new(PollPolicy::existence())
                .poll(|_| async move {
                    calls_ref.fetch_add(1, Ordering::SeqCst);
                    Err(SurveyorError::QuestionNotFound {
                        question: "Q".into(),
                    })
                })
                .await;
            assert!(matches!(result, Err(SurveyorError::QuestionNotFound { .. })));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_overrunning_attempt_counts_as_failed() {
            let policy = PollPolicy::new(2, Duration::from_millis(100), Duration::from_secs(1)).unwrap();
            let outcome = Poller::new(policy)
                .poll(|n| async move {
                    if n == 1 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(Some(n))
                })
                .await
                .unwrap();
            assert_eq!(outcome.attempts(), 2);
            assert_eq!(outcome.into_value(), Some(2));
        }

        #[tokio::test(start_paused = true)]
        async fn test_until_and_into_result() {
            let flips = AtomicU32::new(0);
            let flips_ref = &flips;
            let outcome = Poller::new(PollPolicy::post_condition())
                .until(|_| async move { Ok(flips_ref.fetch_add(1, Ordering::SeqCst) >= 1) })
                .await
                .unwrap();
            assert_eq!(outcome.attempts(), 2);

            let timed_out: PollOutcome<()> = PollOutcome::TimedOut {
                attempts: 4,
                elapsed: Duration::from_secs(8),
                last_error: None,
            };
            let err = timed_out.or_timed_out("status cell").unwrap_err();
            assert!(err.is_timeout());
            assert!(err.to_string().contains("status cell"));
        }
    }

    proptest! {
        /// A predicate that first holds on attempt k <= max succeeds after exactly k attempts
        #[test]
        fn prop_converges_on_first_true_attempt(max in 1u32..12, k in 1u32..12, interval_ms in 1u64..2000) {
            prop_assume!(k <= max);
            let policy = PollPolicy::new(max, Duration::from_millis(interval_ms), Duration::from_secs(1)).unwrap();
            let (outcome, calls) = paused_runtime().block_on(run(policy, k));
            prop_assert!(outcome.is_success());
            prop_assert_eq!(outcome.attempts(), k);
            prop_assert_eq!(calls, k);
            let expected = Duration::from_millis(interval_ms) * (k - 1);
            prop_assert!(outcome.elapsed() >= expected);
            prop_assert!(outcome.elapsed() < expected + Duration::from_millis(interval_ms));
        }

        /// A predicate that never holds is evaluated exactly max times
        #[test]
        fn prop_exhaustion_count(max in 1u32..12, interval_ms in 1u64..2000) {
            let policy = PollPolicy::new(max, Duration::from_millis(interval_ms), Duration::from_secs(1)).unwrap();
            let (outcome, calls) = paused_runtime().block_on(run(policy, 0));
            prop_assert!(!outcome.is_success());
            prop_assert_eq!(calls, max);
            prop_assert_eq!(outcome.attempts(), max);
            prop_assert!(outcome.elapsed() >= Duration::from_millis(interval_ms) * max);
        }
    }
}
