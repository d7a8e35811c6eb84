use crate::error::ChainError;
use crate::outcome::Outcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::error;

type Callback<T, E> = Box<dyn FnOnce(Outcome<T, E>) + Send>;

/// Continuation handed to a step.
///
/// A step reports its result by calling [`Next::call`] (or one of the
/// shorthands) exactly once. Calling consumes the handle, so a second call
/// does not compile. The call may happen synchronously inside the step or
/// later, from another task or thread.
///
/// Dropping a `Next` without calling it abandons the chain: nothing after
/// the step runs and the terminal callback is dropped uninvoked. The drop is
/// reported at `error` level through `tracing`.
///
/// # Examples
///
/// ```
/// use tsunagi::{Next, Outcome};
/// use std::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel();
/// let next: Next<i32, String> = Next::new(move |outcome| {
///     tx.send(outcome).ok();
/// });
///
/// next.success(42);
/// assert_eq!(rx.recv().ok(), Some(Outcome::Success(42)));
/// ```
pub struct Next<T, E> {
    callback: Option<Callback<T, E>>,
    report_drop: bool,
}

impl<T, E> Next<T, E> {
    /// Wraps a callback as a continuation.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Outcome<T, E>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            report_drop: true,
        }
    }

    /// A continuation whose drop is reported by its owner instead.
    pub(crate) fn silent<F>(callback: F) -> Self
    where
        F: FnOnce(Outcome<T, E>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            report_drop: false,
        }
    }

    /// Hands `outcome` to the rest of the chain.
    pub fn call(mut self, outcome: Outcome<T, E>) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }

    /// Shorthand for `call(Outcome::success(value))`.
    pub fn success(self, value: T) {
        self.call(Outcome::Success(value));
    }

    /// Shorthand for `call(Outcome::failure(error))`.
    pub fn failure(self, error: E) {
        self.call(Outcome::Failure(error));
    }
}

impl<T, E> Drop for Next<T, E> {
    fn drop(&mut self) {
        if self.report_drop && self.callback.is_some() {
            error!("Continuation dropped without being invoked; the chain will not complete");
        }
    }
}

impl<T, E> fmt::Debug for Next<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// A unit of work that receives the previous outcome.
///
/// Used by [`Chain::then`](crate::Chain::then) and
/// [`Chain::catch_error`](crate::Chain::catch_error). Any closure of the shape
/// `Fn(Next<O, E>, Outcome<I, E>)` is a step.
///
/// # Contract
///
/// `run` must invoke `next` exactly once, either before returning or later.
/// The step may keep state across invocations (counters, caches), but it
/// must be `Send + Sync` because a chain can resume on another thread.
///
/// # Examples
///
/// ```
/// use tsunagi::{Next, Outcome, Step};
///
/// struct AddFive;
///
/// impl Step<i32, i32, String> for AddFive {
///     fn run(&self, next: Next<i32, String>, input: Outcome<i32, String>) {
///         match input {
///             Outcome::Success(value) => next.success(value + 5),
///             Outcome::Failure(error) => next.failure(error),
///         }
///     }
/// }
/// ```
pub trait Step<I, O, E>: Send + Sync {
    /// Runs the step and eventually reports through `next`.
    fn run(&self, next: Next<O, E>, input: Outcome<I, E>);
}

impl<F, I, O, E> Step<I, O, E> for F
where
    F: Fn(Next<O, E>, Outcome<I, E>) + Send + Sync,
{
    fn run(&self, next: Next<O, E>, input: Outcome<I, E>) {
        self(next, input)
    }
}

/// A unit of work that receives its 0-based attempt index.
///
/// Used by the retrying wrappers ([`Chain::then_with_retry`](crate::Chain::then_with_retry)
/// and friends). Any closure of the shape `Fn(Next<O, E>, u32)` is a retry step.
/// The contract is the same as [`Step`]: invoke `next` exactly once per attempt.
///
/// # Ordering
///
/// When a [`Step`] invokes `next`, the rest of the chain runs inside that
/// call. A retry step's outcome is only acted on once its `run` returns, so
/// code after a synchronous `next.call(..)` runs before any reattempt and
/// before the following stages. An outcome reported after `run` returned is
/// handled right away, inside the call.
pub trait RetryStep<O, E>: Send + Sync {
    /// Runs attempt number `attempt` and eventually reports through `next`.
    fn run(&self, next: Next<O, E>, attempt: u32);
}

impl<F, O, E> RetryStep<O, E> for F
where
    F: Fn(Next<O, E>, u32) + Send + Sync,
{
    fn run(&self, next: Next<O, E>, attempt: u32) {
        self(next, attempt)
    }
}

/// Retry policy for a retrying wrapper.
///
/// Defines how many times a failing step is reattempted and how long the
/// scheduler should wait before each reattempt. Supports no retry, fixed
/// delay, and exponential backoff strategies.
///
/// Policies are plain data and can be loaded from configuration:
///
/// ```
/// use tsunagi::RetryPolicy;
/// use std::time::Duration;
///
/// let policy: RetryPolicy = serde_json::from_str(
///     r#"{"kind":"fixed","max_retries":3,"delay":{"secs":1,"nanos":0}}"#,
/// )
/// .unwrap();
/// assert_eq!(policy, RetryPolicy::fixed(3, Duration::from_secs(1)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// No retry - forward the first failure.
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Delay before each retry
        delay: Duration,
    },
    /// Exponential backoff with configurable parameters.
    ExponentialBackoff {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Delay before the first retry
        initial_delay: Duration,
        /// Maximum delay cap
        max_delay: Duration,
        /// Multiplier for each retry (e.g., 2 doubles the delay)
        multiplier: u32,
    },
}

impl RetryPolicy {
    /// Creates a fixed retry policy.
    ///
    /// Retries the step up to `max_retries` times with a constant `delay`
    /// before each reattempt.
    ///
    /// ```
    /// use tsunagi::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
    /// assert_eq!(policy.max_retries(), 3);
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_secs(1)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(1)));
    /// ```
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Creates an exponential backoff policy with `multiplier=2` and
    /// `max_delay=60s`.
    ///
    /// ```
    /// use tsunagi::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
    ///
    /// // Delays: 100ms, 200ms, 400ms, 800ms, 1600ms
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(200)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
    /// ```
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Creates an exponential backoff policy with custom settings.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidRetryPolicy`] if:
    /// - `multiplier` is 0 (would result in no backoff)
    /// - `multiplier` is greater than 10
    /// - `max_delay` is less than `initial_delay`
    ///
    /// ```
    /// use tsunagi::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential_backoff(
    ///     5,
    ///     Duration::from_millis(100),
    ///     Duration::from_secs(30),
    ///     3,
    /// )?;
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(300)));
    /// # Ok::<(), tsunagi::ChainError>(())
    /// ```
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, ChainError> {
        if multiplier == 0 {
            return Err(ChainError::InvalidRetryPolicy(
                "multiplier must be greater than 0",
            ));
        }
        if multiplier > 10 {
            return Err(ChainError::InvalidRetryPolicy(
                "multiplier must be 10 or less",
            ));
        }
        if max_delay < initial_delay {
            return Err(ChainError::InvalidRetryPolicy(
                "max_delay must be >= initial_delay",
            ));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Returns the maximum number of retries for this policy.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. } => *max_retries,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed) before the
    /// next one.
    ///
    /// Returns `None` for [`RetryPolicy::None`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = multiplier.saturating_pow(attempt);
                Some(initial_delay.saturating_mul(factor).min(*max_delay))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{mpsc, Arc};

    #[test]
    fn test_next_delivers_outcome() {
        let (tx, rx) = mpsc::channel();
        let next: Next<u8, String> = Next::new(move |outcome| {
            tx.send(outcome).ok();
        });
        next.failure("boom".to_string());
        assert_eq!(rx.recv().ok(), Some(Outcome::Failure("boom".to_string())));
    }

    #[test]
    fn test_dropped_next_never_calls_back() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let next: Next<u8, String> = Next::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(next);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_closure_is_step() {
        let step = |next: Next<i32, String>, input: Outcome<i32, String>| match input {
            Outcome::Success(v) => next.success(v * 2),
            Outcome::Failure(e) => next.failure(e),
        };
        let (tx, rx) = mpsc::channel();
        Step::run(
            &step,
            Next::new(move |o| {
                tx.send(o).ok();
            }),
            Outcome::success(21),
        );
        assert_eq!(rx.recv().ok(), Some(Outcome::Success(42)));
    }

    #[test]
    fn test_closure_is_retry_step() {
        let step = |next: Next<u32, String>, attempt: u32| next.success(attempt);
        let (tx, rx) = mpsc::channel();
        RetryStep::run(
            &step,
            Next::new(move |o| {
                tx.send(o).ok();
            }),
            7,
        );
        assert_eq!(rx.recv().ok(), Some(Outcome::Success(7)));
    }

    #[test]
    fn test_retry_policy_none() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.max_retries(), 0);
        assert_eq!(policy.delay_for_attempt(0), None);
    }

    #[test]
    fn test_retry_policy_fixed() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_retry_policy_exponential() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
        };
        assert_eq!(policy.max_retries(), 5);
        assert_eq!(
            policy.delay_for_attempt(0),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            policy.delay_for_attempt(2),
            Some(Duration::from_millis(400))
        );
        // capped at max_delay
        assert_eq!(policy.delay_for_attempt(10), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_retry_policy_exponential_backoff_validation() {
        let result = RetryPolicy::exponential_backoff(
            3,
            Duration::from_millis(100),
            Duration::from_secs(10),
            2,
        );
        assert!(result.is_ok());

        let result = RetryPolicy::exponential_backoff(
            3,
            Duration::from_millis(100),
            Duration::from_secs(10),
            0,
        );
        assert!(matches!(
            result,
            Err(ChainError::InvalidRetryPolicy("multiplier must be greater than 0"))
        ));

        let result = RetryPolicy::exponential_backoff(
            3,
            Duration::from_millis(100),
            Duration::from_secs(10),
            11,
        );
        assert!(matches!(
            result,
            Err(ChainError::InvalidRetryPolicy("multiplier must be 10 or less"))
        ));

        let result = RetryPolicy::exponential_backoff(
            3,
            Duration::from_secs(10),
            Duration::from_millis(100),
            2,
        );
        assert!(matches!(
            result,
            Err(ChainError::InvalidRetryPolicy("max_delay must be >= initial_delay"))
        ));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{
                "kind": "exponential_backoff",
                "max_retries": 4,
                "initial_delay": {"secs": 0, "nanos": 50000000},
                "max_delay": {"secs": 1, "nanos": 0},
                "multiplier": 3
            }"#,
        )
        .unwrap();
        assert_eq!(policy.max_retries(), 4);
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(150)));

        let none: RetryPolicy = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert_eq!(none, RetryPolicy::default());
    }
}
