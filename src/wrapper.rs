//! Behavioral policies attached to a step.
//!
//! Each wrapper exposes one `dispatch` operation that receives the running
//! outcome and a cursor to the rest of the chain. It decides whether to run
//! its step, skip it, or reattempt it before handing off.

use crate::chain::{lock, unpack, Cursor, Payload};
use crate::outcome::Outcome;
use crate::scheduler::{global_scheduler, Scheduler};
use crate::step::{Next, RetryPolicy, RetryStep, Step};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Describes which policy a stage of a chain applies.
///
/// # Examples
///
/// ```
/// use tsunagi::{Chain, Next, Outcome, StageKind};
///
/// let chain = Chain::<i32, String>::new()
///     .then(|next: Next<i32, String>, _: Outcome<i32, String>| next.success(1))
///     .then_with_retry(2, |next: Next<i32, String>, attempt: u32| next.success(attempt as i32));
///
/// let kinds: Vec<StageKind> = chain.stages().collect();
/// assert_eq!(kinds, vec![StageKind::Direct, StageKind::Retry { max_retries: 2 }]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    /// Runs the step on success, forwards errors untouched.
    Direct,
    /// Runs the step on error, forwards successes untouched.
    Catch,
    /// Reattempts a failing step immediately.
    Retry {
        /// Maximum number of reattempts
        max_retries: u32,
    },
    /// Reattempts a failing step through the scheduler.
    RetryDelayed {
        /// Bound and delays of the reattempts
        policy: RetryPolicy,
    },
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Direct => write!(f, "then"),
            StageKind::Catch => write!(f, "catch_error"),
            StageKind::Retry { max_retries } => write!(f, "retry({})", max_retries),
            StageKind::RetryDelayed { policy } => {
                write!(f, "retry_delayed({})", policy.max_retries())
            }
        }
    }
}

pub(crate) trait Stage<E>: Send + Sync {
    fn kind(&self) -> StageKind;

    fn dispatch(&self, input: Outcome<Payload, E>, cursor: Cursor<E>);
}

pub(crate) struct Direct<S, I, O> {
    step: S,
    _marker: PhantomData<fn(I) -> O>,
}

impl<S, I, O> Direct<S, I, O> {
    pub(crate) fn new(step: S) -> Self {
        Self {
            step,
            _marker: PhantomData,
        }
    }
}

impl<S, I, O, E> Stage<E> for Direct<S, I, O>
where
    S: Step<I, O, E>,
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    fn kind(&self) -> StageKind {
        StageKind::Direct
    }

    fn dispatch(&self, input: Outcome<Payload, E>, cursor: Cursor<E>) {
        match input {
            Outcome::Success(payload) => {
                let value = unpack::<I>(payload);
                Step::run(&self.step, cursor.next::<O>(), Outcome::Success(value));
            }
            Outcome::Failure(error) => {
                debug!("Stage {} skipped after upstream failure", cursor.current());
                cursor.advance(Outcome::Failure(error));
            }
        }
    }
}

pub(crate) struct Catch<S, T> {
    step: S,
    _marker: PhantomData<fn(T) -> T>,
}

impl<S, T> Catch<S, T> {
    pub(crate) fn new(step: S) -> Self {
        Self {
            step,
            _marker: PhantomData,
        }
    }
}

impl<S, T, E> Stage<E> for Catch<S, T>
where
    S: Step<T, T, E>,
    T: Send + 'static,
    E: Send + 'static,
{
    fn kind(&self) -> StageKind {
        StageKind::Catch
    }

    fn dispatch(&self, input: Outcome<Payload, E>, cursor: Cursor<E>) {
        match input {
            Outcome::Success(payload) => cursor.advance(Outcome::Success(payload)),
            Outcome::Failure(error) => {
                debug!("Stage {} recovering from upstream failure", cursor.current());
                Step::run(&self.step, cursor.next::<T>(), Outcome::Failure(error));
            }
        }
    }
}

#[derive(Clone)]
enum Backoff {
    Immediate { max_retries: u32 },
    Delayed(RetryPolicy),
}

impl Backoff {
    fn max_retries(&self) -> u32 {
        match self {
            Backoff::Immediate { max_retries } => *max_retries,
            Backoff::Delayed(policy) => policy.max_retries(),
        }
    }

    /// `None` means reattempt right away.
    fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Backoff::Immediate { .. } => None,
            Backoff::Delayed(policy) => Some(policy.delay_for_attempt(attempt).unwrap_or_default()),
        }
    }
}

pub(crate) struct Retry<S, O> {
    step: Arc<S>,
    backoff: Backoff,
    _marker: PhantomData<fn() -> O>,
}

impl<S, O> Retry<S, O> {
    pub(crate) fn immediate(max_retries: u32, step: S) -> Self {
        Self {
            step: Arc::new(step),
            backoff: Backoff::Immediate { max_retries },
            _marker: PhantomData,
        }
    }

    pub(crate) fn delayed(policy: RetryPolicy, step: S) -> Self {
        Self {
            step: Arc::new(step),
            backoff: Backoff::Delayed(policy),
            _marker: PhantomData,
        }
    }
}

impl<S, O, E> Stage<E> for Retry<S, O>
where
    S: RetryStep<O, E> + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    fn kind(&self) -> StageKind {
        match &self.backoff {
            Backoff::Immediate { max_retries } => StageKind::Retry {
                max_retries: *max_retries,
            },
            Backoff::Delayed(policy) => StageKind::RetryDelayed {
                policy: policy.clone(),
            },
        }
    }

    fn dispatch(&self, input: Outcome<Payload, E>, cursor: Cursor<E>) {
        if let Outcome::Failure(error) = input {
            debug!("Stage {} skipped after upstream failure", cursor.current());
            cursor.advance(Outcome::Failure(error));
            return;
        }
        let attempts = Attempts {
            step: Arc::clone(&self.step),
            backoff: self.backoff.clone(),
            scheduler: cursor.scheduler(),
            stage: cursor.current(),
            next: cursor.next::<O>(),
        };
        attempts.start(0);
    }
}

/// State of one retry run, moved between the attempt loop, the step's
/// continuation and the scheduler.
struct Attempts<S, O, E> {
    step: Arc<S>,
    backoff: Backoff,
    scheduler: Option<Arc<dyn Scheduler>>,
    stage: usize,
    next: Next<O, E>,
}

enum Slot<S, O, E> {
    /// The step is still on the stack and has not reported.
    Running,
    /// The step reported before returning.
    Settled(Outcome<O, E>),
    /// The step returned without reporting; its continuation resumes the run.
    Detached(Attempts<S, O, E>, u32),
    Closed,
}

/// Handoff between a delayed reattempt and the call that scheduled it.
enum Handoff<A> {
    /// `schedule` has not returned yet.
    Scheduling,
    /// The task fired inside `schedule`; the caller runs the attempt.
    Fired(A),
    /// `schedule` returned first; the task runs the attempt itself.
    Waiting,
}

impl<S, O, E> Attempts<S, O, E>
where
    S: RetryStep<O, E> + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    /// Runs attempts starting at `attempt`.
    ///
    /// Steps that report synchronously are reattempted by this loop, so a
    /// long run of immediate retries keeps a flat stack.
    fn start(mut self, mut attempt: u32) {
        loop {
            let slot = Arc::new(Mutex::new(Slot::Running));
            let reporter = Arc::clone(&slot);
            let next = Next::silent(move |outcome| Self::report(&reporter, outcome));
            RetryStep::run(self.step.as_ref(), next, attempt);

            let settled = {
                let mut guard = lock(&slot);
                match mem::replace(&mut *guard, Slot::Closed) {
                    Slot::Settled(outcome) => outcome,
                    Slot::Running => {
                        *guard = Slot::Detached(self, attempt);
                        return;
                    }
                    Slot::Detached(..) | Slot::Closed => return,
                }
            };

            match self.resolve(settled, attempt) {
                Some(again) => {
                    self = again;
                    attempt += 1;
                }
                None => return,
            }
        }
    }

    fn report(slot: &Mutex<Slot<S, O, E>>, outcome: Outcome<O, E>) {
        let mut guard = lock(slot);
        match mem::replace(&mut *guard, Slot::Closed) {
            Slot::Running => *guard = Slot::Settled(outcome),
            Slot::Detached(attempts, attempt) => {
                drop(guard);
                if let Some(again) = attempts.resolve(outcome, attempt) {
                    again.start(attempt + 1);
                }
            }
            Slot::Settled(_) | Slot::Closed => {}
        }
    }

    /// Forwards a terminal outcome, or schedules the next attempt.
    ///
    /// Returns `Some` when the next attempt should run on the caller's stack.
    fn resolve(self, outcome: Outcome<O, E>, attempt: u32) -> Option<Self> {
        let max_retries = self.backoff.max_retries();
        if outcome.is_success() {
            debug!("Stage {} succeeded on attempt {}", self.stage, attempt);
            self.next.call(outcome);
            return None;
        }
        if attempt >= max_retries {
            warn!("Stage {} failed after {} retries", self.stage, attempt);
            self.next.call(outcome);
            return None;
        }

        info!(
            "Stage {} failed, retrying ({}/{})",
            self.stage,
            attempt + 1,
            max_retries
        );
        match self.backoff.delay(attempt) {
            None => Some(self),
            Some(delay) => self.schedule(attempt + 1, delay),
        }
    }

    /// Submits attempt `attempt` to the scheduler.
    ///
    /// A scheduler that runs the task before returning hands the attempt
    /// back as `Some`, so it continues on the caller's loop instead of
    /// nesting a new one.
    fn schedule(self, attempt: u32, delay: Duration) -> Option<Self> {
        let scheduler = self.resolve_scheduler();
        let handoff = Arc::new(Mutex::new(Handoff::Scheduling));
        let task_handoff = Arc::clone(&handoff);
        scheduler.schedule(
            Box::new(move || Self::fire(&task_handoff, self, attempt)),
            delay,
        );

        let mut guard = lock(&handoff);
        match mem::replace(&mut *guard, Handoff::Waiting) {
            Handoff::Fired(attempts) => Some(attempts),
            Handoff::Scheduling | Handoff::Waiting => None,
        }
    }

    fn fire(handoff: &Mutex<Handoff<Self>>, attempts: Self, attempt: u32) {
        let mut guard = lock(handoff);
        if matches!(*guard, Handoff::Scheduling) {
            *guard = Handoff::Fired(attempts);
            return;
        }
        drop(guard);
        attempts.start(attempt);
    }

    #[allow(clippy::panic)]
    fn resolve_scheduler(&self) -> Arc<dyn Scheduler> {
        match self.scheduler.clone().or_else(global_scheduler) {
            Some(scheduler) => scheduler,
            None => panic!(
                "stage {} needs a scheduler for a delayed retry; call `set_scheduler` or `Chain::with_scheduler` first",
                self.stage
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::scheduler::ImmediateScheduler;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    #[derive(Clone, Default)]
    struct ErrorCounter(Arc<AtomicU32>);

    impl<S: Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_errors(run: impl FnOnce()) -> u32 {
        let counter = ErrorCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        tracing::subscriber::with_default(subscriber, run);
        counter.0.load(Ordering::SeqCst)
    }

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Direct.to_string(), "then");
        assert_eq!(StageKind::Catch.to_string(), "catch_error");
        assert_eq!(StageKind::Retry { max_retries: 3 }.to_string(), "retry(3)");
        assert_eq!(
            StageKind::RetryDelayed {
                policy: RetryPolicy::fixed(5, Duration::from_secs(1))
            }
            .to_string(),
            "retry_delayed(5)"
        );
    }

    #[test]
    fn test_backoff_delays() {
        let immediate = Backoff::Immediate { max_retries: 2 };
        assert_eq!(immediate.max_retries(), 2);
        assert_eq!(immediate.delay(0), None);

        let delayed = Backoff::Delayed(RetryPolicy::exponential(4, Duration::from_millis(10)));
        assert_eq!(delayed.max_retries(), 4);
        assert_eq!(delayed.delay(0), Some(Duration::from_millis(10)));
        assert_eq!(delayed.delay(2), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_dropped_retry_continuation_is_reported_once() {
        let errors = count_errors(|| {
            Chain::<i32, String>::new()
                .then_with_retry(2, |next: Next<i32, String>, _: u32| drop(next))
                .finally(|_| {});
        });
        assert_eq!(errors, 1);

        let errors = count_errors(|| {
            Chain::<i32, String>::new()
                .then_with_retry_delayed(2, Duration::from_secs(1), |next: Next<i32, String>, attempt: u32| {
                    if attempt == 0 {
                        next.failure("first".to_string())
                    } else {
                        drop(next)
                    }
                })
                .with_scheduler(ImmediateScheduler)
                .finally(|_| {});
        });
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_dropped_direct_continuation_is_reported_once() {
        let errors = count_errors(|| {
            Chain::<i32, String>::new()
                .then(|next: Next<i32, String>, _: Outcome<i32, String>| drop(next))
                .finally(|_| {});
        });
        assert_eq!(errors, 1);
    }
}
