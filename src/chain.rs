use crate::error::ChainError;
use crate::outcome::Outcome;
use crate::scheduler::Scheduler;
use crate::step::{Next, RetryPolicy, RetryStep, Step};
use crate::wrapper::{Catch, Direct, Retry, Stage, StageKind};
use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Value carried between stages once their types have been erased.
pub(crate) type Payload = Box<dyn Any + Send>;

type Terminal<E> = Box<dyn FnOnce(Outcome<Payload, E>) + Send>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn erase<T: Send + 'static, E>(outcome: Outcome<T, E>) -> Outcome<Payload, E> {
    match outcome {
        Outcome::Success(value) => Outcome::Success(Box::new(value)),
        Outcome::Failure(error) => Outcome::Failure(error),
    }
}

fn restore<T: 'static, E>(outcome: Outcome<Payload, E>) -> Outcome<T, E> {
    match outcome {
        Outcome::Success(payload) => Outcome::Success(unpack(payload)),
        Outcome::Failure(error) => Outcome::Failure(error),
    }
}

/// The typed builder guarantees every payload matches the stage receiving it.
#[allow(clippy::panic)]
pub(crate) fn unpack<T: 'static>(payload: Payload) -> T {
    match payload.downcast::<T>() {
        Ok(value) => *value,
        Err(_) => panic!(
            "chain payload is not a `{}`; stage types are out of sync",
            type_name::<T>()
        ),
    }
}

/// An ordered sequence of wrapped steps.
///
/// `T` is the value type produced by the last stage appended so far and `E`
/// is the error type shared by every stage. Each builder method consumes
/// the chain and returns a new one with one more stage. The chain runs
/// once, when [`finally`](Chain::finally) or [`run`](Chain::run) consumes it.
///
/// # Examples
///
/// ```
/// use tsunagi::{Chain, Next, Outcome};
/// use std::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel();
///
/// Chain::<i32, String>::new()
///     .then(|next: Next<i32, String>, _: Outcome<i32, String>| next.success(10))
///     .then(|next: Next<i32, String>, input: Outcome<i32, String>| match input {
///         Outcome::Success(value) => next.success(value + 5),
///         Outcome::Failure(error) => next.failure(error),
///     })
///     .finally(move |outcome| {
///         tx.send(outcome).ok();
///     });
///
/// assert_eq!(rx.recv().ok(), Some(Outcome::Success(15)));
/// ```
pub struct Chain<T, E> {
    seed: Payload,
    stages: Vec<Box<dyn Stage<E>>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, E> Chain<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates an empty chain whose first stage receives `T::default()`.
    pub fn new() -> Self
    where
        T: Default,
    {
        Self::starting_with(T::default())
    }

    /// Creates an empty chain whose first stage receives `value`.
    pub fn starting_with(value: T) -> Self {
        Self {
            seed: Box::new(value),
            stages: Vec::new(),
            scheduler: None,
            _marker: PhantomData,
        }
    }

    /// Uses `scheduler` for this chain's delayed retries instead of the
    /// process-wide one.
    pub fn with_scheduler<S>(mut self, scheduler: S) -> Self
    where
        S: Scheduler + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Appends a step that runs only when the chain is still succeeding.
    ///
    /// An error reaching this stage is forwarded unchanged and the step is
    /// skipped.
    pub fn then<S, O>(self, step: S) -> Chain<O, E>
    where
        S: Step<T, O, E> + 'static,
        O: Send + 'static,
    {
        self.push(Direct::<S, T, O>::new(step))
    }

    /// Appends a retry-aware step that is reattempted immediately on failure.
    ///
    /// The step receives its attempt index, starting at 0, and runs at most
    /// `max_retries + 1` times. The first success, or the failure of the
    /// last attempt, is forwarded. An error reaching this stage from
    /// upstream is forwarded without running the step.
    pub fn then_with_retry<S, O>(self, max_retries: u32, step: S) -> Chain<O, E>
    where
        S: RetryStep<O, E> + 'static,
        O: Send + 'static,
    {
        self.push(Retry::<S, O>::immediate(max_retries, step))
    }

    /// Like [`then_with_retry`](Chain::then_with_retry), but each reattempt
    /// is submitted to the scheduler with `delay`.
    ///
    /// # Panics
    ///
    /// When a reattempt is needed and neither [`with_scheduler`](Chain::with_scheduler)
    /// nor [`set_scheduler`](crate::set_scheduler) supplied a scheduler.
    pub fn then_with_retry_delayed<S, O>(
        self,
        max_retries: u32,
        delay: Duration,
        step: S,
    ) -> Chain<O, E>
    where
        S: RetryStep<O, E> + 'static,
        O: Send + 'static,
    {
        self.then_with_backoff(RetryPolicy::fixed(max_retries, delay), step)
    }

    /// Appends a retry-aware step whose reattempts follow `policy`.
    ///
    /// The scheduler is called once per reattempt with
    /// [`RetryPolicy::delay_for_attempt`] of the attempt that failed.
    ///
    /// # Panics
    ///
    /// Same as [`then_with_retry_delayed`](Chain::then_with_retry_delayed).
    pub fn then_with_backoff<S, O>(self, policy: RetryPolicy, step: S) -> Chain<O, E>
    where
        S: RetryStep<O, E> + 'static,
        O: Send + 'static,
    {
        self.push(Retry::<S, O>::delayed(policy, step))
    }

    /// Appends a step that runs only when the chain has failed.
    ///
    /// The step receives the failing outcome and reports a recovered value
    /// of the same type, or a new error. A success reaching this stage is
    /// forwarded unchanged.
    pub fn catch_error<S>(self, step: S) -> Self
    where
        S: Step<T, T, E> + 'static,
    {
        self.push(Catch::<S, T>::new(step))
    }

    /// Number of stages in the chain.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if no stage has been appended.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Kinds of the stages, in execution order.
    pub fn stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages.iter().map(|stage| stage.kind())
    }

    /// Runs the chain and hands its final outcome to `callback`.
    ///
    /// The first stage receives the chain's seed value as a success. Each
    /// stage passes its outcome to the next; past the last stage `callback`
    /// is invoked exactly once. If every step reports synchronously the
    /// whole chain, `callback` included, has run when this returns.
    pub fn finally<F>(self, callback: F)
    where
        F: FnOnce(Outcome<T, E>) + Send + 'static,
    {
        debug!("Running chain with {} stages", self.stages.len());
        let terminal: Terminal<E> = Box::new(move |outcome| callback(restore(outcome)));
        let pipeline = Arc::new(Pipeline {
            stages: self.stages,
            scheduler: self.scheduler,
            terminal: Mutex::new(Some(terminal)),
        });
        Cursor { pipeline, index: 0 }.advance(Outcome::Success(self.seed));
    }

    /// Runs the chain and resolves with its final outcome.
    ///
    /// The chain starts when the future is first polled.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Abandoned`] if a step dropped its continuation,
    /// so the end of the chain can never be reached.
    pub async fn run(self) -> Result<Outcome<T, E>, ChainError> {
        let (tx, rx) = oneshot::channel();
        self.finally(move |outcome| {
            tx.send(outcome).ok();
        });
        rx.await.map_err(|_| ChainError::Abandoned)
    }

    fn push<U>(mut self, stage: impl Stage<E> + 'static) -> Chain<U, E> {
        self.stages.push(Box::new(stage));
        Chain {
            seed: self.seed,
            stages: self.stages,
            scheduler: self.scheduler,
            _marker: PhantomData,
        }
    }
}

impl<T, E> Default for Chain<T, E>
where
    T: Default + Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for Chain<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.kind()).collect::<Vec<_>>(),
            )
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

struct Pipeline<E> {
    stages: Vec<Box<dyn Stage<E>>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    terminal: Mutex<Option<Terminal<E>>>,
}

/// Position in a running chain: the stage that receives the next outcome.
pub(crate) struct Cursor<E> {
    pipeline: Arc<Pipeline<E>>,
    index: usize,
}

impl<E> Cursor<E>
where
    E: Send + 'static,
{
    /// Feeds `outcome` to the stage at this position, or to the terminal
    /// callback past the last stage.
    pub(crate) fn advance(self, outcome: Outcome<Payload, E>) {
        match self.pipeline.stages.get(self.index) {
            Some(stage) => {
                let following = Cursor {
                    pipeline: Arc::clone(&self.pipeline),
                    index: self.index + 1,
                };
                stage.dispatch(outcome, following);
            }
            None => {
                let terminal = lock(&self.pipeline.terminal).take();
                if let Some(terminal) = terminal {
                    debug!("Chain reached its terminal callback");
                    terminal(outcome);
                }
            }
        }
    }

    /// Continuation that advances the chain with a typed outcome.
    pub(crate) fn next<O: Send + 'static>(self) -> Next<O, E> {
        Next::new(move |outcome| self.advance(erase(outcome)))
    }

    /// Index of the stage currently being dispatched.
    pub(crate) fn current(&self) -> usize {
        self.index.saturating_sub(1)
    }

    /// Scheduler injected into the chain, if any.
    pub(crate) fn scheduler(&self) -> Option<Arc<dyn Scheduler>> {
        self.pipeline.scheduler.clone()
    }
}
