//! Deferred execution used by delayed retries.
//!
//! A chain resolves its scheduler lazily, only when a delayed retry is
//! actually needed: the scheduler injected with
//! [`Chain::with_scheduler`](crate::Chain::with_scheduler) wins, otherwise
//! the process-wide one installed by [`set_scheduler`] is used.

use crate::error::ChainError;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;

/// A deferred action submitted to a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run a task after a delay.
///
/// The implementation decides how the delay is honoured (timer, thread,
/// or not at all) and must eventually run the task exactly once. Closures
/// of the shape `Fn(Task, Duration)` are schedulers.
///
/// # Examples
///
/// ```
/// use tsunagi::{Scheduler, Task};
/// use std::time::Duration;
///
/// let immediate = |task: Task, _delay: Duration| task();
/// immediate.schedule(Box::new(|| println!("ran")), Duration::from_secs(1));
/// ```
pub trait Scheduler: Send + Sync {
    /// Arranges for `task` to run once `delay` has elapsed.
    fn schedule(&self, task: Task, delay: Duration);
}

impl<F> Scheduler for F
where
    F: Fn(Task, Duration) + Send + Sync,
{
    fn schedule(&self, task: Task, delay: Duration) {
        self(task, delay)
    }
}

static GLOBAL_SCHEDULER: RwLock<Option<Arc<dyn Scheduler>>> = RwLock::new(None);

/// Installs the process-wide scheduler, replacing any previous one.
///
/// Chains without an injected scheduler fall back to this one. It must be
/// installed before such a chain reaches a delayed retry.
pub fn set_scheduler<S>(scheduler: S)
where
    S: Scheduler + 'static,
{
    let mut slot = GLOBAL_SCHEDULER
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *slot = Some(Arc::new(scheduler));
}

/// Removes the process-wide scheduler.
pub fn clear_scheduler() {
    let mut slot = GLOBAL_SCHEDULER
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *slot = None;
}

pub(crate) fn global_scheduler() -> Option<Arc<dyn Scheduler>> {
    GLOBAL_SCHEDULER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Runs every task at once, ignoring the delay.
///
/// Useful in tests: delayed retries then behave exactly like immediate ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, task: Task, _delay: Duration) {
        task();
    }
}

/// Runs tasks on a tokio runtime after sleeping for the delay.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Creates a scheduler bound to the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates a scheduler bound to the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::NoRuntime`] when called outside a tokio runtime.
    pub fn current() -> Result<Self, ChainError> {
        Ok(Self::new(Handle::try_current()?))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task, delay: Duration) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("runtime", &self.handle.runtime_flavor())
            .finish()
    }
}
