//! Bridges `async` code on a tokio runtime into the continuation protocol.

use crate::error::ChainError;
use crate::outcome::Outcome;
use crate::step::{Next, RetryStep, Step};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

/// A step written as an `async fn` over the previous outcome.
///
/// Wrap it with [`spawn`] to use it in a chain.
///
/// # Examples
///
/// ```
/// use tsunagi::{spawn, AsyncStep, Chain, Outcome};
/// use async_trait::async_trait;
///
/// struct FetchPrice;
///
/// #[async_trait]
/// impl AsyncStep<String, u32, String> for FetchPrice {
///     async fn run(&self, input: Outcome<String, String>) -> Outcome<u32, String> {
///         match input {
///             Outcome::Success(sku) if sku == "apple" => Outcome::success(120),
///             Outcome::Success(sku) => Outcome::failure(format!("unknown sku {}", sku)),
///             Outcome::Failure(error) => Outcome::failure(error),
///         }
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let handle = tokio::runtime::Handle::current();
/// let outcome = Chain::<String, String>::starting_with("apple".to_string())
///     .then(spawn(handle, FetchPrice))
///     .run()
///     .await
///     .expect("chain completed");
///
/// assert_eq!(outcome, Outcome::Success(120));
/// # }
/// ```
#[async_trait]
pub trait AsyncStep<I, O, E>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    /// Produces this step's outcome.
    async fn run(&self, input: Outcome<I, E>) -> Outcome<O, E>;
}

/// A retry-aware step written as an `async fn` over the attempt index.
#[async_trait]
pub trait AsyncRetryStep<O, E>: Send + Sync
where
    O: Send + 'static,
    E: Send + 'static,
{
    /// Produces the outcome of attempt number `attempt` (0-based).
    async fn run(&self, attempt: u32) -> Outcome<O, E>;
}

/// An async step adapted into a [`Step`] or [`RetryStep`].
///
/// Each invocation spawns the step's future on the runtime and hands its
/// output to the continuation. If the runtime shuts down first the
/// continuation is dropped and the chain is abandoned.
pub struct Spawned<S> {
    step: Arc<S>,
    handle: Handle,
}

/// Adapts an async step so its futures run on `handle`.
pub fn spawn<S>(handle: Handle, step: S) -> Spawned<S> {
    Spawned {
        step: Arc::new(step),
        handle,
    }
}

impl<S> Spawned<S> {
    /// Adapts an async step onto the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::NoRuntime`] when called outside a tokio runtime.
    pub fn current(step: S) -> Result<Self, ChainError> {
        Ok(spawn(Handle::try_current()?, step))
    }
}

impl<S, I, O, E> Step<I, O, E> for Spawned<S>
where
    S: AsyncStep<I, O, E> + 'static,
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    fn run(&self, next: Next<O, E>, input: Outcome<I, E>) {
        let step = Arc::clone(&self.step);
        self.handle.spawn(async move {
            let outcome = AsyncStep::run(step.as_ref(), input).await;
            next.call(outcome);
        });
    }
}

impl<S, O, E> RetryStep<O, E> for Spawned<S>
where
    S: AsyncRetryStep<O, E> + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    fn run(&self, next: Next<O, E>, attempt: u32) {
        let step = Arc::clone(&self.step);
        self.handle.spawn(async move {
            let outcome = AsyncRetryStep::run(step.as_ref(), attempt).await;
            next.call(outcome);
        });
    }
}

impl<S> fmt::Debug for Spawned<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawned")
            .field("step", &std::any::type_name::<S>())
            .finish()
    }
}
