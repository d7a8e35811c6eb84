//! # Tsunagi (繋ぎ)
//!
//! A small continuation-passing step chain for Rust.
//!
//! The name "Tsunagi" (繋ぎ) means "link" or "connection" in Japanese: each
//! step hands its outcome to the next through a continuation, and the chain
//! links them in order.
//!
//! ## Features
//!
//! - **Continuation passing**: a step receives a [`Next`] and reports when it is ready, synchronously or later
//! - **Short-circuit**: an error skips every following step until a [`catch_error`](Chain::catch_error) stage
//! - **Retry Support**: bounded immediate retries, or delayed retries through a [`Scheduler`] (fixed delay, exponential backoff)
//! - **Async bridge**: run `async` steps on tokio with [`spawn`], await a whole chain with [`Chain::run`]
//! - **Typed builder**: the value type changes from stage to stage and is checked at compile time
//!
//! ## Quick Start
//!
//! ```rust
//! use tsunagi::prelude::*;
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//!
//! Chain::<i32, String>::new()
//!     .then(|next: Next<i32, String>, _: Outcome<i32, String>| next.success(10))
//!     .then(|next: Next<i32, String>, input: Outcome<i32, String>| match input {
//!         Outcome::Success(value) => next.success(value + 5),
//!         Outcome::Failure(error) => next.failure(error),
//!     })
//!     .finally(move |outcome| {
//!         tx.send(outcome).ok();
//!     });
//!
//! assert_eq!(rx.recv().ok(), Some(Outcome::Success(15)));
//! ```
//!
//! ## Retries
//!
//! Retry-aware steps receive their attempt index instead of the previous
//! outcome:
//!
//! ```rust
//! use tsunagi::prelude::*;
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! let (tx, rx) = mpsc::channel();
//!
//! Chain::<(), String>::new()
//!     .then_with_retry(3, |next: Next<u32, String>, attempt: u32| {
//!         if attempt < 2 {
//!             next.failure("not yet".to_string())
//!         } else {
//!             next.success(attempt)
//!         }
//!     })
//!     .then_with_retry_delayed(2, Duration::from_secs(1), |next: Next<u32, String>, _: u32| {
//!         next.success(42)
//!     })
//!     .with_scheduler(ImmediateScheduler)
//!     .finally(move |outcome| {
//!         tx.send(outcome).ok();
//!     });
//!
//! assert_eq!(rx.recv().ok(), Some(Outcome::Success(42)));
//! ```
//!
//! ## Error Recovery
//!
//! ```rust
//! use tsunagi::prelude::*;
//! use std::sync::mpsc;
//!
//! type Res = Outcome<String, String>;
//! let (tx, rx) = mpsc::channel();
//!
//! Chain::<String, String>::new()
//!     .then(|next: Next<String, String>, _: Res| next.failure("Step 2 error".to_string()))
//!     .catch_error(|next: Next<String, String>, _: Res| next.success("Recovered!".to_string()))
//!     .finally(move |outcome| {
//!         tx.send(outcome).ok();
//!     });
//!
//! assert_eq!(rx.recv().ok(), Some(Outcome::Success("Recovered!".to_string())));
//! ```

mod chain;
mod error;
mod outcome;
mod scheduler;
mod spawn;
mod step;
mod wrapper;

pub mod prelude;

pub use chain::Chain;
pub use error::ChainError;
pub use outcome::Outcome;
pub use scheduler::{
    clear_scheduler, set_scheduler, ImmediateScheduler, Scheduler, Task, TokioScheduler,
};
pub use spawn::{spawn, AsyncRetryStep, AsyncStep, Spawned};
pub use step::{Next, RetryPolicy, RetryStep, Step};
pub use wrapper::StageKind;
