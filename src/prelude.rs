//! Commonly used types and traits

pub use crate::chain::Chain;
pub use crate::error::ChainError;
pub use crate::outcome::Outcome;
pub use crate::scheduler::{set_scheduler, ImmediateScheduler, Scheduler, TokioScheduler};
pub use crate::spawn::{spawn, AsyncRetryStep, AsyncStep};
pub use crate::step::{Next, RetryPolicy, RetryStep, Step};
