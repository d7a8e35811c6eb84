use thiserror::Error;

/// Errors raised by the crate's own fallible APIs.
///
/// Failures of the steps themselves never appear here: a chain's error type
/// is chosen by the caller and travels inside [`Outcome`](crate::Outcome).
///
/// # Non-Exhaustive
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code. When matching
/// on this error, always include a wildcard pattern:
///
/// ```
/// use tsunagi::ChainError;
///
/// fn describe(error: &ChainError) -> String {
///     match error {
///         ChainError::InvalidRetryPolicy(reason) => format!("bad policy: {}", reason),
///         ChainError::NoRuntime(_) => "no tokio runtime".to_string(),
///         ChainError::Abandoned => "a step dropped its continuation".to_string(),
///         _ => error.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChainError {
    /// A retry policy was built from invalid parameters.
    ///
    /// Returned by [`RetryPolicy::exponential_backoff`](crate::RetryPolicy::exponential_backoff).
    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(&'static str),

    /// A tokio-backed adapter was created outside of a tokio runtime.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The chain finished without reaching its terminal callback.
    ///
    /// This happens when a step drops its continuation instead of invoking
    /// it, so the rest of the chain can never run.
    #[error("Chain was abandoned before reaching its terminal callback")]
    Abandoned,
}
