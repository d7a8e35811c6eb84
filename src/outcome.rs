//! The value that flows between steps.

/// Result of a single step: either a success value or an error.
///
/// The two states are mutually exclusive. An outcome is created by a step,
/// handed to its continuation, and consumed by the next wrapper in the chain.
///
/// # Examples
///
/// ```
/// use tsunagi::Outcome;
///
/// let ok: Outcome<i32, String> = Outcome::success(15);
/// assert!(ok.is_success());
/// assert_eq!(ok.value(), Some(&15));
///
/// let err: Outcome<i32, String> = Outcome::failure("Step 2 failed".to_string());
/// assert!(err.is_error());
/// assert_eq!(err.error().map(String::as_str), Some("Step 2 failed"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T, E> {
    /// The step produced a value.
    Success(T),
    /// The step failed.
    Failure(E),
}

impl<T, E> Outcome<T, E> {
    /// Creates a successful outcome.
    pub fn success(value: T) -> Self {
        Self::Success(value)
    }

    /// Creates a failed outcome.
    pub fn failure(error: E) -> Self {
        Self::Failure(error)
    }

    /// Returns `true` if this outcome holds a value.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` if this outcome holds an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns the success value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Returns the error, if any.
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Consumes the outcome, returning the success value.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Consumes the outcome, returning the error.
    pub fn into_error(self) -> Option<E> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Converts into a standard [`Result`].
    pub fn into_result(self) -> Result<T, E> {
        self.into()
    }
}

impl<E> Outcome<(), E> {
    /// Creates a value-less successful outcome.
    ///
    /// ```
    /// use tsunagi::Outcome;
    ///
    /// let done: Outcome<(), String> = Outcome::done();
    /// assert!(done.is_success());
    /// ```
    pub fn done() -> Self {
        Self::Success(())
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

impl<T, E> From<Outcome<T, E>> for Result<T, E> {
    fn from(outcome: Outcome<T, E>) -> Self {
        match outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_error_are_exclusive() {
        let outcomes: Vec<Outcome<i32, String>> = vec![
            Outcome::success(1),
            Outcome::failure("boom".to_string()),
        ];
        for outcome in &outcomes {
            assert_ne!(outcome.is_success(), outcome.is_error());
        }
    }

    #[test]
    fn test_accessors() {
        let ok: Outcome<i32, String> = Outcome::success(10);
        assert_eq!(ok.value(), Some(&10));
        assert_eq!(ok.error(), None);
        assert_eq!(ok.into_value(), Some(10));

        let err: Outcome<i32, String> = Outcome::failure("bad".to_string());
        assert_eq!(err.value(), None);
        assert_eq!(err.clone().into_error(), Some("bad".to_string()));
        assert_eq!(err.into_value(), None);
    }

    #[test]
    fn test_done_is_success() {
        let done: Outcome<(), &str> = Outcome::done();
        assert!(done.is_success());
        assert!(!done.is_error());
    }

    #[test]
    fn test_result_conversions() {
        let outcome: Outcome<u8, &str> = Ok(3).into();
        assert_eq!(outcome, Outcome::Success(3));
        assert_eq!(outcome.into_result(), Ok(3));

        let outcome: Outcome<u8, &str> = Err("nope").into();
        assert_eq!(Result::from(outcome), Err("nope"));
    }
}
