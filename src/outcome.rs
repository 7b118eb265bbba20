use crate::error::OutcomeError;
use crate::maybe::Maybe;
use serde::{Deserialize, Serialize};

/// The result of an operation that either succeeds with a value or fails
/// with one or more human-readable reasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    Success(T),
    Failure(Vec<String>),
}

impl<T> Outcome<T> {
    pub fn success(value: T) -> Self {
        Outcome::Success(value)
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure(vec![reason.into()])
    }

    pub fn failures<S: Into<String>>(reasons: impl IntoIterator<Item = S>) -> Self {
        Outcome::Failure(reasons.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn value(&self) -> Maybe<&T> {
        match self {
            Outcome::Success(value) => Maybe::Value(value),
            Outcome::Failure(_) => Maybe::NoValue,
        }
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            Outcome::Success(_) => &[],
            Outcome::Failure(reasons) => reasons,
        }
    }

    pub fn select<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(reasons) => Outcome::Failure(reasons),
        }
    }

    pub fn select_outcome<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> Outcome<U>,
    {
        match self {
            Outcome::Success(value) => f(value),
            Outcome::Failure(reasons) => Outcome::Failure(reasons),
        }
    }

    /// Pairs two outcomes. Reasons from both sides are kept when either fails.
    pub fn combine<U>(self, other: Outcome<U>) -> Outcome<(T, U)> {
        match (self, other) {
            (Outcome::Success(a), Outcome::Success(b)) => Outcome::Success((a, b)),
            (Outcome::Failure(mut a), Outcome::Failure(b)) => {
                a.extend(b);
                Outcome::Failure(a)
            }
            (Outcome::Failure(reasons), _) | (_, Outcome::Failure(reasons)) => {
                Outcome::Failure(reasons)
            }
        }
    }

    pub fn into_maybe(self) -> Maybe<T> {
        match self {
            Outcome::Success(value) => Maybe::Value(value),
            Outcome::Failure(_) => Maybe::NoValue,
        }
    }

    /// # Errors
    /// Returns an `OutcomeError` carrying every failure reason.
    pub fn into_result(self) -> Result<T, OutcomeError> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(reasons) => Err(OutcomeError { reasons }),
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::failure(err.to_string()),
        }
    }
}

/// Collects successes, or every reason from every failure.
impl<T> FromIterator<Outcome<T>> for Outcome<Vec<T>> {
    fn from_iter<It: IntoIterator<Item = Outcome<T>>>(iter: It) -> Self {
        let mut values = Vec::new();
        let mut reasons = Vec::new();
        for outcome in iter {
            match outcome {
                Outcome::Success(value) => values.push(value),
                Outcome::Failure(failed) => reasons.extend(failed),
            }
        }
        if reasons.is_empty() {
            Outcome::Success(values)
        } else {
            Outcome::Failure(reasons)
        }
    }
}
