//! `Maybe<T>`: a value, its absence, or a captured error.
//!
//! `Maybe` is the "value or absence" convention used across the crate. Unlike
//! `Option`, it can also carry an error captured from a fallible computation
//! (see [`Maybe::capture`]) so the caller decides when, or whether, the failure
//! is surfaced with [`Maybe::throw_on_exception`].

use crate::error::{CapturedError, MaybeError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone)]
pub enum Maybe<T> {
    NoValue,
    Value(T),
    Exception(CapturedError),
}

impl<T> Default for Maybe<T> {
    fn default() -> Self {
        Maybe::NoValue
    }
}

impl<T> Maybe<T> {
    #[must_use]
    pub fn no_value() -> Self {
        Maybe::NoValue
    }

    #[must_use]
    pub fn some(value: T) -> Self {
        Maybe::Value(value)
    }

    /// Runs a fallible computation, capturing its error instead of
    /// propagating it.
    pub fn capture<E, F>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match f() {
            Ok(value) => Maybe::Value(value),
            Err(err) => Maybe::Exception(CapturedError::new(err)),
        }
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        matches!(self, Maybe::Value(_))
    }

    #[must_use]
    pub fn is_exception(&self) -> bool {
        matches!(self, Maybe::Exception(_))
    }

    #[must_use]
    pub fn exception(&self) -> Option<&CapturedError> {
        match self {
            Maybe::Exception(err) => Some(err),
            _ => None,
        }
    }

    /// Borrows the contained value.
    ///
    /// # Errors
    /// Returns `MaybeError::NoValueAccess` when empty, or the captured error.
    pub fn value(&self) -> Result<&T, MaybeError> {
        match self {
            Maybe::Value(value) => Ok(value),
            Maybe::NoValue => Err(MaybeError::NoValueAccess {
                type_name: std::any::type_name::<T>(),
            }),
            Maybe::Exception(err) => Err(MaybeError::Captured(err.clone())),
        }
    }

    /// Takes the contained value.
    ///
    /// # Errors
    /// Returns `MaybeError::NoValueAccess` when empty, or the captured error.
    pub fn into_value(self) -> Result<T, MaybeError> {
        match self {
            Maybe::Value(value) => Ok(value),
            Maybe::NoValue => Err(MaybeError::NoValueAccess {
                type_name: std::any::type_name::<T>(),
            }),
            Maybe::Exception(err) => Err(MaybeError::Captured(err)),
        }
    }

    pub fn as_ref(&self) -> Maybe<&T> {
        match self {
            Maybe::Value(value) => Maybe::Value(value),
            Maybe::NoValue => Maybe::NoValue,
            Maybe::Exception(err) => Maybe::Exception(err.clone()),
        }
    }

    pub fn select<U, F>(self, f: F) -> Maybe<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Maybe::Value(value) => Maybe::Value(f(value)),
            Maybe::NoValue => Maybe::NoValue,
            Maybe::Exception(err) => Maybe::Exception(err),
        }
    }

    pub fn select_maybe<U, F>(self, f: F) -> Maybe<U>
    where
        F: FnOnce(T) -> Maybe<U>,
    {
        match self {
            Maybe::Value(value) => f(value),
            Maybe::NoValue => Maybe::NoValue,
            Maybe::Exception(err) => Maybe::Exception(err),
        }
    }

    /// Keeps the value only if it satisfies `predicate`.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: FnOnce(&T) -> bool,
    {
        match self {
            Maybe::Value(value) => {
                if predicate(&value) {
                    Maybe::Value(value)
                } else {
                    Maybe::NoValue
                }
            }
            other => other,
        }
    }

    /// Runs `f` on the value, if any, and passes `self` through.
    pub fn if_value<F>(self, f: F) -> Self
    where
        F: FnOnce(&T),
    {
        if let Maybe::Value(value) = &self {
            f(value);
        }
        self
    }

    pub fn or(self, alternative: Maybe<T>) -> Self {
        match self {
            Maybe::Value(_) => self,
            _ => alternative,
        }
    }

    pub fn or_else<F>(self, alternative: F) -> Self
    where
        F: FnOnce() -> Maybe<T>,
    {
        match self {
            Maybe::Value(_) => self,
            _ => alternative(),
        }
    }

    pub fn value_or_default(self, fallback: T) -> T {
        match self {
            Maybe::Value(value) => value,
            _ => fallback,
        }
    }

    pub fn value_or_else<F>(self, fallback: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self {
            Maybe::Value(value) => value,
            _ => fallback(),
        }
    }

    /// Turns an empty `Maybe` into the caller's error. A captured exception
    /// is passed through untouched.
    ///
    /// # Errors
    /// Returns the error built by `error` when there is no value.
    pub fn throw_on_no_value<E, F>(self, error: F) -> Result<Self, E>
    where
        F: FnOnce() -> E,
    {
        match self {
            Maybe::NoValue => Err(error()),
            other => Ok(other),
        }
    }

    /// Re-raises a captured exception.
    ///
    /// # Errors
    /// Returns the captured error if this `Maybe` is in the exception state.
    pub fn throw_on_exception(self) -> Result<Self, CapturedError> {
        match self {
            Maybe::Exception(err) => Err(err),
            other => Ok(other),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Maybe::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for Maybe<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Maybe::Value(value),
            None => Maybe::NoValue,
        }
    }
}

impl<T> From<Maybe<T>> for Option<T> {
    fn from(value: Maybe<T>) -> Self {
        value.into_option()
    }
}

impl<T, E> From<Result<T, E>> for Maybe<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(value: Result<T, E>) -> Self {
        Maybe::capture(|| value)
    }
}

impl<T: PartialEq> PartialEq for Maybe<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Maybe::NoValue, Maybe::NoValue) => true,
            (Maybe::Value(a), Maybe::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Maybe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Maybe::NoValue => write!(f, "<no value>"),
            Maybe::Value(value) => write!(f, "{value}"),
            Maybe::Exception(err) => write!(f, "<exception: {err}>"),
        }
    }
}

impl<T: Serialize> Serialize for Maybe<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Maybe::Value(value) => serializer.serialize_some(value),
            Maybe::NoValue => serializer.serialize_none(),
            Maybe::Exception(err) => Err(serde::ser::Error::custom(format!(
                "cannot serialize a captured exception: {err}"
            ))),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Maybe<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Maybe::from)
    }
}
