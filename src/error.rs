use crate::scope::ScopeId;
use miette::Diagnostic;
use std::fmt::{self, Display};
use std::sync::Arc;
use thiserror::Error;

/// Boxed error type accepted from user code (disposables, work processors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Diagnostic)]
pub enum AmbientError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Maybe(#[from] MaybeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Enlistment(#[from] EnlistmentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Outcome(#[from] OutcomeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Settings(#[from] SettingsError),
}

/// Why a scope could not be opened at the requested position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestingViolation {
    /// A scope of the same type is already current and the type does not nest.
    NestingNotAllowed,
    /// A process-wide scope was requested while a thread scope is current.
    ProcessWideUnderThread,
}

impl Display for NestingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NestingViolation::NestingNotAllowed => write!(f, "nested scopes are not allowed"),
            NestingViolation::ProcessWideUnderThread => {
                write!(f, "a process-wide scope cannot be nested under a thread scope")
            }
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Scope bounds `{value}` are out of range")]
    #[diagnostic(
        code(scope::bounds_out_of_range),
        help("Scope bounds must be either `thread` or `process-wide`.")
    )]
    BoundsOutOfRange { value: String },

    #[error("Cannot open `{scope}`: {reason}")]
    #[diagnostic(
        code(scope::invalid_nesting),
        help("Dispose the current scope first, or use a scope type that allows nesting.")
    )]
    InvalidNesting {
        scope: &'static str,
        reason: NestingViolation,
    },

    #[error("`{scope}` {disposed} was disposed out of order while {top} is still open")]
    #[diagnostic(
        code(scope::out_of_order_disposal),
        help("Nested scopes must be disposed in reverse order of creation. A child scope is still open.")
    )]
    OutOfOrderDisposal {
        scope: &'static str,
        disposed: ScopeId,
        top: ScopeId,
    },
}

/// An error captured by [`Maybe::capture`](crate::maybe::Maybe::capture) and
/// carried until the caller decides to surface it.
#[derive(Error, Debug, Diagnostic, Clone)]
#[error(transparent)]
#[diagnostic(code(maybe::captured_exception))]
pub struct CapturedError {
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

#[derive(Error, Debug)]
#[error("{0}")]
struct MessageError(String);

impl CapturedError {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CapturedError {
            inner: Arc::new(error),
        }
    }

    pub fn from_boxed(error: BoxError) -> Self {
        CapturedError {
            inner: Arc::from(error),
        }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new(MessageError(message.into()))
    }

    #[must_use]
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.inner.as_ref()
    }

    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum MaybeError {
    #[error("Maybe<{type_name}> has no value")]
    #[diagnostic(
        code(maybe::no_value),
        help("Check `has_value()` first, or use `value_or_default` / `or` to supply a fallback.")
    )]
    NoValueAccess { type_name: &'static str },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Captured(#[from] CapturedError),
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("Sequence contains more than one element")]
    #[diagnostic(
        code(sequence::more_than_one_element),
        help("Use `first_maybe` when several elements are acceptable.")
    )]
    MoreThanOneElement,
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
#[error("Operation failed: {}", .reasons.join("; "))]
#[diagnostic(code(outcome::failure))]
pub struct OutcomeError {
    pub reasons: Vec<String>,
}

/// A single enlisted disposable that failed during fail-safe disposal.
#[derive(Error, Debug, Diagnostic)]
#[error("Disposable #{index} failed to dispose")]
#[diagnostic(code(enlistment::disposal_failure))]
pub struct DisposalFailure {
    pub index: usize,
    #[source]
    pub source: BoxError,
}

#[derive(Error, Debug, Diagnostic)]
pub enum EnlistmentError {
    #[error("`{scope}` has already been disposed")]
    #[diagnostic(
        code(enlistment::object_disposed),
        help("Items can only be enlisted or queried while the scope is open.")
    )]
    ObjectDisposed { scope: &'static str },

    #[error("`{scope}` has already been completed")]
    #[diagnostic(code(enlistment::already_completed))]
    AlreadyCompleted { scope: &'static str },

    #[error("Parent of `{scope}` was already completed; {discarded} items were not processed")]
    #[diagnostic(
        code(enlistment::parent_closed),
        help("Dispose nested units of work before completing the outermost one.")
    )]
    ParentClosed { scope: &'static str, discarded: usize },

    #[error("Processing `{scope}` failed")]
    #[diagnostic(code(enlistment::processing_failed))]
    Processing {
        scope: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{} of {attempted} enlisted disposables failed to dispose", .failures.len())]
    #[diagnostic(
        code(enlistment::aggregate_disposal),
        help("Every enlisted item was still disposed; the related errors list each failure.")
    )]
    AggregateDisposal {
        attempted: usize,
        #[related]
        failures: Vec<DisposalFailure>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scope(#[from] ScopeError),
}

#[derive(Error, Debug, Diagnostic)]
pub enum SettingsError {
    #[error("Could not read settings file `{path}`")]
    #[diagnostic(code(settings::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON settings")]
    #[diagnostic(code(settings::json))]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML settings")]
    #[diagnostic(code(settings::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported settings format for `{path}`")]
    #[diagnostic(
        code(settings::unsupported_format),
        help("Settings files must end in `.json`, `.yaml` or `.yml`.")
    )]
    UnsupportedFormat { path: String },
}
