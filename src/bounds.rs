use crate::error::ScopeError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Visibility domain of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeBounds {
    /// Visible only to the thread that opened the scope.
    #[default]
    Thread,
    /// Visible to every thread while active.
    ProcessWide,
}

impl ScopeBounds {
    #[must_use]
    pub fn is_thread(self) -> bool {
        self == ScopeBounds::Thread
    }

    #[must_use]
    pub fn is_process_wide(self) -> bool {
        self == ScopeBounds::ProcessWide
    }
}

impl Display for ScopeBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeBounds::Thread => write!(f, "thread"),
            ScopeBounds::ProcessWide => write!(f, "process-wide"),
        }
    }
}

impl FromStr for ScopeBounds {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(ScopeBounds::Thread),
            "process-wide" | "process_wide" | "processwide" => Ok(ScopeBounds::ProcessWide),
            _ => Err(ScopeError::BoundsOutOfRange {
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<u8> for ScopeBounds {
    type Error = ScopeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ScopeBounds::Thread),
            1 => Ok(ScopeBounds::ProcessWide),
            other => Err(ScopeError::BoundsOutOfRange {
                value: other.to_string(),
            }),
        }
    }
}
