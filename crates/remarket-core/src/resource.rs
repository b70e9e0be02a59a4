//! # Resource
//!
//! State of a one-shot request as seen by a screen: nothing asked yet, in
//! flight, finished with data, or finished with a human-readable message.

use serde::{Deserialize, Serialize};

/// Outcome wrapper for one-shot lookups such as "fetch listing by id".
///
/// Callers are expected to `match` all four variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Resource<T> {
    /// Nothing requested yet.
    Idle,
    /// Request in flight.
    Loading,
    /// Request finished with data.
    Success(T),
    /// Request failed; the message is ready to show to the user.
    Error(String),
}

impl<T> Resource<T> {
    /// Builds an `Error` from anything printable.
    pub fn error(message: impl Into<String>) -> Self {
        Resource::Error(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Resource::Success(_))
    }

    /// Returns the data if the request succeeded.
    pub fn data(&self) -> Option<&T> {
        match self {
            Resource::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the failure message if the request failed.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Resource::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Transforms the success payload, keeping every other state.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resource<U> {
        match self {
            Resource::Idle => Resource::Idle,
            Resource::Loading => Resource::Loading,
            Resource::Success(data) => Resource::Success(f(data)),
            Resource::Error(message) => Resource::Error(message),
        }
    }
}

impl<T> Default for Resource<T> {
    fn default() -> Self {
        Resource::Idle
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for Resource<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Resource::Success(data),
            Err(e) => Resource::Error(e.to_string()),
        }
    }
}
