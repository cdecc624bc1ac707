//! Core domain types for Tether.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the host: the engine, the
//! configuration loader and the binary.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod ids;
mod kleenean;
mod text;
mod value;

pub use ids::EventId;
pub use kleenean::Kleenean;
pub use text::truncate_with_ellipsis;
pub use value::{Value, VariableSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Debug labels
// ============================================================================

/// Human-readable label of a trigger, used as the key for timings and profiling.
///
/// Guaranteed non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DebugLabel(String);

#[derive(Debug, Error)]
#[error("debug label must not be empty")]
pub struct EmptyLabelError;

impl DebugLabel {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyLabelError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Err(EmptyLabelError)
        } else if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// Label for a trigger defined at `line` of `script`, e.g. `greet.sk:12`.
    pub fn for_script_line(script: &str, line: u32) -> Result<Self, EmptyLabelError> {
        if script.trim().is_empty() {
            return Err(EmptyLabelError);
        }
        Self::new(format!("{}:{line}", script.trim()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for DebugLabel {
    type Error = EmptyLabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for DebugLabel {
    type Error = EmptyLabelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DebugLabel> for String {
    fn from(value: DebugLabel) -> Self {
        value.0
    }
}

impl std::ops::Deref for DebugLabel {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for DebugLabel {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for DebugLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
