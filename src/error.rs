//! Engine error types
//!
//! Rule-level invalidity (unmet prerequisites, exceeded budgets) is state,
//! not an error: it surfaces through `valid` flags and `can_advance`.
//! Errors here are configuration faults the build cannot proceed past.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A catalog entry references a name absent from another catalog.
    #[error("unknown {kind} '{name}' referenced by catalog data")]
    MissingCatalogEntry { kind: &'static str, name: String },

    /// A selection path does not resolve to a catalog node.
    #[error("unknown selection path '{path}'")]
    UnknownSelection { path: String },

    /// A selection resolves but is forbidden in the current build.
    #[error("invalid selection: {reason}")]
    InvalidSelection { reason: String },

    /// A catalog entry is structurally unusable.
    #[error("malformed catalog entry '{name}': {reason}")]
    MalformedCatalog { name: String, reason: String },

    /// The character store failed to load or persist a record.
    #[error("character store failure")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn missing(kind: &'static str, name: impl Into<String>) -> Self {
        Self::MissingCatalogEntry { kind, name: name.into() }
    }

    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedCatalog { name: name.into(), reason: reason.into() }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidSelection { reason: reason.into() }
    }
}
