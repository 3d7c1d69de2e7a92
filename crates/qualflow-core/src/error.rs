//! Error types for the checking pipeline
//!
//! User type errors are never represented here; they are [`crate::diagnostics::Diagnostic`]
//! values. These errors cover tool-fatal conditions: a misconfigured hierarchy, an
//! analysis invariant that no longer holds, or failing I/O at a lifecycle boundary.

use crate::hierarchy::HierarchyError;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the core crate
pub type Result<T> = std::result::Result<T, CheckerError>;

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("invalid qualifier hierarchy `{system}`: {source}")]
    Hierarchy {
        system: String,
        #[source]
        source: HierarchyError,
    },

    /// An analysis invariant was violated. This is a bug in a type system, not in the checked program.
    #[error("internal error in `{system}`: {message}")]
    Internal { system: String, message: String },

    #[error("dataflow for `{method}` did not converge after {visits} block visits")]
    NoFixpoint { method: String, visits: usize },

    #[error("unknown checker `{0}`")]
    UnknownChecker(String),

    #[error("failed to access `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in `{path}`: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed options file `{path}`: {source}")]
    Options {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl CheckerError {
    pub fn internal(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            system: system.into(),
            message: message.into(),
        }
    }
}
