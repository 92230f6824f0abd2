// SPDX-License-Identifier: PMPL-1.0-or-later
//! Model error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or (de)serializing model values.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid start index {0}: start index is 1-based")]
    InvalidStartIndex(u64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a single source produced no results.
///
/// Recorded on the source's processing detail; never propagated out of a
/// federation call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source's query call returned an error.
    #[error("source invocation failed: {0}")]
    Invocation(String),

    /// The source did not answer before the federation deadline.
    #[error("source timed out after {waited:?}")]
    Timeout { waited: Duration },

    /// The source panicked while answering.
    #[error("source panicked: {0}")]
    Panicked(String),

    /// The task running the source was cancelled before it finished.
    #[error("source invocation cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn invocation(message: impl Into<String>) -> Self {
        SourceError::Invocation(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SourceError::Timeout { .. })
    }
}
