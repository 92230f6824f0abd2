// SPDX-License-Identifier: PMPL-1.0-or-later
//! Fedsearch Model
//!
//! Types shared between backend sources and the federation engine:
//! the immutable [`Query`], source handles, per-source results and the
//! opaque result items that flow through a federated search.
//!
//! The model makes no assumption about what a filter or a payload looks
//! like. Both are carried as `serde_json::Value` and forwarded untouched.

pub mod error;
pub mod memory;
pub mod query;
pub mod result;
pub mod source;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use error::{ModelError, SourceError};
pub use memory::{InMemorySource, SourceBehavior, SourceGate};
pub use query::{Query, SortOrder, SortSpec};
pub use result::{ResultItem, SourceResponse, SourceResult};
pub use source::{Source, SourceRef};

/// Arbitrary key → value properties attached to requests and responses.
pub type PropertyBag = HashMap<String, serde_json::Value>;

/// Well-known property keys.
pub mod keys {
    /// Wall-clock time of a source invocation, in milliseconds.
    ///
    /// Sources and the invoker write it as a number; the merged response
    /// holds an object keyed by source ID instead.
    pub const ELAPSED_TIME: &str = "elapsed-time";
}

/// Unique identifier of a backend source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
