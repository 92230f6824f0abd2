// SPDX-License-Identifier: PMPL-1.0-or-later
//! The `Source` trait every federated backend implements.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::SourceError;
use crate::query::Query;
use crate::result::SourceResponse;
use crate::{PropertyBag, SourceId};

/// A backend that can answer a query synchronously.
///
/// Implementations may block (network I/O, disk scans); the federation
/// engine runs them on a blocking worker pool. They must tolerate being
/// called concurrently with other sources, but are called at most once per
/// federation.
pub trait Source: Send + Sync {
    /// Unique, stable identifier of this source.
    fn id(&self) -> &str;

    /// Execute `query` and return the matching records.
    fn query(&self, query: &Query, props: &PropertyBag) -> Result<SourceResponse, SourceError>;
}

/// Shared handle to a source, compared and hashed by ID only.
#[derive(Clone)]
pub struct SourceRef {
    id: SourceId,
    source: Arc<dyn Source>,
}

impl SourceRef {
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self {
            id: SourceId::new(source.id()),
            source,
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }
}

impl<S: Source + 'static> From<Arc<S>> for SourceRef {
    fn from(source: Arc<S>) -> Self {
        SourceRef::new(source)
    }
}

impl PartialEq for SourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SourceRef {}

impl Hash for SourceRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRef").field("id", &self.id).finish()
    }
}
