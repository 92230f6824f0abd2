// SPDX-License-Identifier: PMPL-1.0-or-later
//! Result records produced by sources and by the invoker.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SourceError;
use crate::{PropertyBag, SourceId};

/// One search hit.
///
/// The payload is opaque to the federation engine. `source_id` is stamped
/// by the merger when the item is accepted into a federated response;
/// sources leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub payload: serde_json::Value,
    /// Source-assigned relevance, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
    /// Source-assigned distance (spatial queries), passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
}

impl ResultItem {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            relevance: None,
            distance: None,
            source_id: None,
        }
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = Some(relevance);
        self
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }
}

/// What a source returns from a successful query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResponse {
    pub items: Vec<ResultItem>,
    /// The source's own estimate of matching records, -1 when unknown.
    pub total_hits: i64,
    #[serde(default)]
    pub properties: PropertyBag,
}

impl SourceResponse {
    pub fn new(items: Vec<ResultItem>, total_hits: i64) -> Self {
        Self {
            items,
            total_hits,
            properties: PropertyBag::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Outcome of invoking one source, as seen by the merger.
///
/// Either carries the source's items or an error, never both: build it
/// with [`SourceResult::succeeded`] or [`SourceResult::failed`].
#[derive(Debug, Clone)]
pub struct SourceResult {
    source_id: SourceId,
    items: Vec<ResultItem>,
    total_hits: i64,
    properties: PropertyBag,
    elapsed: Duration,
    error: Option<SourceError>,
}

impl SourceResult {
    pub fn succeeded(source_id: SourceId, response: SourceResponse, elapsed: Duration) -> Self {
        Self {
            source_id,
            items: response.items,
            total_hits: response.total_hits,
            properties: response.properties,
            elapsed,
            error: None,
        }
    }

    pub fn failed(source_id: SourceId, error: SourceError, elapsed: Duration) -> Self {
        Self {
            source_id,
            items: Vec::new(),
            total_hits: 0,
            properties: PropertyBag::new(),
            elapsed,
            error: Some(error),
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn items(&self) -> &[ResultItem] {
        &self.items
    }

    pub fn total_hits(&self) -> i64 {
        self.total_hits
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn error(&self) -> Option<&SourceError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Insert or replace a property on a successful result.
    pub fn set_property(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.properties.insert(key.into(), value);
    }

    /// Split into owned items and properties for merging.
    pub fn into_parts(self) -> (Vec<ResultItem>, PropertyBag) {
        (self.items, self.properties)
    }
}
