// SPDX-License-Identifier: PMPL-1.0-or-later
//! The logical query handed to every federated source.
//!
//! A [`Query`] is immutable once built: paging changes made by the
//! federation engine produce a new value, so each source sees its own copy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ModelError;

/// Sort direction requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Sort specification forwarded verbatim to every source.
///
/// The federation engine never evaluates it; results are merged in
/// completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Attribute name the source should sort by.
    pub property: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(property: impl Into<String>, order: SortOrder) -> Self {
        Self {
            property: property.into(),
            order,
        }
    }
}

/// A search request.
///
/// - `filter`: opaque predicate, forwarded to sources
/// - `start_index`: 1-based offset of the first wanted result (always >= 1)
/// - `page_size`: maximum number of results, 0 means no limit
/// - `sort`: opaque sort specification, forwarded to sources
/// - `timeout`: global deadline for the federation, `None` means none
/// - `wants_total_count`: whether sources should compute total hits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawQuery")]
pub struct Query {
    filter: serde_json::Value,
    start_index: u64,
    page_size: u64,
    sort: Option<SortSpec>,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    timeout: Option<Duration>,
    wants_total_count: bool,
}

impl Query {
    /// A query for the first page with no limit, no sort and no deadline.
    pub fn new(filter: serde_json::Value) -> Self {
        Self {
            filter,
            start_index: 1,
            page_size: 0,
            sort: None,
            timeout: None,
            wants_total_count: false,
        }
    }

    /// Replace the start index. Fails when `start_index` is 0.
    pub fn with_start_index(mut self, start_index: u64) -> Result<Self, ModelError> {
        if start_index == 0 {
            return Err(ModelError::InvalidStartIndex(start_index));
        }
        self.start_index = start_index;
        Ok(self)
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set the federation deadline. A zero duration clears it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    pub fn with_total_count(mut self, wants_total_count: bool) -> Self {
        self.wants_total_count = wants_total_count;
        self
    }

    pub fn filter(&self) -> &serde_json::Value {
        &self.filter
    }

    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn wants_total_count(&self) -> bool {
        self.wants_total_count
    }

    /// Whether the page size bounds the number of results.
    pub fn is_paged(&self) -> bool {
        self.page_size > 0
    }

    /// Parse the JSON wire form, e.g. a query sent by a client.
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Unvalidated wire form of [`Query`].
#[derive(Deserialize)]
struct RawQuery {
    #[serde(default)]
    filter: serde_json::Value,
    #[serde(default = "default_start_index")]
    start_index: u64,
    #[serde(default)]
    page_size: u64,
    #[serde(default)]
    sort: Option<SortSpec>,
    #[serde(default, rename = "timeout_ms", with = "duration_ms")]
    timeout: Option<Duration>,
    #[serde(default)]
    wants_total_count: bool,
}

fn default_start_index() -> u64 {
    1
}

impl TryFrom<RawQuery> for Query {
    type Error = ModelError;

    fn try_from(raw: RawQuery) -> Result<Self, Self::Error> {
        let mut query = Query::new(raw.filter)
            .with_start_index(raw.start_index)?
            .with_page_size(raw.page_size)
            .with_total_count(raw.wants_total_count);
        if let Some(sort) = raw.sort {
            query = query.with_sort(sort);
        }
        if let Some(timeout) = raw.timeout {
            query = query.with_timeout(timeout);
        }
        Ok(query)
    }
}

/// `Option<Duration>` as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let q = Query::new(json!({"anyText": "harbor"}));
        assert_eq!(q.start_index(), 1);
        assert_eq!(q.page_size(), 0);
        assert!(!q.is_paged());
        assert!(q.timeout().is_none());
        assert!(q.sort().is_none());
        assert!(!q.wants_total_count());
    }

    #[test]
    fn test_zero_start_index_rejected() {
        let err = Query::new(json!(null)).with_start_index(0).unwrap_err();
        assert!(matches!(err, ModelError::InvalidStartIndex(0)));
    }

    #[test]
    fn test_zero_timeout_means_no_deadline() {
        let q = Query::new(json!(null))
            .with_timeout(Duration::from_millis(250))
            .with_timeout(Duration::ZERO);
        assert!(q.timeout().is_none());
    }

    #[test]
    fn test_serde_roundtrip_keeps_every_field() {
        let q = Query::new(json!({"title": "river"}))
            .with_start_index(11)
            .unwrap()
            .with_page_size(10)
            .with_sort(SortSpec::new("modified", SortOrder::Descending))
            .with_timeout(Duration::from_millis(1500))
            .with_total_count(true);

        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["timeout_ms"], 1500);
        assert_eq!(json["sort"]["order"], "descending");

        let parsed: Query = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, q);
    }

    #[test]
    fn test_deserialize_rejects_zero_start_index() {
        let result: Result<Query, _> =
            serde_json::from_value(json!({"filter": null, "start_index": 0}));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json_reports_malformed_input() {
        let q = Query::from_json(r#"{"filter": {"title": "fjord"}, "start_index": 3, "timeout_ms": 200}"#)
            .unwrap();
        assert_eq!(q.start_index(), 3);
        assert_eq!(q.timeout(), Some(Duration::from_millis(200)));

        let err = Query::from_json("{\"page_size\": ").unwrap_err();
        assert!(matches!(err, ModelError::Serialization(_)));

        let err = Query::from_json(r#"{"start_index": 0}"#).unwrap_err();
        assert!(matches!(err, ModelError::Serialization(_)));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let q: Query = serde_json::from_value(json!({"page_size": 5})).unwrap();
        assert_eq!(q.start_index(), 1);
        assert_eq!(q.page_size(), 5);
        assert!(q.timeout().is_none());
    }
}
