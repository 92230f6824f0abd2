// SPDX-License-Identifier: PMPL-1.0-or-later
//
// In-memory source for Fedsearch.
//
// Serves a fixed list of items, honouring the query's start index and page
// size the way a real backend would. The configurable behaviour (latency,
// failure, panic, blocking on a gate) makes it the test double for federation scenarios, and
// every query it receives is recorded for later inspection.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::error::SourceError;
use crate::query::Query;
use crate::result::{ResultItem, SourceResponse};
use crate::source::Source;
use crate::PropertyBag;

/// A latch a blocked [`InMemorySource`] waits on until it is opened.
#[derive(Debug, Default)]
pub struct SourceGate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl SourceGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Release every current and future waiter.
    pub fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.opened.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block the calling thread until [`SourceGate::open`] is called.
    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self
                .opened
                .wait(open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// How an [`InMemorySource`] reacts to a query.
#[derive(Debug, Clone)]
pub enum SourceBehavior {
    /// Answer immediately.
    Immediate,
    /// Sleep for the given duration, then answer.
    Delay(Duration),
    /// Block until the gate opens, then answer.
    Block(Arc<SourceGate>),
    /// Return an invocation error with this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
}

impl PartialEq for SourceBehavior {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Immediate, Self::Immediate) => true,
            (Self::Delay(a), Self::Delay(b)) => a == b,
            (Self::Block(a), Self::Block(b)) => Arc::ptr_eq(a, b),
            (Self::Fail(a), Self::Fail(b)) | (Self::Panic(a), Self::Panic(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SourceBehavior {}

/// A source backed by a `Vec` of items.
#[derive(Debug)]
pub struct InMemorySource {
    id: String,
    items: Vec<ResultItem>,
    behavior: SourceBehavior,
    total_hits: Option<i64>,
    received: Mutex<Vec<Query>>,
}

impl InMemorySource {
    /// Create a source serving `items` immediately.
    pub fn new(id: impl Into<String>, items: Vec<ResultItem>) -> Self {
        Self {
            id: id.into(),
            items,
            behavior: SourceBehavior::Immediate,
            total_hits: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Create a source serving `count` items whose payload is
    /// `{"source": id, "n": i}` for `i` in `0..count`.
    pub fn with_numbered_items(id: impl Into<String>, count: usize) -> Self {
        let id = id.into();
        let items = (0..count)
            .map(|n| ResultItem::new(json!({ "source": id, "n": n })))
            .collect();
        Self::new(id, items)
    }

    pub fn with_behavior(mut self, behavior: SourceBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Report this hit count instead of the number of stored items.
    pub fn with_total_hits(mut self, total_hits: i64) -> Self {
        self.total_hits = Some(total_hits);
        self
    }

    /// Number of times `query` has been called.
    pub fn invocation_count(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every query received so far, oldest first.
    pub fn received_queries(&self) -> Vec<Query> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn page(&self, query: &Query) -> Vec<ResultItem> {
        let skip = usize::try_from(query.start_index().saturating_sub(1)).unwrap_or(usize::MAX);
        let take = match usize::try_from(query.page_size()) {
            Ok(0) | Err(_) => usize::MAX,
            Ok(n) => n,
        };
        self.items.iter().skip(skip).take(take).cloned().collect()
    }
}

impl Source for InMemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn query(&self, query: &Query, _props: &PropertyBag) -> Result<SourceResponse, SourceError> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.clone());

        match &self.behavior {
            SourceBehavior::Immediate => {}
            SourceBehavior::Delay(d) => thread::sleep(*d),
            SourceBehavior::Block(gate) => gate.wait(),
            SourceBehavior::Fail(message) => return Err(SourceError::invocation(message.clone())),
            SourceBehavior::Panic(message) => panic!("{}", message),
        }

        let items = self.page(query);
        debug!(source_id = %self.id, returned = items.len(), "In-memory source answered");

        let total_hits = self.total_hits.unwrap_or(self.items.len() as i64);
        Ok(SourceResponse::new(items, total_hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_items() {
        let source = InMemorySource::with_numbered_items("mem", 10);
        let query = Query::new(json!(null))
            .with_start_index(4)
            .unwrap()
            .with_page_size(3);

        let response = source.query(&query, &PropertyBag::new()).unwrap();
        let ns: Vec<u64> = response
            .items
            .iter()
            .map(|i| i.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(ns, vec![3, 4, 5]);
        assert_eq!(response.total_hits, 10);
    }

    #[test]
    fn test_unbounded_page_returns_rest() {
        let source = InMemorySource::with_numbered_items("mem", 5);
        let query = Query::new(json!(null)).with_start_index(2).unwrap();
        let response = source.query(&query, &PropertyBag::new()).unwrap();
        assert_eq!(response.items.len(), 4);
    }

    #[test]
    fn test_failure_behavior() {
        let source = InMemorySource::with_numbered_items("broken", 3)
            .with_behavior(SourceBehavior::Fail("disk on fire".into()));
        let err = source
            .query(&Query::new(json!(null)), &PropertyBag::new())
            .unwrap_err();
        assert_eq!(err, SourceError::invocation("disk on fire"));
        assert_eq!(source.invocation_count(), 1);
    }

    #[test]
    fn test_blocked_source_answers_once_gate_opens() {
        let gate = SourceGate::new();
        let source = Arc::new(
            InMemorySource::with_numbered_items("held", 2)
                .with_behavior(SourceBehavior::Block(Arc::clone(&gate))),
        );

        let worker = {
            let source = Arc::clone(&source);
            thread::spawn(move || source.query(&Query::new(json!(null)), &PropertyBag::new()))
        };
        while source.invocation_count() == 0 {
            thread::yield_now();
        }
        assert!(!worker.is_finished());
        assert!(!gate.is_open());

        gate.open();
        let response = worker.join().unwrap().unwrap();
        assert_eq!(response.items.len(), 2);
        assert!(gate.is_open());
    }

    #[test]
    fn test_block_behaviors_compare_by_gate() {
        let gate = SourceGate::new();
        assert_eq!(
            SourceBehavior::Block(Arc::clone(&gate)),
            SourceBehavior::Block(Arc::clone(&gate))
        );
        assert_ne!(SourceBehavior::Block(gate), SourceBehavior::Block(SourceGate::new()));
    }

    #[test]
    fn test_records_received_queries() {
        let source = InMemorySource::with_numbered_items("mem", 1).with_total_hits(-1);
        let query = Query::new(json!({"q": "x"})).with_page_size(7);
        let response = source.query(&query, &PropertyBag::new()).unwrap();

        assert_eq!(response.total_hits, -1);
        assert_eq!(source.received_queries(), vec![query]);
    }
}
