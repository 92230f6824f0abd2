// SPDX-License-Identifier: PMPL-1.0-or-later
//! The live federated response.
//!
//! A [`FederationResponse`] is handed to the caller while sources are still
//! answering. The merger appends results and updates metadata; the caller
//! drains results with [`FederationResponse::next`] and may read hits and
//! per-source details at any time.
//!
//! All mutable state sits behind one mutex. It is held for a single merge
//! step or a single read, never across an `.await` or a source call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fedsearch_model::{PropertyBag, ResultItem, SourceId};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// Where a source stands within one federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

impl SourceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SourceStatus::Pending)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, SourceStatus::Failed | SourceStatus::TimedOut)
    }
}

/// Diagnostics recorded for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingDetail {
    pub status: SourceStatus,
    /// Error text when the source failed or timed out.
    pub error: Option<String>,
    /// Wall-clock time of the invocation (or of the wait, on timeout).
    pub elapsed_ms: Option<f64>,
    /// Results from this source that made it into the merged page.
    pub result_count: usize,
    /// The source's own hit estimate, -1 when unknown, 0 on failure.
    pub hits: i64,
    pub warnings: Vec<String>,
}

impl ProcessingDetail {
    pub fn pending() -> Self {
        Self {
            status: SourceStatus::Pending,
            error: None,
            elapsed_ms: None,
            result_count: 0,
            hits: 0,
            warnings: Vec::new(),
        }
    }
}

/// Mutable state shared by the merger and readers.
#[derive(Debug)]
pub(crate) struct ResponseState {
    pub(crate) hits: u64,
    pub(crate) queue: VecDeque<ResultItem>,
    /// Results accepted into the page so far, drained or not.
    pub(crate) merged: u64,
    pub(crate) skip_remaining: u64,
    pub(crate) page_size: u64,
    pub(crate) details: HashMap<SourceId, ProcessingDetail>,
    pub(crate) properties: PropertyBag,
    pub(crate) closed_at: Option<Instant>,
}

impl ResponseState {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub(crate) fn page_full(&self) -> bool {
        self.page_size > 0 && self.merged >= self.page_size
    }

    /// Append an accepted result. Returns false once the page is full or
    /// the stream is closed.
    pub(crate) fn add_result(&mut self, item: ResultItem) -> bool {
        if self.is_closed() || self.page_full() {
            return false;
        }
        self.queue.push_back(item);
        self.merged += 1;
        true
    }

    /// Mark the stream closed. Returns true on the first call only.
    pub(crate) fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.closed_at = Some(Instant::now());
        true
    }
}

struct Shared {
    federation_id: Uuid,
    started_at: Instant,
    site_list: Vec<SourceId>,
    state: Mutex<ResponseState>,
    changed: Notify,
}

/// Handle to a federated response; clones share the same stream.
#[derive(Clone)]
pub struct FederationResponse {
    shared: Arc<Shared>,
}

impl FederationResponse {
    pub(crate) fn new(
        federation_id: Uuid,
        site_list: Vec<SourceId>,
        results_to_skip: u64,
        page_size: u64,
    ) -> Self {
        let details = site_list
            .iter()
            .map(|id| (id.clone(), ProcessingDetail::pending()))
            .collect();
        let state = ResponseState {
            hits: 0,
            queue: VecDeque::new(),
            merged: 0,
            skip_remaining: results_to_skip,
            page_size,
            details,
            properties: PropertyBag::new(),
            closed_at: None,
        };
        Self {
            shared: Arc::new(Shared {
                federation_id,
                started_at: Instant::now(),
                site_list,
                state: Mutex::new(state),
                changed: Notify::new(),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every consumer waiting for a result or for close.
    pub(crate) fn wake(&self) {
        self.shared.changed.notify_waiters();
    }

    /// Close the stream; consumers see end-of-stream once the queue drains.
    pub(crate) fn close(&self) -> bool {
        let closed_now = self.lock().close();
        if closed_now {
            self.wake();
        }
        closed_now
    }

    // -----------------------------------------------------------------------
    // Consumer side
    // -----------------------------------------------------------------------

    /// Next merged result, waiting until one arrives. `None` means the
    /// stream is closed and fully drained.
    pub async fn next(&self) -> Option<ResultItem> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a wake in between is not lost.
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    return Some(item);
                }
                if state.is_closed() {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Like [`FederationResponse::next`] but gives up after `timeout`.
    ///
    /// `None` is ambiguous here; check [`FederationResponse::has_more_results`].
    pub async fn poll(&self, timeout: Duration) -> Option<ResultItem> {
        tokio::time::timeout(timeout, self.next())
            .await
            .ok()
            .flatten()
    }

    /// Drain the stream to the end.
    pub async fn collect(&self) -> Vec<ResultItem> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item);
        }
        items
    }

    /// Wait until the gather has finished, without consuming results.
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    // -----------------------------------------------------------------------
    // Metadata snapshots (never wait on the gather)
    // -----------------------------------------------------------------------

    /// Identifier of this federation call, as used in log fields.
    pub fn federation_id(&self) -> Uuid {
        self.shared.federation_id
    }

    /// Sources that were actually queried.
    pub fn site_list(&self) -> &[SourceId] {
        &self.shared.site_list
    }

    /// Sum of the hit estimates reported so far. Final once closed.
    pub fn hits(&self) -> u64 {
        self.lock().hits
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }

    /// Results accepted into the page, including ones already drained.
    pub fn merged_count(&self) -> u64 {
        self.lock().merged
    }

    /// Results waiting in the stream right now.
    pub fn queued_count(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether `next` can still yield something.
    pub fn has_more_results(&self) -> bool {
        let state = self.lock();
        !state.queue.is_empty() || !state.is_closed()
    }

    pub fn processing_details(&self) -> HashMap<SourceId, ProcessingDetail> {
        self.lock().details.clone()
    }

    pub fn processing_detail(&self, source_id: &SourceId) -> Option<ProcessingDetail> {
        self.lock().details.get(source_id).cloned()
    }

    /// True when at least one source was queried and every one of them
    /// failed or timed out. Sources still pending count as not failed.
    pub fn all_sources_failed(&self) -> bool {
        let state = self.lock();
        !state.details.is_empty() && state.details.values().all(|d| d.status.is_failure())
    }

    pub fn properties(&self) -> PropertyBag {
        self.lock().properties.clone()
    }

    pub fn property(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().properties.get(key).cloned()
    }

    /// Annotate the response, e.g. from a post-gather plugin.
    pub fn set_property(&self, key: impl Into<String>, value: serde_json::Value) {
        self.lock().properties.insert(key.into(), value);
    }

    /// Time since the federation started, frozen once the stream closes.
    pub fn elapsed(&self) -> Duration {
        let closed_at = self.lock().closed_at;
        closed_at.unwrap_or_else(Instant::now) - self.shared.started_at
    }
}

impl std::fmt::Debug for FederationResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FederationResponse")
            .field("federation_id", &self.shared.federation_id)
            .field("site_list", &self.shared.site_list)
            .field("hits", &state.hits)
            .field("merged", &state.merged)
            .field("closed", &state.is_closed())
            .finish()
    }
}
