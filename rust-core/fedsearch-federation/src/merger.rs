// SPDX-License-Identifier: PMPL-1.0-or-later
//! Gather: fold source completions into the live response.
//!
//! A monitor task awaits every dispatched source at once and merges each
//! result the moment it arrives, so results are ordered by completion
//! time, not dispatch order and not relevance.
//!
//! ## Merge step
//!
//! Post-gather plugins transform the source's items first, outside the
//! lock. Then, under the response mutex:
//!
//! 1. Add the source's hit estimate (unknown estimates are ignored).
//! 2. Discard items while the global skip count is positive, then append
//!    items stamped with the source ID until the page is full.
//! 3. Close the stream as soon as the page is full.
//! 4. Record the source's processing detail and merge its properties,
//!    keeping elapsed time per source.
//!
//! Once the stream is closed, hits and results are final. Sources that
//! complete later only update their processing detail.
//!
//! When every source has reported, post-gather completion hooks run and
//! then the stream is closed if it is still open.
//!
//! ## Deadline
//!
//! With a query timeout, every wait is bounded by the same deadline.
//! Sources that miss it are recorded as timed out and abandoned; a source
//! blocked inside its query call keeps its thread until it returns.

use std::collections::HashMap;
use std::sync::Arc;

use fedsearch_model::{keys, PropertyBag, SourceError, SourceId, SourceResult};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::plugin::{GatheredBatch, PluginPipeline};
use crate::pool::{join_failure, TaskHandle};
use crate::response::{FederationResponse, ProcessingDetail, SourceStatus};
use crate::slow_source::SlowSourceLog;
use crate::stats::FederationStats;

/// A finished (or abandoned) source invocation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: SourceStatus,
    pub result: SourceResult,
}

impl Completion {
    /// Classify an invocation result as succeeded or failed.
    pub fn from_result(result: SourceResult) -> Self {
        let status = if result.is_success() {
            SourceStatus::Succeeded
        } else {
            SourceStatus::Failed
        };
        Self { status, result }
    }

    pub fn timed_out(result: SourceResult) -> Self {
        Self {
            status: SourceStatus::TimedOut,
            result,
        }
    }
}

/// What one merge step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub appended: usize,
    pub skipped: usize,
    /// This step filled the page and closed the stream.
    pub closed_stream: bool,
    /// The stream was already closed when this source reported.
    pub late: bool,
}

/// Merges source completions into one [`FederationResponse`].
#[derive(Debug, Clone)]
pub struct GatherMerger {
    response: FederationResponse,
    plugins: PluginPipeline,
    stats: Arc<FederationStats>,
    slow_log: Arc<SlowSourceLog>,
}

impl GatherMerger {
    pub fn new(
        response: FederationResponse,
        plugins: PluginPipeline,
        stats: Arc<FederationStats>,
        slow_log: Arc<SlowSourceLog>,
    ) -> Self {
        Self {
            response,
            plugins,
            stats,
            slow_log,
        }
    }

    /// Start the monitor task on `runtime`.
    pub fn spawn(
        self,
        runtime: &Handle,
        handles: HashMap<SourceId, TaskHandle>,
        deadline: Option<Instant>,
    ) -> JoinHandle<()> {
        runtime.spawn(self.run(handles, deadline))
    }

    /// Await every handle, merging in completion order, then close.
    pub async fn run(self, handles: HashMap<SourceId, TaskHandle>, deadline: Option<Instant>) {
        let federation_id = self.response.federation_id();
        debug!(
            federation_id = %federation_id,
            sources = handles.len(),
            has_deadline = deadline.is_some(),
            "Gathering source results"
        );

        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .map(|(source_id, handle)| await_completion(source_id, handle, deadline))
            .collect();

        while let Some(completion) = pending.next().await {
            self.merge(completion);
        }

        self.plugins.run_on_complete(&self.response, &self.stats);
        if self.response.close() {
            info!(
                federation_id = %federation_id,
                hits = self.response.hits(),
                results = self.response.merged_count(),
                elapsed_ms = self.response.elapsed().as_millis() as u64,
                "All sources reported; federation complete"
            );
        }
    }

    /// Apply one completion to the response.
    pub fn merge(&self, completion: Completion) -> MergeOutcome {
        let Completion { status, result } = completion;
        let source_id = result.source_id().clone();
        let total_hits = result.total_hits();
        let elapsed_ms = result.elapsed().as_secs_f64() * 1000.0;
        let error = result.error().map(|e| e.to_string());
        let (mut items, properties) = result.into_parts();
        for item in &mut items {
            item.source_id = Some(source_id.clone());
        }
        if !items.is_empty() && !self.response.is_closed() {
            let batch = GatheredBatch {
                source_id: source_id.clone(),
                items,
                response: self.response.clone(),
            };
            items = self.plugins.run_post_gather(batch, &self.stats).items;
        }

        let mut outcome = MergeOutcome::default();
        let pending_after;
        {
            let mut state = self.response.lock();

            if state.is_closed() {
                outcome.late = true;
            } else {
                if total_hits > 0 {
                    state.hits += total_hits as u64;
                }
                for item in items {
                    if state.skip_remaining > 0 {
                        state.skip_remaining -= 1;
                        outcome.skipped += 1;
                        continue;
                    }
                    if !state.add_result(item) {
                        break;
                    }
                    outcome.appended += 1;
                }
                if state.page_full() {
                    outcome.closed_stream = state.close();
                }
            }

            let mut detail = ProcessingDetail {
                status,
                error,
                elapsed_ms: Some(elapsed_ms),
                result_count: outcome.appended,
                hits: if status == SourceStatus::Succeeded { total_hits } else { 0 },
                warnings: Vec::new(),
            };
            if outcome.late && status == SourceStatus::Succeeded {
                detail
                    .warnings
                    .push("completed after the result stream closed; results discarded".to_string());
            }
            state.details.insert(source_id.clone(), detail);
            merge_properties(&mut state.properties, &source_id, properties);

            pending_after = state
                .details
                .values()
                .filter(|d| !d.status.is_terminal())
                .count();
        }

        if outcome.appended > 0 || outcome.closed_stream {
            self.response.wake();
        }

        self.stats.record_outcome(status);
        FederationStats::add(&self.stats.results_merged, outcome.appended as u64);
        self.slow_log.record(
            &self.response.federation_id().to_string(),
            &source_id,
            elapsed_ms,
            status,
            outcome.appended,
        );

        match status {
            SourceStatus::TimedOut => warn!(
                federation_id = %self.response.federation_id(),
                source_id = %source_id,
                elapsed_ms = elapsed_ms,
                "Source missed the federation deadline"
            ),
            _ => debug!(
                federation_id = %self.response.federation_id(),
                source_id = %source_id,
                status = ?status,
                appended = outcome.appended,
                skipped = outcome.skipped,
                hits = total_hits,
                late = outcome.late,
                "Merged source result"
            ),
        }
        if outcome.closed_stream {
            info!(
                federation_id = %self.response.federation_id(),
                pending_sources = pending_after,
                "Page full; result stream closed"
            );
        }

        outcome
    }
}

/// Wait for one source, bounded by the deadline if there is one.
async fn await_completion(
    source_id: SourceId,
    mut handle: TaskHandle,
    deadline: Option<Instant>,
) -> Completion {
    let joined = match deadline {
        Some(deadline) => {
            let waited = tokio::time::timeout_at(deadline, handle.join()).await;
            match waited {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    let waited = deadline.saturating_duration_since(handle.submitted_at());
                    return Completion::timed_out(SourceResult::failed(
                        source_id,
                        SourceError::Timeout { waited },
                        waited,
                    ));
                }
            }
        }
        None => handle.join().await,
    };

    match joined {
        Ok(result) => Completion::from_result(result),
        Err(e) => Completion::from_result(SourceResult::failed(
            source_id,
            join_failure(&e),
            handle.submitted_at().elapsed(),
        )),
    }
}

/// Merge a source's properties into the response's.
///
/// The elapsed-time entry becomes `{source_id: value}` so sources do not
/// overwrite each other; every other key is last-writer-wins.
fn merge_properties(target: &mut PropertyBag, source_id: &SourceId, properties: PropertyBag) {
    for (key, value) in properties {
        if key == keys::ELAPSED_TIME {
            let slot = target
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(per_source) = slot {
                per_source.insert(source_id.to_string(), value);
            }
        } else {
            target.insert(key, value);
        }
    }
}
