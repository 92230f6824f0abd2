// SPDX-License-Identifier: PMPL-1.0-or-later
//! Pre-dispatch and post-gather plugin pipeline.
//!
//! Plugins run strictly in registration order and steer the pipeline with
//! an explicit [`PluginOutcome`]:
//!
//! | Outcome    | Pre-dispatch                        | Post-gather                                |
//! |------------|-------------------------------------|--------------------------------------------|
//! | `Continue` | next plugin gets the new query      | next plugin gets the new batch             |
//! | `Skip`     | next plugin gets the same query     | next plugin gets the same batch            |
//! | `Stop`     | source vetoed, not dispatched       | remaining plugins skipped, partial or latest batch merged |
//!
//! Post-gather plugins see each source's results as a [`GatheredBatch`]
//! before they are merged, so they can filter, rewrite or reorder items.
//! Once every source has reported, [`PostGatherPlugin::on_complete`] runs
//! on the merged response for annotations.
//!
//! A panicking plugin is logged as a [`PluginError`] and treated as `Skip`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use fedsearch_model::{Query, ResultItem, SourceId, SourceRef};
use tracing::{debug, info, warn};

use crate::error::{panic_message, PluginError};
use crate::response::FederationResponse;
use crate::stats::FederationStats;

/// What a plugin wants the pipeline to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginOutcome<T> {
    /// Carry on with this (possibly rewritten) value.
    Continue(T),
    /// Ignore this plugin for this input.
    Skip { reason: String },
    /// Halt the pipeline. Post-gather plugins may hand back a partial value.
    Stop { reason: String, partial: Option<T> },
}

impl<T> PluginOutcome<T> {
    pub fn skip(reason: impl Into<String>) -> Self {
        PluginOutcome::Skip {
            reason: reason.into(),
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        PluginOutcome::Stop {
            reason: reason.into(),
            partial: None,
        }
    }

    pub fn stop_with(reason: impl Into<String>, partial: T) -> Self {
        PluginOutcome::Stop {
            reason: reason.into(),
            partial: Some(partial),
        }
    }
}

/// Runs before a source is dispatched; may rewrite or veto its query.
pub trait PreDispatchPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, source: &SourceRef, query: Query) -> PluginOutcome<Query>;
}

/// One source's results on their way into the merged response.
#[derive(Debug, Clone)]
pub struct GatheredBatch {
    pub source_id: SourceId,
    /// Items as returned by the source, stamped with its ID.
    pub items: Vec<ResultItem>,
    /// The response the items will be merged into, for annotations.
    pub response: FederationResponse,
}

/// Transforms gathered results before they are merged.
pub trait PostGatherPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, batch: GatheredBatch) -> PluginOutcome<GatheredBatch>;

    /// Called once every source has reported, before a stream that is
    /// still open is closed.
    fn on_complete(&self, _response: &FederationResponse) {}
}

/// Ordered plugin lists.
#[derive(Clone, Default)]
pub struct PluginPipeline {
    pre_dispatch: Vec<Arc<dyn PreDispatchPlugin>>,
    post_gather: Vec<Arc<dyn PostGatherPlugin>>,
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre_dispatch(mut self, plugin: Arc<dyn PreDispatchPlugin>) -> Self {
        self.pre_dispatch.push(plugin);
        self
    }

    pub fn with_post_gather(mut self, plugin: Arc<dyn PostGatherPlugin>) -> Self {
        self.post_gather.push(plugin);
        self
    }

    pub fn pre_dispatch_count(&self) -> usize {
        self.pre_dispatch.len()
    }

    pub fn post_gather_count(&self) -> usize {
        self.post_gather.len()
    }

    /// Query to send to `source`, or `None` if a plugin vetoed it.
    pub fn run_pre_dispatch(
        &self,
        source: &SourceRef,
        query: Query,
        stats: &FederationStats,
    ) -> Option<Query> {
        let mut current = query;
        for plugin in &self.pre_dispatch {
            let input = current.clone();
            match guarded(plugin.name(), stats, || plugin.process(source, input)) {
                PluginOutcome::Continue(next) => current = next,
                PluginOutcome::Skip { reason } => {
                    debug!(plugin = plugin.name(), source_id = %source.id(), reason = %reason, "Pre-dispatch plugin skipped");
                }
                PluginOutcome::Stop { reason, .. } => {
                    warn!(plugin = plugin.name(), source_id = %source.id(), reason = %reason, "Source vetoed by pre-dispatch plugin");
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Batch to merge. A stopping plugin yields its partial batch or the
    /// latest one.
    pub fn run_post_gather(&self, batch: GatheredBatch, stats: &FederationStats) -> GatheredBatch {
        let mut current = batch;
        for plugin in &self.post_gather {
            let input = current.clone();
            match guarded(plugin.name(), stats, || plugin.process(input)) {
                PluginOutcome::Continue(next) => current = next,
                PluginOutcome::Skip { reason } => {
                    debug!(plugin = plugin.name(), source_id = %current.source_id, reason = %reason, "Post-gather plugin skipped");
                }
                PluginOutcome::Stop { reason, partial } => {
                    info!(plugin = plugin.name(), source_id = %current.source_id, reason = %reason, "Post-gather pipeline stopped");
                    if let Some(partial) = partial {
                        current = partial;
                    }
                    break;
                }
            }
        }
        current
    }

    /// Run every post-gather completion hook on the merged response.
    pub fn run_on_complete(&self, response: &FederationResponse, stats: &FederationStats) {
        for plugin in &self.post_gather {
            guarded(plugin.name(), stats, || {
                plugin.on_complete(response);
                PluginOutcome::Continue(())
            });
        }
    }
}

impl std::fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pre: Vec<&str> = self.pre_dispatch.iter().map(|p| p.name()).collect();
        let post: Vec<&str> = self.post_gather.iter().map(|p| p.name()).collect();
        f.debug_struct("PluginPipeline")
            .field("pre_dispatch", &pre)
            .field("post_gather", &post)
            .finish()
    }
}

fn guarded<T, F>(name: &str, stats: &FederationStats, call: F) -> PluginOutcome<T>
where
    F: FnOnce() -> PluginOutcome<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let err = PluginError::new(name, panic_message(payload.as_ref()));
            warn!(error = %err, "Plugin failed; continuing without it");
            FederationStats::incr(&stats.plugin_errors);
            PluginOutcome::skip(err.to_string())
        }
    }
}
