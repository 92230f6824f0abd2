// SPDX-License-Identifier: PMPL-1.0-or-later
//! Federation entry point.

use std::sync::Arc;

use fedsearch_model::{PropertyBag, Query, SourceRef};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use crate::config::FederationConfig;
use crate::dispatcher::{distinct_sources, Dispatcher};
use crate::error::FederationError;
use crate::merger::GatherMerger;
use crate::plugin::PluginPipeline;
use crate::pool::WorkerPool;
use crate::response::FederationResponse;
use crate::rewriter::QueryRewriter;
use crate::slow_source::SlowSourceLog;
use crate::stats::{FederationStats, FederationStatsSnapshot};

/// Sends one query to many sources and merges their answers.
///
/// Cheap to share behind an `Arc`; every federation run through the same
/// `Federator` shares its worker pool, stats and slow-source log.
#[derive(Debug)]
pub struct Federator {
    config: FederationConfig,
    rewriter: QueryRewriter,
    dispatcher: Dispatcher,
    plugins: PluginPipeline,
    stats: Arc<FederationStats>,
    slow_log: Arc<SlowSourceLog>,
}

impl Federator {
    /// Federator running on the tokio runtime of the calling context.
    pub fn new(config: FederationConfig) -> Result<Self, FederationError> {
        config.validate()?;
        let pool = WorkerPool::current(config.max_concurrent_sources)?;
        Ok(Self::build(config, pool))
    }

    /// Federator spawning its work onto `runtime`.
    pub fn with_runtime(config: FederationConfig, runtime: Handle) -> Result<Self, FederationError> {
        config.validate()?;
        let pool = WorkerPool::new(runtime, config.max_concurrent_sources);
        Ok(Self::build(config, pool))
    }

    fn build(config: FederationConfig, pool: WorkerPool) -> Self {
        let stats = Arc::new(FederationStats::default());
        Self {
            rewriter: QueryRewriter::new(config.max_start_index),
            dispatcher: Dispatcher::new(pool, Arc::clone(&stats)),
            plugins: PluginPipeline::new(),
            slow_log: Arc::new(SlowSourceLog::new(config.slow_source.clone())),
            stats,
            config,
        }
    }

    /// Replace the plugin pipeline.
    pub fn with_plugins(mut self, plugins: PluginPipeline) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn stats(&self) -> FederationStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn slow_sources(&self) -> &SlowSourceLog {
        &self.slow_log
    }

    /// Stop accepting federations. In-flight ones run to completion.
    pub fn shutdown(&self) {
        info!("Federator shutting down; worker pool closed to new work");
        self.dispatcher.pool().shutdown();
    }

    /// Federate `query` across `sources`. See
    /// [`Federator::federate_with_properties`].
    pub fn federate(
        &self,
        sources: Vec<SourceRef>,
        query: Query,
    ) -> Result<FederationResponse, FederationError> {
        self.federate_with_properties(sources, query, PropertyBag::new())
    }

    /// Dispatch `query` to every distinct source and return the live
    /// response without waiting for any of them.
    ///
    /// Source failures never surface here; they are recorded in the
    /// response's processing details. Errors are returned only when the
    /// worker pool no longer accepts work.
    #[instrument(
        skip(self, sources, query, properties),
        fields(federation_id = tracing::field::Empty, requested_sources = sources.len())
    )]
    pub fn federate_with_properties(
        &self,
        sources: Vec<SourceRef>,
        query: Query,
        properties: PropertyBag,
    ) -> Result<FederationResponse, FederationError> {
        let federation_id = Uuid::new_v4();
        Span::current().record("federation_id", tracing::field::display(federation_id));
        FederationStats::incr(&self.stats.federations);

        // A timeout past the end of the clock means no deadline.
        let deadline = query
            .timeout()
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let sources = distinct_sources(sources, &self.stats);
        let rewritten = self.rewriter.rewrite(&query, sources.len());

        let mut requests = Vec::with_capacity(sources.len());
        for source in sources {
            match self
                .plugins
                .run_pre_dispatch(&source, rewritten.query.clone(), &self.stats)
            {
                Some(per_source) => requests.push((source, per_source)),
                None => FederationStats::incr(&self.stats.sources_vetoed),
            }
        }
        if requests.is_empty() {
            warn!(federation_id = %federation_id, "No sources left to query");
        }

        let dispatched = self.dispatcher.dispatch(requests, &properties)?;
        info!(
            federation_id = %federation_id,
            sources = dispatched.site_list.len(),
            start_index = query.start_index(),
            page_size = query.page_size(),
            results_to_skip = rewritten.results_to_skip,
            timeout_ms = query.timeout().map(|t| t.as_millis() as u64),
            "Federation started"
        );

        let response = FederationResponse::new(
            federation_id,
            dispatched.site_list,
            rewritten.results_to_skip,
            rewritten.effective_page_size,
        );
        GatherMerger::new(
            response.clone(),
            self.plugins.clone(),
            Arc::clone(&self.stats),
            Arc::clone(&self.slow_log),
        )
        .spawn(self.dispatcher.pool().runtime(), dispatched.handles, deadline);

        debug!(federation_id = %federation_id, "Response handed to caller");
        Ok(response)
    }
}
