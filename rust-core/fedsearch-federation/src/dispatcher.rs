// SPDX-License-Identifier: PMPL-1.0-or-later
//! Scatter: one invocation task per distinct source.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fedsearch_model::{PropertyBag, Query, SourceId, SourceRef};
use tracing::{debug, warn};

use crate::error::FederationError;
use crate::invoker;
use crate::pool::{TaskHandle, WorkerPool};
use crate::stats::FederationStats;

/// Tasks submitted for one federation.
#[derive(Debug)]
pub struct Dispatched {
    pub handles: HashMap<SourceId, TaskHandle>,
    /// Dispatched sources in submission order.
    pub site_list: Vec<SourceId>,
}

/// Drop repeated source IDs, keeping the first occurrence of each.
pub fn distinct_sources(sources: Vec<SourceRef>, stats: &FederationStats) -> Vec<SourceRef> {
    let mut seen = HashSet::with_capacity(sources.len());
    let mut distinct = Vec::with_capacity(sources.len());
    for source in sources {
        if seen.insert(source.id().clone()) {
            distinct.push(source);
        } else {
            warn!(source_id = %source.id(), "Duplicate source in federation request; keeping first occurrence");
            FederationStats::incr(&stats.duplicates_dropped);
        }
    }
    distinct
}

/// Submits source invocations to a shared [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: WorkerPool,
    stats: Arc<FederationStats>,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, stats: Arc<FederationStats>) -> Self {
        Self { pool, stats }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Submit each `(source, query)` pair and return without waiting.
    ///
    /// Fails only if the pool has been shut down; tasks submitted before
    /// the failure are aborted.
    pub fn dispatch(
        &self,
        requests: Vec<(SourceRef, Query)>,
        props: &PropertyBag,
    ) -> Result<Dispatched, FederationError> {
        let mut handles: HashMap<SourceId, TaskHandle> = HashMap::with_capacity(requests.len());
        let mut site_list = Vec::with_capacity(requests.len());

        for (source, query) in requests {
            let source_id = source.id().clone();
            if handles.contains_key(&source_id) {
                warn!(source_id = %source_id, "Source already dispatched; skipping duplicate");
                FederationStats::incr(&self.stats.duplicates_dropped);
                continue;
            }

            let props = props.clone();
            let submitted = self
                .pool
                .submit(source_id.clone(), move || invoker::invoke(&source, &query, &props));
            let handle = match submitted {
                Ok(handle) => handle,
                Err(e) => {
                    for handle in handles.values() {
                        handle.abort();
                    }
                    return Err(e);
                }
            };

            debug!(source_id = %source_id, "Source dispatched");
            FederationStats::incr(&self.stats.sources_dispatched);
            site_list.push(source_id.clone());
            handles.insert(source_id, handle);
        }

        Ok(Dispatched { handles, site_list })
    }
}
