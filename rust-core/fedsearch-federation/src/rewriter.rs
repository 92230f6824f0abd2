// SPDX-License-Identifier: PMPL-1.0-or-later
//! Per-source paging rewrite.
//!
//! Every source counts its results from 1, so the caller's page starting at
//! offset N can only be cut out after merging. When fanning out to more
//! than one source each source is asked for the first `start + size - 1`
//! results and the merger discards the first `start - 1` merged results.

use fedsearch_model::Query;
use tracing::warn;

/// The query sent to each source plus the window the merger must apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenQuery {
    /// Query forwarded to every source (before pre-dispatch plugins).
    pub query: Query,
    /// Merged results to discard before the first kept result.
    pub results_to_skip: u64,
    /// Maximum results kept after skipping, 0 means unbounded.
    pub effective_page_size: u64,
}

/// Computes per-source queries from the caller's paging parameters.
#[derive(Debug, Clone)]
pub struct QueryRewriter {
    max_start_index: u64,
}

impl QueryRewriter {
    pub fn new(max_start_index: u64) -> Self {
        Self {
            max_start_index: max_start_index.max(1),
        }
    }

    pub fn max_start_index(&self) -> u64 {
        self.max_start_index
    }

    /// Rewrite `original` for a fan-out to `source_count` sources.
    ///
    /// Identity (apart from clamping an oversized start index) when only one
    /// source is queried or the caller asks for the first page.
    pub fn rewrite(&self, original: &Query, source_count: usize) -> RewrittenQuery {
        let mut start = original.start_index();
        if start > self.max_start_index {
            warn!(
                requested = start,
                max = self.max_start_index,
                "Start index clamped to configured maximum"
            );
            start = self.max_start_index;
        }
        let page_size = original.page_size();

        if source_count <= 1 || start <= 1 {
            return RewrittenQuery {
                query: with_paging(original, start, page_size),
                results_to_skip: 0,
                effective_page_size: page_size,
            };
        }

        // An unbounded page stays unbounded: each source returns everything.
        let per_source_page = if page_size == 0 {
            0
        } else {
            start.saturating_add(page_size) - 1
        };

        RewrittenQuery {
            query: with_paging(original, 1, per_source_page),
            results_to_skip: start - 1,
            effective_page_size: page_size,
        }
    }
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new(crate::config::FederationConfig::default().max_start_index)
    }
}

fn with_paging(original: &Query, start_index: u64, page_size: u64) -> Query {
    if original.start_index() == start_index && original.page_size() == page_size {
        return original.clone();
    }
    // start_index is >= 1 on every path through `rewrite`; fall back to the
    // original query rather than fail the federation.
    match original.clone().with_start_index(start_index) {
        Ok(q) => q.with_page_size(page_size),
        Err(_) => original.clone(),
    }
}
