// SPDX-License-Identifier: PMPL-1.0-or-later
//! Federation counters.
//!
//! Monotonic counters shared by every federation run through one
//! [`crate::Federator`], readable at any time via [`FederationStats::snapshot`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::response::SourceStatus;

#[derive(Debug, Default)]
pub struct FederationStats {
    pub(crate) federations: AtomicU64,
    pub(crate) sources_dispatched: AtomicU64,
    pub(crate) sources_succeeded: AtomicU64,
    pub(crate) sources_failed: AtomicU64,
    pub(crate) sources_timed_out: AtomicU64,
    pub(crate) duplicates_dropped: AtomicU64,
    pub(crate) sources_vetoed: AtomicU64,
    pub(crate) plugin_errors: AtomicU64,
    pub(crate) results_merged: AtomicU64,
}

impl FederationStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, status: SourceStatus) {
        match status {
            SourceStatus::Succeeded => Self::incr(&self.sources_succeeded),
            SourceStatus::Failed => Self::incr(&self.sources_failed),
            SourceStatus::TimedOut => Self::incr(&self.sources_timed_out),
            SourceStatus::Pending => {}
        }
    }

    pub fn snapshot(&self) -> FederationStatsSnapshot {
        FederationStatsSnapshot {
            federations: self.federations.load(Ordering::Relaxed),
            sources_dispatched: self.sources_dispatched.load(Ordering::Relaxed),
            sources_succeeded: self.sources_succeeded.load(Ordering::Relaxed),
            sources_failed: self.sources_failed.load(Ordering::Relaxed),
            sources_timed_out: self.sources_timed_out.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            sources_vetoed: self.sources_vetoed.load(Ordering::Relaxed),
            plugin_errors: self.plugin_errors.load(Ordering::Relaxed),
            results_merged: self.results_merged.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`FederationStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationStatsSnapshot {
    pub federations: u64,
    pub sources_dispatched: u64,
    pub sources_succeeded: u64,
    pub sources_failed: u64,
    pub sources_timed_out: u64,
    pub duplicates_dropped: u64,
    pub sources_vetoed: u64,
    pub plugin_errors: u64,
    pub results_merged: u64,
}
