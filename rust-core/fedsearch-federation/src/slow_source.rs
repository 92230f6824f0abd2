// SPDX-License-Identifier: PMPL-1.0-or-later
//!
//! Slow source log.
//!
//! Records source invocations that take longer than a configurable
//! threshold. Each slow invocation emits a structured `tracing` warning
//! and is kept in an in-memory ring buffer for later inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use tracing::warn;

use fedsearch_model::SourceId;

use crate::response::SourceStatus;

/// Configuration for the slow source log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowSourceConfig {
    /// Invocations taking at least this long (milliseconds) are logged.
    /// Default: 1000ms.
    pub threshold_ms: f64,

    /// Maximum number of entries to keep in the ring buffer.
    /// Default: 1000.
    pub max_entries: usize,

    /// Default: true.
    pub enabled: bool,
}

impl Default for SlowSourceConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 1000.0,
            max_entries: 1000,
            enabled: true,
        }
    }
}

/// A single slow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowSourceEntry {
    pub timestamp: DateTime<Utc>,
    /// Federation call the invocation belonged to.
    pub federation_id: String,
    pub source_id: SourceId,
    pub elapsed_ms: f64,
    pub status: SourceStatus,
    /// Results the source contributed to the merged page.
    pub result_count: usize,
}

/// Slow source log: ring buffer with tracing integration.
pub struct SlowSourceLog {
    config: RwLock<SlowSourceConfig>,
    entries: RwLock<VecDeque<SlowSourceEntry>>,
}

impl SlowSourceLog {
    pub fn new(config: SlowSourceConfig) -> Self {
        Self {
            config: RwLock::new(config),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SlowSourceConfig::default())
    }

    /// Record one finished invocation. Returns `true` if it was slow.
    pub fn record(
        &self,
        federation_id: &str,
        source_id: &SourceId,
        elapsed_ms: f64,
        status: SourceStatus,
        result_count: usize,
    ) -> bool {
        let config = self.config();
        if !config.enabled || elapsed_ms < config.threshold_ms {
            return false;
        }

        warn!(
            federation_id = federation_id,
            source_id = %source_id,
            elapsed_ms = elapsed_ms,
            threshold_ms = config.threshold_ms,
            status = ?status,
            results = result_count,
            "Slow source detected"
        );

        let entry = SlowSourceEntry {
            timestamp: Utc::now(),
            federation_id: federation_id.to_string(),
            source_id: source_id.clone(),
            elapsed_ms,
            status,
            result_count,
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push_back(entry);
        while entries.len() > config.max_entries {
            entries.pop_front();
        }

        true
    }

    /// Most recent slow invocations, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SlowSourceEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn all(&self) -> Vec<SlowSourceEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn set_config(&self, config: SlowSourceConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn config(&self) -> SlowSourceConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn summary(&self) -> SlowSourceSummary {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if entries.is_empty() {
            return SlowSourceSummary::default();
        }

        let total = entries.len();
        let sum_ms: f64 = entries.iter().map(|e| e.elapsed_ms).sum();
        let max_ms = entries.iter().map(|e| e.elapsed_ms).fold(0.0_f64, f64::max);
        let min_ms = entries
            .iter()
            .map(|e| e.elapsed_ms)
            .fold(f64::INFINITY, f64::min);

        // Source that shows up most often
        let mut per_source: HashMap<&SourceId, u64> = HashMap::new();
        for entry in entries.iter() {
            *per_source.entry(&entry.source_id).or_insert(0) += 1;
        }
        let most_frequent_source = per_source
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(id, _)| id.clone());

        SlowSourceSummary {
            total_count: total,
            avg_ms: sum_ms / total as f64,
            max_ms,
            min_ms,
            most_frequent_source,
        }
    }
}

impl std::fmt::Debug for SlowSourceLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlowSourceLog")
            .field("config", &self.config())
            .field("entries", &self.count())
            .finish()
    }
}

/// Summary statistics for the slow source log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlowSourceSummary {
    pub total_count: usize,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub min_ms: f64,
    pub most_frequent_source: Option<SourceId>,
}
