// SPDX-License-Identifier: PMPL-1.0-or-later
//! Federation configuration.
//!
//! Defaults:
//! - max_start_index: 50 000 (larger offsets are clamped)
//! - max_concurrent_sources: 32 in-flight source invocations
//! - slow_source: 1000 ms threshold, 1000 retained entries
//!
//! `from_env` overlays `FEDSEARCH_*` variables on top of the defaults.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

use crate::error::FederationError;
use crate::slow_source::SlowSourceConfig;

/// Configuration for a [`crate::Federator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Start indexes above this are clamped before paging is rewritten.
    #[serde(default = "default_max_start_index")]
    pub max_start_index: u64,
    /// Size of the worker pool: source invocations allowed in flight at once.
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,
    #[serde(default)]
    pub slow_source: SlowSourceConfig,
}

fn default_max_start_index() -> u64 {
    50_000
}

fn default_max_concurrent_sources() -> usize {
    32
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            max_start_index: default_max_start_index(),
            max_concurrent_sources: default_max_concurrent_sources(),
            slow_source: SlowSourceConfig::default(),
        }
    }
}

impl FederationConfig {
    /// Defaults overridden by process environment variables:
    /// `FEDSEARCH_MAX_START_INDEX`, `FEDSEARCH_MAX_CONCURRENT_SOURCES`,
    /// `FEDSEARCH_SLOW_SOURCE_THRESHOLD_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`FederationConfig::from_env`] with a custom variable lookup.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "FEDSEARCH_MAX_START_INDEX") {
            config.max_start_index = v;
        }
        if let Some(v) = parse_var(&lookup, "FEDSEARCH_MAX_CONCURRENT_SOURCES") {
            config.max_concurrent_sources = v;
        }
        if let Some(v) = parse_var(&lookup, "FEDSEARCH_SLOW_SOURCE_THRESHOLD_MS") {
            config.slow_source.threshold_ms = v;
        }
        config
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), FederationError> {
        if self.max_start_index == 0 {
            return Err(FederationError::InvalidConfig(
                "max_start_index must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_sources == 0 {
            return Err(FederationError::InvalidConfig(
                "max_concurrent_sources must be at least 1".to_string(),
            ));
        }
        let threshold = self.slow_source.threshold_ms;
        if threshold.is_nan() || threshold < 0.0 {
            return Err(FederationError::InvalidConfig(format!(
                "slow_source.threshold_ms must be non-negative, got {}",
                threshold
            )));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring malformed configuration value");
            None
        }
    }
}
