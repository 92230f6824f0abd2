// SPDX-License-Identifier: PMPL-1.0-or-later
//! Federation error types.
//!
//! Only conditions outside a single source's control surface as
//! [`FederationError`]. Source failures are recorded on the response.

use thiserror::Error;

/// Errors that abort a whole federation call.
#[derive(Error, Debug)]
pub enum FederationError {
    #[error("worker pool has been shut down")]
    PoolShutdown,

    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A plugin panicked while processing.
///
/// Logged and counted; the pipeline carries on as if the plugin had
/// asked to be skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("plugin '{plugin}' failed: {message}")]
pub struct PluginError {
    pub plugin: String,
    pub message: String,
}

impl PluginError {
    pub fn new(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
