// SPDX-License-Identifier: PMPL-1.0-or-later
//! Single-source invocation.
//!
//! Runs on a blocking worker thread. Whatever the source does (answer,
//! return an error, panic) comes back as a [`SourceResult`]; the merger
//! never sees a raw failure. One attempt per federation, no retries.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use fedsearch_model::{keys, PropertyBag, Query, SourceError, SourceRef, SourceResult};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::panic_message;

/// Call `source` with `query` and time it.
///
/// On success the elapsed milliseconds are stored in the result's property
/// bag under [`keys::ELAPSED_TIME`].
pub fn invoke(source: &SourceRef, query: &Query, props: &PropertyBag) -> SourceResult {
    let source_id = source.id().clone();
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| source.source().query(query, props)));
    let elapsed = started.elapsed();

    match outcome {
        Ok(Ok(response)) => {
            debug!(
                source_id = %source_id,
                items = response.items.len(),
                total_hits = response.total_hits,
                elapsed_ms = elapsed.as_millis() as u64,
                "Source answered"
            );
            let mut result = SourceResult::succeeded(source_id, response, elapsed);
            result.set_property(keys::ELAPSED_TIME, json!(elapsed.as_millis() as u64));
            result
        }
        Ok(Err(error)) => {
            warn!(source_id = %source_id, error = %error, "Source query failed");
            SourceResult::failed(source_id, error, elapsed)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(source_id = %source_id, panic = %message, "Source panicked during query");
            SourceResult::failed(source_id, SourceError::Panicked(message), elapsed)
        }
    }
}
