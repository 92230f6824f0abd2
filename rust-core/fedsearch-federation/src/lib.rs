// SPDX-License-Identifier: PMPL-1.0-or-later
//! Fedsearch Federation
//!
//! Scatter-gather engine that sends one logical query to many backend
//! sources at once and merges their answers into a single bounded stream.
//!
//! ## Flow
//!
//! 1. [`rewriter`] adjusts paging so every source starts at offset 1 and
//!    returns enough candidates for the caller's page.
//! 2. [`plugin`] pre-dispatch plugins may rewrite or veto each source's query.
//! 3. [`dispatcher`] submits one [`invoker`] task per distinct source to the
//!    bounded [`pool`].
//! 4. [`merger`] folds completions, in the order they arrive, into the live
//!    [`response::FederationResponse`], trimming to the requested window.
//!    Post-gather plugins transform each source's batch just before it is
//!    merged, and annotate the response once every source has reported.
//!
//! [`Federator::federate`] returns as soon as step 3 has been scheduled;
//! the caller drains the response while sources are still answering.
//!
//! Sources never fail a federation. Their errors, timeouts and panics land
//! in per-source [`ProcessingDetail`]s, so a response where every source
//! failed looks like an empty result set until the details are inspected.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod federator;
pub mod invoker;
pub mod merger;
pub mod plugin;
pub mod pool;
pub mod response;
pub mod rewriter;
pub mod slow_source;
pub mod stats;

pub use config::FederationConfig;
pub use error::{FederationError, PluginError};
pub use federator::Federator;
pub use plugin::{GatheredBatch, PluginOutcome, PluginPipeline, PostGatherPlugin, PreDispatchPlugin};
pub use pool::{TaskHandle, WorkerPool};
pub use response::{FederationResponse, ProcessingDetail, SourceStatus};
pub use rewriter::{QueryRewriter, RewrittenQuery};
pub use slow_source::{SlowSourceConfig, SlowSourceEntry, SlowSourceLog, SlowSourceSummary};
pub use stats::{FederationStats, FederationStatsSnapshot};

pub use fedsearch_model::{
    keys, PropertyBag, Query, ResultItem, Source, SourceError, SourceId, SourceRef,
    SourceResponse, SourceResult,
};
