// SPDX-License-Identifier: PMPL-1.0-or-later
//! Integration tests for the federation engine
//!
//! Drives `Federator` end to end against in-memory sources with latency,
//! failure and panic behaviour.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fedsearch_federation::{
    keys, FederationConfig, FederationError, FederationResponse, Federator, GatheredBatch,
    PluginOutcome,
    PluginPipeline, PostGatherPlugin, PreDispatchPlugin, PropertyBag, Query, ResultItem, Source,
    SourceError, SourceId, SourceRef, SourceResponse, SourceStatus,
};
use fedsearch_model::{InMemorySource, SourceBehavior, SourceGate};
use serde_json::{json, Value};

fn federator() -> Federator {
    Federator::new(FederationConfig::default()).unwrap()
}

fn numbered(id: &str, count: usize) -> Arc<InMemorySource> {
    Arc::new(InMemorySource::with_numbered_items(id, count))
}

fn delayed(id: &str, count: usize, delay_ms: u64) -> Arc<InMemorySource> {
    Arc::new(
        InMemorySource::with_numbered_items(id, count)
            .with_behavior(SourceBehavior::Delay(Duration::from_millis(delay_ms))),
    )
}

/// A source that answers only once `gate` opens.
fn held(id: &str, count: usize, gate: &Arc<SourceGate>) -> Arc<InMemorySource> {
    Arc::new(
        InMemorySource::with_numbered_items(id, count)
            .with_behavior(SourceBehavior::Block(Arc::clone(gate))),
    )
}

fn failing(id: &str, message: &str) -> Arc<InMemorySource> {
    Arc::new(
        InMemorySource::with_numbered_items(id, 10)
            .with_behavior(SourceBehavior::Fail(message.to_string())),
    )
}

fn as_ref(source: &Arc<InMemorySource>) -> SourceRef {
    SourceRef::from(Arc::clone(source))
}

/// `(source, n)` pairs, in stream order.
fn tags(items: &[ResultItem]) -> Vec<(String, u64)> {
    items
        .iter()
        .map(|item| {
            (
                item.payload["source"].as_str().unwrap().to_string(),
                item.payload["n"].as_u64().unwrap(),
            )
        })
        .collect()
}

// ============================================================================
// Paging
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_offset_is_applied_after_merge() {
    let federator = federator();
    let a = numbered("a", 10);
    // b answers later so a's results are merged first
    let b = delayed("b", 10, 100);

    let query = Query::new(json!(null))
        .with_start_index(6)
        .unwrap()
        .with_page_size(5);
    let response = federator
        .federate(vec![as_ref(&a), as_ref(&b)], query)
        .unwrap();
    let items = response.collect().await;
    // b records its query before sleeping
    tokio::time::sleep(Duration::from_millis(50)).await;

    for source in [&a, &b] {
        let received = source.received_queries();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].start_index(), 1);
        assert_eq!(received[0].page_size(), 10);
    }
    assert_eq!(
        tags(&items),
        (5..10).map(|n| ("a".to_string(), n)).collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_skip_spans_source_boundaries() {
    let federator = federator();
    let a = numbered("a", 3);
    let b = delayed("b", 10, 100);

    let query = Query::new(json!(null))
        .with_start_index(5)
        .unwrap()
        .with_page_size(3);
    let response = federator
        .federate(vec![as_ref(&a), as_ref(&b)], query)
        .unwrap();
    let items = response.collect().await;

    // 3 from a and 1 from b are skipped
    assert_eq!(
        tags(&items),
        vec![("b".to_string(), 1), ("b".to_string(), 2), ("b".to_string(), 3)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_source_query_is_forwarded_unchanged() {
    let federator = federator();
    let a = numbered("a", 20);

    let query = Query::new(json!({ "title": "lake" }))
        .with_start_index(6)
        .unwrap()
        .with_page_size(5);
    let response = federator.federate(vec![as_ref(&a)], query.clone()).unwrap();
    let items = response.collect().await;

    assert_eq!(a.received_queries(), vec![query]);
    assert_eq!(
        tags(&items),
        (5..10).map(|n| ("a".to_string(), n)).collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_start_index_is_clamped() {
    let config = FederationConfig {
        max_start_index: 4,
        ..Default::default()
    };
    let federator = Federator::new(config).unwrap();
    let a = numbered("a", 10);
    let b = delayed("b", 10, 50);

    let query = Query::new(json!(null))
        .with_start_index(1_000)
        .unwrap()
        .with_page_size(2);
    let response = federator
        .federate(vec![as_ref(&a), as_ref(&b)], query)
        .unwrap();
    let items = response.collect().await;

    assert_eq!(a.received_queries()[0].page_size(), 5);
    assert_eq!(tags(&items), vec![("a".to_string(), 3), ("a".to_string(), 4)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_page_closes_stream_before_slow_sources() {
    let federator = federator();
    let fast = numbered("fast", 50);
    let slow = delayed("slow", 50, 500);

    let query = Query::new(json!(null)).with_page_size(5);
    let started = Instant::now();
    let response = federator
        .federate(vec![as_ref(&fast), as_ref(&slow)], query)
        .unwrap();
    let items = response.collect().await;

    assert_eq!(items.len(), 5);
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(response.is_closed());
    assert_eq!(
        response.processing_detail(&SourceId::from("slow")).unwrap().status,
        SourceStatus::Pending
    );

    // The late source is still recorded, but hits and results are final.
    tokio::time::sleep(Duration::from_millis(800)).await;
    let detail = response.processing_detail(&SourceId::from("slow")).unwrap();
    assert_eq!(detail.status, SourceStatus::Succeeded);
    assert_eq!(detail.result_count, 0);
    assert!(!detail.warnings.is_empty());
    assert_eq!(response.hits(), 50);
    assert_eq!(response.merged_count(), 5);
}

// ============================================================================
// Failures and timeouts
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partial_failure_keeps_other_results() {
    let federator = federator();
    let sources = vec![
        as_ref(&numbered("a", 3)),
        as_ref(&failing("broken", "connection refused")),
        as_ref(&numbered("c", 4)),
    ];

    let response = federator
        .federate(sources, Query::new(json!(null)))
        .unwrap();
    let items = response.collect().await;

    assert_eq!(items.len(), 7);
    assert_eq!(response.hits(), 7);
    assert!(!response.all_sources_failed());

    let details = response.processing_details();
    assert_eq!(details.len(), 3);
    let broken = &details[&SourceId::from("broken")];
    assert_eq!(broken.status, SourceStatus::Failed);
    assert!(broken.error.as_deref().unwrap().contains("connection refused"));
    assert_eq!(broken.hits, 0);
    assert_eq!(details[&SourceId::from("a")].status, SourceStatus::Succeeded);
    assert_eq!(details[&SourceId::from("c")].result_count, 4);

    let stats = federator.stats();
    assert_eq!(stats.sources_succeeded, 2);
    assert_eq!(stats.sources_failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_all_sources_failing_is_an_empty_response() {
    let federator = federator();
    let sources = vec![
        as_ref(&failing("x", "down")),
        as_ref(&failing("y", "down")),
    ];

    let response = federator
        .federate(sources, Query::new(json!(null)))
        .unwrap();
    let items = response.collect().await;

    assert!(items.is_empty());
    assert_eq!(response.hits(), 0);
    assert!(response.all_sources_failed());
    assert!(response
        .processing_details()
        .values()
        .all(|d| d.status == SourceStatus::Failed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_source_is_recorded_as_failed() {
    let federator = federator();
    let exploding = Arc::new(
        InMemorySource::with_numbered_items("exploding", 3)
            .with_behavior(SourceBehavior::Panic("index corrupted".to_string())),
    );

    let response = federator
        .federate(
            vec![as_ref(&exploding), as_ref(&numbered("ok", 2))],
            Query::new(json!(null)),
        )
        .unwrap();
    let items = response.collect().await;

    assert_eq!(items.len(), 2);
    let detail = response
        .processing_detail(&SourceId::from("exploding"))
        .unwrap();
    assert_eq!(detail.status, SourceStatus::Failed);
    assert!(detail.error.unwrap().contains("index corrupted"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_abandons_slow_source() {
    let federator = federator();
    let gate = SourceGate::new();
    let slow = held("slow", 5, &gate);
    let fast = numbered("fast", 5);

    let query = Query::new(json!(null)).with_timeout(Duration::from_millis(100));
    let started = Instant::now();
    let response = federator
        .federate(vec![as_ref(&slow), as_ref(&fast)], query)
        .unwrap();
    let items = response.collect().await;
    let waited = started.elapsed();

    assert!(waited >= Duration::from_millis(90), "closed too early: {:?}", waited);
    assert!(waited < Duration::from_millis(600), "closed too late: {:?}", waited);
    assert_eq!(items.len(), 5);
    assert!(items
        .iter()
        .all(|i| i.source_id == Some(SourceId::from("fast"))));

    let detail = response.processing_detail(&SourceId::from("slow")).unwrap();
    assert_eq!(detail.status, SourceStatus::TimedOut);
    assert!(detail.error.unwrap().contains("timed out"));
    assert!(!response.all_sources_failed());
    assert_eq!(federator.stats().sources_timed_out, 1);

    // the abandoned call finishes later without touching the closed response
    gate.open();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(response.collect().await.is_empty());
    assert_eq!(
        response.processing_detail(&SourceId::from("slow")).unwrap().status,
        SourceStatus::TimedOut
    );
    assert_eq!(slow.invocation_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeouts_count_towards_all_failed() {
    let federator = federator();
    let gate = SourceGate::new();
    let query = Query::new(json!(null)).with_timeout(Duration::from_millis(50));
    let response = federator
        .federate(
            vec![as_ref(&held("slow", 1, &gate)), as_ref(&failing("down", "nope"))],
            query,
        )
        .unwrap();
    response.wait_closed().await;

    assert!(response.all_sources_failed());
    assert!(response.collect().await.is_empty());
    gate.open();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unbounded_timeout_means_no_deadline() {
    let federator = federator();
    let a = numbered("a", 3);
    let b = delayed("b", 3, 20);

    let query = Query::new(json!(null)).with_timeout(Duration::MAX);
    let response = federator
        .federate(vec![as_ref(&a), as_ref(&b)], query)
        .unwrap();
    let items = response.collect().await;

    assert_eq!(items.len(), 6);
    assert!(!response.all_sources_failed());
    assert_eq!(federator.stats().sources_timed_out, 0);
}

// ============================================================================
// Request shape
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_source_queried_once() {
    let federator = federator();
    let a = numbered("a", 3);

    let response = federator
        .federate(vec![as_ref(&a), as_ref(&a)], Query::new(json!(null)))
        .unwrap();
    let items = response.collect().await;

    assert_eq!(a.invocation_count(), 1);
    assert_eq!(items.len(), 3);
    assert_eq!(response.site_list(), &[SourceId::from("a")]);
    assert_eq!(federator.stats().duplicates_dropped, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_sources_closes_immediately() {
    let federator = federator();
    let response = federator
        .federate(Vec::new(), Query::new(json!(null)))
        .unwrap();
    assert!(response.collect().await.is_empty());
    assert!(!response.all_sources_failed());
    assert!(response.site_list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_hit_estimates_are_ignored() {
    let federator = federator();
    let unknown = Arc::new(InMemorySource::with_numbered_items("unknown", 4).with_total_hits(-1));
    let known = Arc::new(InMemorySource::with_numbered_items("known", 2).with_total_hits(120));

    let response = federator
        .federate(vec![as_ref(&unknown), as_ref(&known)], Query::new(json!(null)))
        .unwrap();
    response.wait_closed().await;

    assert_eq!(response.hits(), 120);
    assert_eq!(
        response.processing_detail(&SourceId::from("unknown")).unwrap().hits,
        -1
    );
}

struct EchoProperty;

impl Source for EchoProperty {
    fn id(&self) -> &str {
        "echo"
    }

    fn query(&self, _query: &Query, props: &PropertyBag) -> Result<SourceResponse, SourceError> {
        let tenant = props.get("tenant").cloned().unwrap_or(Value::Null);
        Ok(SourceResponse::new(vec![ResultItem::new(json!({ "tenant": tenant }))], 1)
            .with_property("format", json!("geojson")))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_properties_flow_both_ways() {
    let federator = federator();
    let mut props = PropertyBag::new();
    props.insert("tenant".to_string(), json!("acme"));

    let response = federator
        .federate_with_properties(
            vec![SourceRef::from(Arc::new(EchoProperty)), as_ref(&numbered("a", 1))],
            Query::new(json!(null)),
            props,
        )
        .unwrap();
    let items = response.collect().await;

    assert!(items.iter().any(|i| i.payload["tenant"] == "acme"));
    assert_eq!(response.property("format"), Some(json!("geojson")));

    let elapsed = response.property(keys::ELAPSED_TIME).unwrap();
    let per_source = elapsed.as_object().unwrap();
    assert!(per_source.contains_key("echo"));
    assert!(per_source.contains_key("a"));
}

// ============================================================================
// Streaming and concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_results_stream_in_completion_order() {
    let federator = federator();
    let slow = delayed("slow", 2, 200);
    let fast = numbered("fast", 2);

    let response = federator
        .federate(vec![as_ref(&slow), as_ref(&fast)], Query::new(json!(null)))
        .unwrap();

    let first = response.next().await.unwrap();
    assert_eq!(first.source_id, Some(SourceId::from("fast")));
    assert!(!response.is_closed());

    let rest = response.collect().await;
    assert_eq!(rest.len(), 3);
    assert_eq!(rest.last().unwrap().source_id, Some(SourceId::from("slow")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_size_bounds_parallel_sources() {
    let config = FederationConfig {
        max_concurrent_sources: 1,
        ..Default::default()
    };
    let federator = Federator::new(config).unwrap();
    let sources = (0..3)
        .map(|i| as_ref(&delayed(&format!("s{}", i), 1, 60)))
        .collect();

    let started = Instant::now();
    let response = federator
        .federate(sources, Query::new(json!(null)))
        .unwrap();
    let items = response.collect().await;

    assert_eq!(items.len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(170));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shut_down_federator_rejects_work() {
    let federator = federator();
    federator.shutdown();
    let err = federator
        .federate(vec![as_ref(&numbered("a", 1))], Query::new(json!(null)))
        .unwrap_err();
    assert!(matches!(err, FederationError::PoolShutdown));
}

// ============================================================================
// Plugins
// ============================================================================

struct DenyList(Vec<&'static str>);

impl PreDispatchPlugin for DenyList {
    fn name(&self) -> &str {
        "deny-list"
    }

    fn process(&self, source: &SourceRef, query: Query) -> PluginOutcome<Query> {
        if self.0.contains(&source.id().as_str()) {
            PluginOutcome::stop("source is deny-listed")
        } else {
            PluginOutcome::Continue(query)
        }
    }
}

struct AuditTag;

impl PostGatherPlugin for AuditTag {
    fn name(&self) -> &str {
        "audit-tag"
    }

    fn process(&self, batch: GatheredBatch) -> PluginOutcome<GatheredBatch> {
        PluginOutcome::Continue(batch)
    }

    fn on_complete(&self, response: &FederationResponse) {
        response.set_property("audited", json!(true));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_vetoed_source_is_never_queried() {
    let plugins = PluginPipeline::new()
        .with_pre_dispatch(Arc::new(DenyList(vec!["restricted"])))
        .with_post_gather(Arc::new(AuditTag));
    let federator = federator().with_plugins(plugins);
    let restricted = numbered("restricted", 3);
    let open = numbered("open", 3);

    let response = federator
        .federate(
            vec![as_ref(&restricted), as_ref(&open)],
            Query::new(json!(null)),
        )
        .unwrap();
    let items = response.collect().await;

    assert_eq!(restricted.invocation_count(), 0);
    assert_eq!(items.len(), 3);
    assert_eq!(response.site_list(), &[SourceId::from("open")]);
    assert!(response
        .processing_detail(&SourceId::from("restricted"))
        .is_none());
    assert_eq!(response.property("audited"), Some(json!(true)));
    assert_eq!(federator.stats().sources_vetoed, 1);
}

/// Drops odd-numbered items and marks the rest.
struct EvenOnly;

impl PostGatherPlugin for EvenOnly {
    fn name(&self) -> &str {
        "even-only"
    }

    fn process(&self, mut batch: GatheredBatch) -> PluginOutcome<GatheredBatch> {
        batch
            .items
            .retain(|item| item.payload["n"].as_u64().map_or(false, |n| n % 2 == 0));
        for item in &mut batch.items {
            item.payload["checked"] = json!(true);
        }
        PluginOutcome::Continue(batch)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_post_gather_plugin_rewrites_merged_results() {
    let federator =
        federator().with_plugins(PluginPipeline::new().with_post_gather(Arc::new(EvenOnly)));
    let a = numbered("a", 6);
    let b = delayed("b", 6, 50);

    let response = federator
        .federate(vec![as_ref(&a), as_ref(&b)], Query::new(json!(null)))
        .unwrap();
    let items = response.collect().await;

    assert_eq!(
        tags(&items),
        vec![
            ("a".to_string(), 0),
            ("a".to_string(), 2),
            ("a".to_string(), 4),
            ("b".to_string(), 0),
            ("b".to_string(), 2),
            ("b".to_string(), 4),
        ]
    );
    assert!(items.iter().all(|i| i.payload["checked"] == json!(true)));
    assert_eq!(response.hits(), 12);
}
