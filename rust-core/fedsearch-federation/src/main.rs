// SPDX-License-Identifier: PMPL-1.0-or-later
//! Fedsearch demo binary
//!
//! Federates one query across a handful of in-memory sources (one slow, one
//! failing) and prints the merged page plus a JSON summary.

use std::sync::Arc;
use std::time::Duration;

use fedsearch_federation::{FederationConfig, Federator, Query, SourceRef};
use fedsearch_model::{InMemorySource, SourceBehavior};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("FEDSEARCH_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = FederationConfig::from_env();
    tracing::info!(
        max_start_index = config.max_start_index,
        max_concurrent_sources = config.max_concurrent_sources,
        "Starting Fedsearch demo"
    );
    let federator = Federator::new(config)?;

    let sources = vec![
        SourceRef::from(Arc::new(InMemorySource::with_numbered_items("catalog-east", 12))),
        SourceRef::from(Arc::new(InMemorySource::with_numbered_items("catalog-west", 8))),
        SourceRef::from(Arc::new(
            InMemorySource::with_numbered_items("archive", 20)
                .with_behavior(SourceBehavior::Delay(Duration::from_millis(300))),
        )),
        SourceRef::from(Arc::new(
            InMemorySource::with_numbered_items("mirror", 5)
                .with_behavior(SourceBehavior::Fail("connection refused".to_string())),
        )),
    ];

    let query = Query::from_json(
        r#"{"filter": {"any_text": "river"}, "start_index": 3, "page_size": 10, "timeout_ms": 2000}"#,
    )?;

    let response = federator.federate(sources, query)?;
    let items = response.collect().await;

    for (position, item) in items.iter().enumerate() {
        let source = item.source_id.as_ref().map(|id| id.as_str()).unwrap_or("?");
        println!("{:>3}  {:<14} {}", position + 1, source, item.payload);
    }

    let summary = json!({
        "federation_id": response.federation_id().to_string(),
        "hits": response.hits(),
        "returned": items.len(),
        "elapsed_ms": response.elapsed().as_millis() as u64,
        "all_sources_failed": response.all_sources_failed(),
        "processing_details": response.processing_details(),
        "properties": response.properties(),
        "stats": federator.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
