//! Integration tests for the enhanced client and cache warming

mod common;

use common::{harness, harness_with, Harness, Reply, ScriptedRegistry};
use pretty_assertions::assert_eq;
use registry_resilience::client::{WarmQuery, WarmingConfig};
use registry_resilience::error_recovery::{CircuitBreakerConfig, CircuitState};
use registry_resilience::{
    CacheWarmer, FallbackSource, Freshness, HealthStatus, RegistryError, SearchRequest,
};
use rstest::*;
use std::time::Duration;

#[rstest]
#[tokio::test]
async fn test_cache_hit_skips_upstream(#[future] harness: Harness) {
    let h = harness.await;

    let first = h.client.get_details("K123456").await.unwrap();
    let second = h.client.get_details("K123456").await.unwrap();

    assert!(!first.meta.cache_hit);
    assert!(second.meta.cache_hit);
    assert_eq!(first.data, second.data);
    assert_eq!(h.registry.details_calls(), 1);

    let metrics = h.client.get_performance_metrics().await;
    assert_eq!(metrics.requests, 2);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.upstream_calls, 1);
}

#[tokio::test]
async fn test_concurrent_identical_searches_hit_upstream_once() {
    let registry = ScriptedRegistry::new().with_latency(Duration::from_millis(50));
    let h = harness_with(registry, CircuitBreakerConfig::default()).await;

    let (a, b) = tokio::join!(
        h.client.search(SearchRequest::new("glucose monitor")),
        h.client.search(SearchRequest::new("Glucose   Monitor")),
    );

    assert_eq!(a.unwrap().data, b.unwrap().data);
    assert_eq!(h.registry.searches(), 1);
}

#[tokio::test]
async fn test_batch_search_preserves_order() {
    let registry = ScriptedRegistry::new().with_latency(Duration::from_millis(5));
    registry.script_search([
        Reply::Ok,
        Reply::Fail(RegistryError::validation("bad query")),
    ]);
    let h = harness_with(registry, CircuitBreakerConfig::default()).await;
    let queries = ["alpha", "beta", "gamma", "delta", "epsilon"];

    let results = h
        .client
        .batch_search(queries.iter().map(|q| SearchRequest::new(*q)).collect(), 2)
        .await;

    assert_eq!(results.len(), queries.len());
    let names: Vec<Option<String>> = results
        .iter()
        .map(|r| {
            r.as_ref()
                .ok()
                .and_then(|resp| resp.data.results.first())
                .and_then(|row| row["name"].as_str().map(String::from))
        })
        .collect();
    assert_eq!(names[0].as_deref(), Some("alpha"));
    assert!(names[1].is_none());
    assert_eq!(names[2].as_deref(), Some("gamma"));
    assert_eq!(names[4].as_deref(), Some("epsilon"));
}

#[tokio::test]
async fn test_stale_cache_fallback_after_breaker_opens() {
    let registry = ScriptedRegistry::new();
    let h = harness_with(
        registry,
        CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(300),
            ..Default::default()
        },
    )
    .await;

    let cached = h.client.lookup("DXY").await.unwrap();
    let busy = || Reply::Fail(RegistryError::server_error(503, "busy"));
    h.registry.script_lookup([busy(), busy(), busy()]);

    let degraded = h.client.refresh_lookup("DXY").await.unwrap();
    assert_eq!(degraded.meta.fallback, Some(FallbackSource::StaleCache));
    assert_eq!(degraded.data, cached.data);

    // Breaker is open now; the next refresh fails fast but still degrades
    let calls_before = h.registry.lookups();
    let again = h.client.refresh_lookup("DXY").await.unwrap();
    assert!(again.meta.degraded);
    assert_eq!(h.registry.lookups(), calls_before);

    let health = h.client.health_check().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(
        health.circuit_breakers.get("registry/lookup"),
        Some(&CircuitState::Open)
    );
}

#[rstest]
#[tokio::test]
async fn test_health_check_reports_upstream_state(#[future] harness: Harness) {
    let h = harness.await;

    let healthy = h.client.health_check().await;
    assert_eq!(healthy.status, HealthStatus::Healthy);
    assert!(healthy.upstream.healthy);

    h.registry.set_healthy(false);
    let degraded = h.client.health_check().await;
    assert_eq!(degraded.status, HealthStatus::Degraded);
    assert!(degraded.upstream.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_freshness_requirement_forces_refetch() {
    let h = harness_with(ScriptedRegistry::new(), CircuitBreakerConfig::default()).await;
    h.client.get_details("K1").await.unwrap();

    tokio::time::advance(Duration::from_secs(400)).await;
    let recent = h.client.get_details("K1").await.unwrap();
    let fresh = h
        .client
        .get_details_with_freshness("K1", Freshness::Fresh)
        .await
        .unwrap();

    assert!(recent.meta.cache_hit);
    assert!(!fresh.meta.cache_hit);
    assert_eq!(h.registry.details_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_warmer_keeps_queries_warm_and_survives_failures() {
    let registry = ScriptedRegistry::new();
    registry.script_search([Reply::Fail(RegistryError::validation("rejected"))]);
    let h = harness_with(registry, CircuitBreakerConfig::default()).await;

    let handle = CacheWarmer::spawn(
        h.client.clone(),
        WarmingConfig {
            enabled: true,
            interval: Duration::from_secs(60),
            queries: vec![WarmQuery::Search(SearchRequest::new("catheter"))],
            ..Default::default()
        },
    );
    tokio::time::sleep(Duration::from_secs(61)).await;
    handle.shutdown().await;

    assert_eq!(h.registry.searches(), 2);
    let warming = h.client.get_performance_metrics().await.warming;
    assert_eq!(warming.cycles, 2);
    assert_eq!(warming.failures, 1);
    assert_eq!(warming.refreshed, 1);

    let served = h.client.search(SearchRequest::new("catheter")).await.unwrap();
    assert!(served.meta.cache_hit);
}
