//! Configuration loading tests

use pretty_assertions::assert_eq;
use registry_resilience::cache::CompressionType;
use registry_resilience::client::WarmQuery;
use registry_resilience::{AccessLayerConfig, CacheStrategy, RegistryError, ResilienceBuilder};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_KEYS: [&str; 3] = [
    "REGISTRY__RATE_LIMIT__MAX_REQUESTS",
    "REGISTRY__CACHE__DEFAULT_TTL",
    "REGISTRY__CLIENT__SERVICE_NAME",
];

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_defaults_without_file() {
    temp_env::with_vars_unset(ENV_KEYS, || {
        let config = AccessLayerConfig::load(None).unwrap();
        assert_eq!(config.rate_limit.max_requests, 240);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(3600));
        assert!(!config.warming.enabled);
    });
}

#[test]
fn test_load_from_toml_file() {
    let file = write_config(
        r#"
[rate_limit]
max_requests = 60
window_duration = "30s"

[circuit_breaker]
failure_threshold = 3
recovery_timeout = "2m"

[cache]
default_ttl = "2h"
compression = "lz4"

[client]
service_name = "device-registry"
search_strategy = "write_through"

[warming]
enabled = true
interval = "10m"

[[warming.queries]]
kind = "lookup"
code = "FRN"
"#,
    );

    temp_env::with_vars_unset(ENV_KEYS, || {
        let config = AccessLayerConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.rate_limit.max_requests, 60);
        assert_eq!(config.rate_limit.window_duration, Duration::from_secs(30));
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(120));
        assert_eq!(config.cache.default_ttl, Duration::from_secs(7200));
        assert_eq!(config.cache.compression, CompressionType::Lz4);
        assert_eq!(config.client.service_name, "device-registry");
        assert_eq!(config.client.search_strategy, CacheStrategy::WriteThrough);
        assert_eq!(config.warming.interval, Duration::from_secs(600));
        assert_eq!(
            config.warming.queries,
            vec![WarmQuery::Lookup { code: "FRN".into() }]
        );
        // Untouched sections keep their defaults
        assert_eq!(config.retry.max_retries, 3);
    });
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[rate_limit]
max_requests = 60
"#,
    );

    temp_env::with_vars(
        [
            ("REGISTRY__RATE_LIMIT__MAX_REQUESTS", Some("120")),
            ("REGISTRY__CACHE__DEFAULT_TTL", Some("45m")),
            ("REGISTRY__CLIENT__SERVICE_NAME", None),
        ],
        || {
            let config = AccessLayerConfig::load(Some(file.path())).unwrap();
            assert_eq!(config.rate_limit.max_requests, 120);
            assert_eq!(config.cache.default_ttl, Duration::from_secs(45 * 60));
        },
    );
}

#[test]
fn test_invalid_file_values_are_rejected() {
    let file = write_config(
        r#"
[cache]
min_ttl = "2h"
max_ttl = "1h"
"#,
    );

    temp_env::with_vars_unset(ENV_KEYS, || {
        let result = AccessLayerConfig::load(Some(file.path()));
        assert!(matches!(result, Err(RegistryError::Config(_))));
    });
}

#[tokio::test]
async fn test_builder_from_loaded_config() {
    let mut config = AccessLayerConfig::default();
    config.resilience.use_queue = true;
    config.queue.max_concurrent = 2;

    let manager = ResilienceBuilder::from_config(&config).build().await;

    assert!(manager.config().use_queue);
    let stats = manager.get_stats().await;
    assert_eq!(stats.total_calls, 0);
    assert_eq!(stats.queue.admitted, 0);
}
