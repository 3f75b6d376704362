//! Dynamic discovery against live mock endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use federation_runtime::config::{DiscoveryMode, RegistryConfig, RetryPolicy};
use federation_runtime::registry::{
    RecordingHook, ServiceDefinition, SubgraphRegistry, TopologyChange,
};

mod common;
use common::MockResponse;

fn endpoint(addr: SocketAddr) -> String {
    format!("http://{}/services", addr)
}

fn dynamic_config(endpoints: Vec<String>) -> RegistryConfig {
    RegistryConfig {
        discovery_mode: DiscoveryMode::Dynamic,
        discovery_endpoints: endpoints,
        health_check_timeout_ms: 2_000,
        retry_policy: RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 10,
            max_delay_ms: 50,
        },
        ..RegistryConfig::default()
    }
}

async fn counting_backend(response: MockResponse) -> (SocketAddr, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let addr = common::start_programmable_backend(move |_path| {
        counter.fetch_add(1, Ordering::SeqCst);
        let response = response.clone();
        async move { response }
    })
    .await;
    (addr, hits)
}

#[tokio::test]
async fn test_failing_endpoints_do_not_suppress_others() {
    let good = common::start_mock_backend(MockResponse::ok(
        r#"{"services":[{"id":"users","url":"http://users:4001"},{"id":"orders","url":"http://orders:4002"},{"id":42}]}"#,
    ))
    .await;
    let (failing, failing_hits) = counting_backend(MockResponse::status(500)).await;
    let (malformed, malformed_hits) = counting_backend(MockResponse::ok("{not json")).await;
    let not_array = common::start_mock_backend(MockResponse::ok(r#"{"services":{"id":"x"}}"#)).await;

    let hook = RecordingHook::new();
    let registry = SubgraphRegistry::new(
        dynamic_config(vec![
            endpoint(failing),
            endpoint(good),
            endpoint(malformed),
            endpoint(not_array),
        ]),
        hook.clone(),
    )
    .unwrap();
    assert!(registry.is_empty());

    let services = registry.discover().await.unwrap();
    assert_eq!(
        services,
        vec![
            ServiceDefinition::new("users", "http://users:4001"),
            ServiceDefinition::new("orders", "http://orders:4002"),
        ]
    );

    // Retries stop at max_attempts.
    assert_eq!(failing_hits.load(Ordering::SeqCst), 2);
    assert_eq!(malformed_hits.load(Ordering::SeqCst), 2);

    assert_eq!(registry.len(), 2);
    assert_eq!(hook.changes().len(), 2);
}

#[tokio::test]
async fn test_rediscovery_only_notifies_changes() {
    let moved = Arc::new(AtomicU32::new(0));
    let flag = moved.clone();
    let addr = common::start_programmable_backend(move |_path| {
        let body = if flag.load(Ordering::SeqCst) == 0 {
            r#"{"services":[{"id":"users","url":"http://users:4001"},{"id":"orders","url":"http://orders:4002"}]}"#
        } else {
            r#"{"services":[{"id":"users","url":"http://users-v2:4001"},{"id":"orders","url":"http://orders:4002"}]}"#
        };
        async move { MockResponse::ok(body) }
    })
    .await;

    let hook = RecordingHook::new();
    let registry = SubgraphRegistry::new(dynamic_config(vec![endpoint(addr)]), hook.clone()).unwrap();

    registry.discover().await.unwrap();
    registry.discover().await.unwrap();
    assert_eq!(hook.changes().len(), 2);

    moved.store(1, Ordering::SeqCst);
    registry.discover().await.unwrap();
    let changes = hook.changes();
    assert_eq!(changes.len(), 3);
    assert_eq!(
        changes[2],
        TopologyChange::Registered(ServiceDefinition::new("users", "http://users-v2:4001"))
    );
    assert_eq!(registry.get("users").unwrap().url, "http://users-v2:4001");
}

#[tokio::test]
async fn test_duplicate_ids_last_endpoint_wins() {
    let first = common::start_mock_backend(MockResponse::ok(
        r#"{"services":[{"id":"users","url":"http://old:4001"}]}"#,
    ))
    .await;
    let second = common::start_mock_backend(MockResponse::ok(
        r#"{"services":[{"id":"users","url":"http://new:4001"}]}"#,
    ))
    .await;

    let registry = SubgraphRegistry::with_logging_hook(dynamic_config(vec![
        endpoint(first),
        endpoint(second),
    ]))
    .unwrap();

    let services = registry.discover().await.unwrap();
    assert_eq!(services, vec![ServiceDefinition::new("users", "http://new:4001")]);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_unreachable_endpoint_yields_empty_round() {
    let registry =
        SubgraphRegistry::with_logging_hook(dynamic_config(vec![endpoint(common::unused_addr())]))
            .unwrap();
    assert!(registry.discover().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_auto_discovery_populates_registry() {
    let addr = common::start_mock_backend(MockResponse::ok(
        r#"{"services":[{"id":"users","url":"http://users:4001"}]}"#,
    ))
    .await;
    let registry = Arc::new(
        SubgraphRegistry::with_logging_hook(dynamic_config(vec![endpoint(addr)])).unwrap(),
    );

    let task = registry.with_auto_discovery(Duration::from_millis(20));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while registry.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(registry.get("users").is_some());

    task.shutdown().await;
}

#[tokio::test]
async fn test_discarded_handle_keeps_discovering() {
    let (addr, hits) = counting_backend(MockResponse::ok(
        r#"{"services":[{"id":"users","url":"http://users:4001"}]}"#,
    ))
    .await;
    let registry = Arc::new(
        SubgraphRegistry::with_logging_hook(dynamic_config(vec![endpoint(addr)])).unwrap(),
    );

    let _ = registry.with_auto_discovery(Duration::from_millis(20));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while hits.load(Ordering::SeqCst) < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(hits.load(Ordering::SeqCst) >= 2, "expected repeated discovery rounds");
    assert!(registry.get("users").is_some());
}
