//! Provider failover scenarios

mod common;

use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use usecase_runtime::error::ErrorKind;
use usecase_runtime::time::TrackingSleeper;
use usecase_runtime::PerformOptions;

const PROFILE: &str = "starwars/character-information";

async fn failing_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    server
}

async fn requests_received(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

#[tokio::test]
async fn priority_exhaustion_makes_one_attempt_per_provider() {
    let a = failing_server().await;
    let b = failing_server().await;
    let c = failing_server().await;

    let config = serde_json::json!({
        "profiles": {
            PROFILE: {
                "version": "1.0.0",
                "priority": ["a", "b", "c"],
                "defaults": {"Test": {"providerFailover": true}}
            }
        },
        "providers": {"a": {}, "b": {}, "c": {}}
    });

    let runtime = common::runtime_builder(
        PROFILE,
        "Test",
        &config,
        &[("a", a.uri()), ("b", b.uri()), ("c", c.uri())],
    )
    .with_sleeper(Arc::new(TrackingSleeper::new()))
    .build()
    .unwrap();

    let err = runtime
        .perform(PROFILE, "Test", serde_json::Value::Null, PerformOptions::default())
        .await
        .unwrap_err();

    // Abort-on-failure policies surface the last provider's HTTP error.
    assert_eq!(err.kind(), ErrorKind::Http);
    assert_eq!(requests_received(&a).await, 1);
    assert_eq!(requests_received(&b).await, 1);
    assert_eq!(requests_received(&c).await, 1);
}

fn failover_config() -> serde_json::Value {
    serde_json::json!({
        "profiles": {
            PROFILE: {
                "version": "1.0.0",
                "priority": ["a", "b"],
                "defaults": {"Test": {"providerFailover": true}},
                "providers": {
                    "a": {"defaults": {"Test": {"retryPolicy": {
                        "kind": "circuit-breaker",
                        "maxContiguousRetries": 2,
                        "requestTimeout": 1000
                    }}}},
                    "b": {}
                }
            }
        },
        "providers": {"a": {}, "b": {}}
    })
}

#[tokio::test]
async fn failover_switches_to_next_provider_after_circuit_opens() {
    let a = failing_server().await;
    let b = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"from": "b"})))
        .mount(&b)
        .await;

    let runtime = common::runtime_builder(
        PROFILE,
        "Test",
        &failover_config(),
        &[("a", a.uri()), ("b", b.uri())],
    )
    .with_sleeper(Arc::new(TrackingSleeper::new()))
    .build()
    .unwrap();

    let result = runtime
        .perform(PROFILE, "Test", serde_json::Value::Null, PerformOptions::default())
        .await
        .unwrap();

    assert_eq!(result, serde_json::json!({"from": "b"}));
    assert_eq!(requests_received(&a).await, 2);
    assert_eq!(requests_received(&b).await, 1);
    // Both providers were bound on the way.
    assert_eq!(runtime.bound_provider_count(), 2);
}

#[tokio::test]
async fn pinned_provider_never_fails_over() {
    let a = failing_server().await;
    let b = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"from": "b"})))
        .mount(&b)
        .await;

    let runtime = common::runtime_builder(
        PROFILE,
        "Test",
        &failover_config(),
        &[("a", a.uri()), ("b", b.uri())],
    )
    .with_sleeper(Arc::new(TrackingSleeper::new()))
    .build()
    .unwrap();

    let err = runtime
        .perform(
            PROFILE,
            "Test",
            serde_json::Value::Null,
            PerformOptions::new().with_provider("a"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "circuit breaker is open");
    assert_eq!(requests_received(&a).await, 2);
    assert_eq!(requests_received(&b).await, 0);
}

#[tokio::test]
async fn failover_sticks_for_subsequent_performs() {
    let a = failing_server().await;
    let b = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"from": "b"})))
        .mount(&b)
        .await;

    let runtime = common::runtime_builder(
        PROFILE,
        "Test",
        &failover_config(),
        &[("a", a.uri()), ("b", b.uri())],
    )
    .with_sleeper(Arc::new(TrackingSleeper::new()))
    .build()
    .unwrap();

    for _ in 0..2 {
        let result = runtime
            .perform(PROFILE, "Test", serde_json::Value::Null, PerformOptions::default())
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"from": "b"}));
    }

    // The second perform started at b directly.
    assert_eq!(requests_received(&a).await, 2);
    assert_eq!(requests_received(&b).await, 2);
}
