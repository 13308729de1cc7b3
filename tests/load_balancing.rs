//! Load-balanced dispatch: retry on same, retry on next, pool refresh.

use std::sync::Arc;

use resilient_dispatch::config::RetryStrategy;
use resilient_dispatch::error::Error;
use resilient_dispatch::http::{CallArgs, MethodKey, RequestTemplate};
use resilient_dispatch::load_balancer::{EndpointSpec, StaticDiscovery};
use resilient_dispatch::{Client, MethodSpec};

mod common;

const LIST: &str = "UserApi#list()";
const A: &str = "10.0.0.1:8080";
const B: &str = "10.0.0.2:8080";

fn list_users() -> MethodSpec {
    MethodSpec::new(MethodKey::new("UserApi", "list()"), RequestTemplate::get("/users"))
}

fn two_endpoints(max_same: u32, max_next: u32) -> resilient_dispatch::ClientConfig {
    let mut config = common::balanced_config(&["http://10.0.0.1:8080", "http://10.0.0.2:8080"]);
    config.retry.strategy = RetryStrategy::Fixed;
    config.retry.max_same = max_same;
    config.retry.max_next = max_next;
    config.circuit_breaker.enabled = false;
    config
}

#[tokio::test]
async fn test_retry_same_stays_on_one_endpoint() {
    let (transport, recorded) = common::recording_transport(|_, _| common::status(503));
    let client = Client::builder(two_endpoints(2, 0))
        .transport(transport)
        .method(list_users())
        .build()
        .unwrap();

    let err = client.call::<Vec<u64>>(LIST, CallArgs::new()).await.unwrap_err();
    assert!(matches!(err, Error::OutOfRetriesSame { attempts: 3, .. }), "got {err:?}");

    let (a, b) = (recorded.count_for(A), recorded.count_for(B));
    assert_eq!(a + b, 3);
    assert!(a == 0 || b == 0, "one endpoint must get nothing: {a} / {b}");
}

#[tokio::test]
async fn test_retry_same_then_next() {
    let (transport, recorded) = common::recording_transport(|_, _| common::status(503));
    let client = Client::builder(two_endpoints(1, 1))
        .transport(transport)
        .method(list_users())
        .build()
        .unwrap();

    let err = client.call::<Vec<u64>>(LIST, CallArgs::new()).await.unwrap_err();
    assert!(
        matches!(err, Error::OutOfRetriesSameThenNext { endpoints: 2, attempts: 4, .. }),
        "got {err:?}"
    );
    assert_eq!(recorded.count_for(A), 2);
    assert_eq!(recorded.count_for(B), 2);
}

#[tokio::test]
async fn test_disabled_retries_surface_raw_failure() {
    let mut config = two_endpoints(3, 3);
    config.retry.enabled = false;

    let (transport, recorded) = common::recording_transport(|_, _| common::status(503));
    let client = Client::builder(config)
        .transport(transport)
        .method(list_users())
        .build()
        .unwrap();

    let err = client.call::<Vec<u64>>(LIST, CallArgs::new()).await.unwrap_err();
    assert!(matches!(err, Error::Failure(_)), "got {err:?}");
    assert_eq!(recorded.len(), 1);
}

#[tokio::test]
async fn test_single_endpoint_ignores_retry_next() {
    let mut config = common::balanced_config(&["http://10.0.0.1:8080"]);
    config.retry.max_same = 0;
    config.retry.max_next = 3;

    let (transport, recorded) = common::recording_transport(|_, _| common::status(503));
    let client = Client::builder(config)
        .transport(transport)
        .method(list_users())
        .build()
        .unwrap();

    let err = client.call::<Vec<u64>>(LIST, CallArgs::new()).await.unwrap_err();
    assert!(matches!(err, Error::OutOfRetriesSame { attempts: 1, .. }), "got {err:?}");
    assert_eq!(recorded.len(), 1);
}

#[tokio::test]
async fn test_empty_pool_fails_without_attempt() {
    let (transport, recorded) = common::recording_transport(|_, _| common::json_ok("[]"));
    let client = Client::builder(common::balanced_config(&[]))
        .transport(transport)
        .discovery(Arc::new(StaticDiscovery::new()))
        .method(list_users())
        .build()
        .unwrap();

    let err = client.call::<Vec<u64>>(LIST, CallArgs::new()).await.unwrap_err();
    assert!(matches!(err, Error::NoEndpoints { ref service } if service == "users"), "got {err:?}");
    assert_eq!(recorded.len(), 0);
}

#[tokio::test]
async fn test_round_robin_spreads_calls() {
    let (transport, recorded) = common::recording_transport(|_, _| common::json_ok("[1, 2]"));
    let client = Client::builder(two_endpoints(0, 1))
        .transport(transport)
        .method(list_users())
        .build()
        .unwrap();

    for _ in 0..4 {
        assert_eq!(client.call::<Vec<u64>>(LIST, CallArgs::new()).await.unwrap(), vec![1, 2]);
    }
    assert_eq!(recorded.count_for(A), 2);
    assert_eq!(recorded.count_for(B), 2);
}

#[tokio::test]
async fn test_failover_to_healthy_endpoint() {
    let (transport, recorded) = common::recording_transport(|request, _| {
        if request.uri().authority().map(|a| a.as_str()) == Some(A) {
            common::status(503)
        } else {
            common::json_ok("[3]")
        }
    });
    let client = Client::builder(two_endpoints(0, 1))
        .transport(transport)
        .method(list_users())
        .build()
        .unwrap();

    for _ in 0..6 {
        assert_eq!(client.call::<Vec<u64>>(LIST, CallArgs::new()).await.unwrap(), vec![3]);
    }
    // A is marked unhealthy after three failures and skipped from then on.
    assert!(recorded.count_for(A) <= 3);
    assert_eq!(recorded.count_for(B), 6);
}

#[tokio::test]
async fn test_discovery_updates_apply_on_next_call() {
    let discovery = Arc::new(
        StaticDiscovery::new().with_service("users", vec![EndpointSpec::new("http://10.0.0.1:8080".parse().unwrap())]),
    );
    let (transport, recorded) = common::recording_transport(|_, _| common::json_ok("[]"));
    let client = Client::builder(common::balanced_config(&[]))
        .transport(transport)
        .discovery(discovery.clone())
        .method(list_users())
        .build()
        .unwrap();

    client.call::<Vec<u64>>(LIST, CallArgs::new()).await.unwrap();
    discovery.set("users", vec![EndpointSpec::new("http://10.0.0.2:8080".parse().unwrap())]);
    client.call::<Vec<u64>>(LIST, CallArgs::new()).await.unwrap();

    assert_eq!(recorded.count_for(A), 1);
    assert_eq!(recorded.count_for(B), 1);
    assert_eq!(client.pool().unwrap().snapshot().len(), 1);
}
