//! Hot reload: atomic snapshot swap, rejection of invalid documents.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;

use common::{body_string, client_addr, get, proxy_with, Reply, ScriptedUpstream};

mod common;

const V1: &str = r#"
[[services]]
name = "web"
backends = [{ address = "10.0.0.1:80" }]

[[routers]]
name = "web"
path_prefix = "/"
service = "web"
"#;

const V2: &str = r#"
[[services]]
name = "web-v2"
backends = [{ address = "10.0.0.2:80" }]

[[routers]]
name = "web"
path_prefix = "/"
service = "web-v2"
"#;

#[tokio::test]
async fn in_flight_request_keeps_its_snapshot() {
    let old: SocketAddr = "10.0.0.1:80".parse().unwrap();
    let upstream = ScriptedUpstream::new();
    upstream.always(old, Reply::Delay(std::time::Duration::from_millis(300), 200));
    let proxy = proxy_with(V1, upstream.clone());

    let slow = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.handle(get("example.com", "/"), client_addr()).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(proxy.store().reload_from_str(V2).unwrap(), 2);

    let response = slow.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "10.0.0.1:80");

    let response = proxy.handle(get("example.com", "/"), client_addr()).await;
    assert_eq!(body_string(response).await, "10.0.0.2:80");
}

#[tokio::test]
async fn concurrent_requests_see_one_version_or_the_other() {
    let upstream = ScriptedUpstream::new();
    let proxy = proxy_with(V1, upstream);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let proxy = proxy.clone();
        tasks.push(tokio::spawn(async move {
            let mut bodies = Vec::new();
            for _ in 0..25 {
                let response = proxy.handle(get("example.com", "/"), client_addr()).await;
                assert_eq!(response.status(), StatusCode::OK);
                bodies.push(body_string(response).await);
            }
            bodies
        }));
    }
    for i in 0..10 {
        let doc = if i % 2 == 0 { V2 } else { V1 };
        proxy.store().reload_from_str(doc).unwrap();
        tokio::task::yield_now().await;
    }

    for task in tasks {
        for body in task.await.unwrap() {
            assert!(body == "10.0.0.1:80" || body == "10.0.0.2:80", "unexpected body {body}");
        }
    }
    assert_eq!(proxy.store().generation(), 11);
}

#[tokio::test]
async fn invalid_reload_keeps_previous_routes() {
    let upstream = ScriptedUpstream::new();
    let proxy = proxy_with(V1, upstream);
    let before = proxy.store().load();

    let broken = r#"
[[routers]]
name = "web"
path_prefix = "/"
service = "does-not-exist"
"#;
    assert!(proxy.store().reload_from_str(broken).is_err());
    assert!(proxy.store().reload_from_str("not toml [").is_err());

    let after = proxy.store().load();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.generation(), 1);

    let response = proxy.handle(get("example.com", "/"), client_addr()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unchanged_backends_keep_health_across_reload() {
    let a: SocketAddr = "10.0.0.1:80".parse().unwrap();
    let upstream = ScriptedUpstream::new();
    upstream.always(a, Reply::NetworkError);
    let doc = r#"
[[services]]
name = "web"
backends = [{ address = "10.0.0.1:80" }, { address = "10.0.0.2:80" }]
health_check = { passive = true, unhealthy_threshold = 1 }

[[routers]]
name = "web"
path_prefix = "/"
service = "web"
"#;
    let proxy = proxy_with(doc, upstream.clone());
    for _ in 0..2 {
        proxy.handle(get("example.com", "/"), client_addr()).await;
    }
    assert_eq!(upstream.calls_to(a), 1);

    proxy.store().reload_from_str(doc).unwrap();
    for _ in 0..4 {
        proxy.handle(get("example.com", "/"), client_addr()).await;
    }
    assert_eq!(upstream.calls_to(a), 1);
}
