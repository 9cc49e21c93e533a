//! Internal services: `ping@internal`, `api@internal`, `prometheus@internal`.
//!
//! They sit in the same dispatch table as user services; the router picks
//! them like any other target and the route's middleware chain (bearer auth
//! for the API and metrics) runs first.

pub mod handlers;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower::ServiceExt;

use crate::config::store::ConfigStore;
use crate::observability::collector::MetricsCollector;
use crate::service::InternalService;

use self::handlers::*;

/// Read-only dashboard API.
pub fn setup_api_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/overview", get(get_overview))
        .route("/api/routers", get(get_routers))
        .route("/api/services", get(get_services))
        .route("/api/services/{name}", get(get_service))
        .route("/api/metrics", get(get_metrics))
        .with_state(state)
}

/// Answers requests routed to an internal service.
#[derive(Clone)]
pub struct Admin {
    api: Router,
}

impl Admin {
    pub fn new(store: Arc<ConfigStore>, collector: Arc<MetricsCollector>) -> Self {
        Self {
            api: setup_api_router(AdminState {
                store,
                collector,
                started: Instant::now(),
            }),
        }
    }

    pub async fn handle(&self, service: InternalService, request: Request<Body>) -> Response {
        match service {
            InternalService::Ping => (StatusCode::OK, "OK").into_response(),
            InternalService::Prometheus => prometheus(),
            InternalService::Api => {
                let result: Result<Response, Infallible> = self.api.clone().oneshot(request).await;
                match result {
                    Ok(response) => response,
                    Err(never) => match never {},
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, DynamicConfig, ServiceConfig, StaticConfig};
    use std::time::Duration;

    fn admin() -> Admin {
        let store = Arc::new(ConfigStore::new(StaticConfig::default()));
        store
            .apply(DynamicConfig {
                services: vec![ServiceConfig {
                    name: "web".into(),
                    backends: vec![BackendConfig {
                        address: "127.0.0.1:9001".into(),
                        weight: 1,
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            })
            .unwrap();
        let collector = Arc::new(MetricsCollector::new(
            Duration::from_secs(60),
            100,
            Duration::from_secs(60),
        ));
        Admin::new(store, collector)
    }

    async fn get_json(admin: &Admin, path: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = admin.handle(InternalService::Api, request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn ping_is_always_ok() {
        let response = admin()
            .handle(InternalService::Ping, Request::new(Body::empty()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn services_report_backend_health_and_circuit() {
        let admin = admin();
        let (status, body) = get_json(&admin, "/api/services").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "web");
        assert_eq!(body[0]["backends"][0]["address"], "127.0.0.1:9001");
        assert!(body[0]["circuit"]["state"].is_string());

        let (status, overview) = get_json(&admin, "/api/overview").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(overview["services"], 1);
        assert_eq!(overview["generation"], 1);
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let (status, _) = get_json(&admin(), "/api/services/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
