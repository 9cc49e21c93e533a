//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create one Axum router per entrypoint, all dispatching to the shared
//!   [`ProxyService`]
//! - Tag every request with the entrypoint it arrived on
//! - Wire up request ID and tracing layers
//! - Bind plain or TLS listeners and drain them on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::response::Response;
use axum::{Extension, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::schema::EntrypointConfig;
use crate::http::proxy::ProxyService;
use crate::net::tls::load_tls_config;
use crate::routing::matcher::EntrypointInfo;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("entrypoint {name}: invalid address {address}: {source}")]
    InvalidAddress {
        name: String,
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("entrypoint {name}: {source}")]
    Io { name: String, source: std::io::Error },
}

/// Axum router of one entrypoint.
pub fn build_router(service: ProxyService, entrypoint: EntrypointInfo) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(service)
        .layer(Extension(entrypoint))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Main proxy handler.
async fn proxy_handler(
    State(service): State<ProxyService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    service.handle(request, peer).await
}

/// Serve plain HTTP on an already bound listener until shutdown.
pub async fn serve_listener(
    listener: TcpListener,
    name: &str,
    service: ProxyService,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let info = EntrypointInfo {
        name: Arc::from(name),
        tls: false,
    };
    let app = build_router(service, info).into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(|source| ServerError::Io {
            name: name.to_string(),
            source,
        })
}

/// Bind and serve one configured entrypoint until shutdown.
pub async fn serve_entrypoint(
    entrypoint: &EntrypointConfig,
    service: ProxyService,
    mut shutdown: broadcast::Receiver<()>,
    grace: Duration,
) -> Result<(), ServerError> {
    let name = entrypoint.name.clone();
    let io_error = |source| ServerError::Io {
        name: name.clone(),
        source,
    };
    let addr: SocketAddr = entrypoint
        .address
        .parse()
        .map_err(|source| ServerError::InvalidAddress {
            name: name.clone(),
            address: entrypoint.address.clone(),
            source,
        })?;

    match &entrypoint.tls {
        None => {
            let listener = TcpListener::bind(addr).await.map_err(io_error)?;
            tracing::info!(entrypoint = %name, address = %addr, "HTTP entrypoint listening");
            serve_listener(listener, &name, service, shutdown).await
        }
        Some(tls) => {
            let rustls = load_tls_config(tls).await.map_err(io_error)?;
            let info = EntrypointInfo {
                name: Arc::from(name.as_str()),
                tls: true,
            };
            let app = build_router(service, info).into_make_service_with_connect_info::<SocketAddr>();

            let handle = axum_server::Handle::new();
            let drain = handle.clone();
            tokio::spawn(async move {
                let _ = shutdown.recv().await;
                drain.graceful_shutdown(Some(grace));
            });

            tracing::info!(entrypoint = %name, address = %addr, "HTTPS entrypoint listening");
            axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(app)
                .await
                .map_err(io_error)
        }
    }
}
