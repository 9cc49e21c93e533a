//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs   (Axum per entrypoint, request ID, tracing)
//!     → proxy.rs    (route, middleware chain, resilience, forwarding)
//!     → request.rs  (header rewriting, body replay)
//!     → upstream.rs (backend client)
//!     → response.rs (error mapping, hop-by-hop stripping)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;

pub use proxy::ProxyService;
pub use upstream::{HyperUpstream, Upstream};
