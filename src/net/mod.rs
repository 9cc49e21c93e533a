//! Network layer.
//!
//! ```text
//! entrypoint with [entrypoints.tls]
//!     → tls.rs (certificate and key loaded once at startup)
//!     → axum-server rustls acceptor
//!     → HTTP layer
//! ```
//!
//! Plain entrypoints bind a `TcpListener` directly in `http::server`.

pub mod tls;
