//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! static file (TOML, --config)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks; any error is fatal)
//!
//! dynamic file (TOML, providers.file)
//!     → loader.rs → validation.rs
//!     → snapshot.rs (compile routes, chains, services)
//!     → store.rs (atomic swap of Arc<Snapshot>, generation + 1)
//!
//! On reload (watcher.rs file event or SIGHUP):
//!     → same path as above
//!     → invalid document: logged, previous snapshot stays active
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable once published; changes require full reload
//! - Every field has a default; an empty file is a valid static config
//! - serde rejects malformed documents, validation.rs rejects inconsistent ones

pub mod loader;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::ConfigError;
pub use schema::{DynamicConfig, StaticConfig};
pub use snapshot::Snapshot;
pub use store::ConfigStore;
