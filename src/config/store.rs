//! The configuration store.
//!
//! Holds the current [`Snapshot`] behind an `ArcSwap`. Readers take one
//! `Arc<Snapshot>` per request and keep it until the request completes, so a
//! reload never changes the routing data of a request already in flight.
//! Reloads are serialized; each published snapshot gets the next generation
//! number, announced on a `watch` channel for background loops that need to
//! rebuild (health checks).

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::loader::{load_dynamic, parse_dynamic, ConfigError};
use crate::config::schema::{DynamicConfig, StaticConfig};
use crate::config::snapshot::Snapshot;
use crate::config::validation::validate_dynamic;
use crate::observability::metrics;

#[derive(Debug)]
pub struct ConfigStore {
    static_config: Arc<StaticConfig>,
    current: ArcSwap<Snapshot>,
    generation_tx: watch::Sender<u64>,
    reload_lock: Mutex<()>,
}

impl ConfigStore {
    /// Store with an empty snapshot (generation 0).
    pub fn new(static_config: StaticConfig) -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            static_config: Arc::new(static_config),
            current: ArcSwap::from_pointee(Snapshot::empty()),
            generation_tx,
            reload_lock: Mutex::new(()),
        }
    }

    pub fn static_config(&self) -> &Arc<StaticConfig> {
        &self.static_config
    }

    /// The snapshot new requests should use.
    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation()
    }

    /// Notified with the new generation after every successful reload.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// Validate, compile and publish a dynamic configuration.
    ///
    /// On error the previous snapshot stays active.
    pub fn apply(&self, config: DynamicConfig) -> Result<u64, ConfigError> {
        if let Err(errors) = validate_dynamic(&config, &self.static_config) {
            return Err(self.rejected(ConfigError::Validation(errors)));
        }
        Ok(self.publish(config))
    }

    /// Parse and apply a TOML document.
    pub fn reload_from_str(&self, content: &str) -> Result<u64, ConfigError> {
        match parse_dynamic(content, &self.static_config) {
            Ok(config) => Ok(self.publish(config)),
            Err(e) => Err(self.rejected(e)),
        }
    }

    /// Read, parse and apply the dynamic configuration file.
    pub fn reload_from_file(&self, path: &Path) -> Result<u64, ConfigError> {
        match load_dynamic(path, &self.static_config) {
            Ok(config) => Ok(self.publish(config)),
            Err(e) => Err(self.rejected(e)),
        }
    }

    fn publish(&self, config: DynamicConfig) -> u64 {
        let _guard = self.reload_lock.lock();
        let previous = self.current.load_full();
        let generation = previous.generation() + 1;
        let snapshot = Snapshot::compile(config, &self.static_config, generation, Some(&previous));

        self.current.store(Arc::new(snapshot));
        self.generation_tx.send_replace(generation);
        metrics::record_config_reload(true);
        tracing::info!(generation, "Configuration snapshot published");
        generation
    }

    fn rejected(&self, error: ConfigError) -> ConfigError {
        metrics::record_config_reload(false);
        tracing::error!(
            error = %error,
            generation = self.generation(),
            "Configuration rejected, keeping current snapshot"
        );
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = r#"
[[routers]]
name = "api"
path_prefix = "/"
service = "v1"

[[services]]
name = "v1"
backends = [{ address = "127.0.0.1:7101" }]
"#;

    const V2: &str = r#"
[[routers]]
name = "api"
path_prefix = "/"
service = "v2"

[[services]]
name = "v2"
backends = [{ address = "127.0.0.1:7102" }]
"#;

    #[test]
    fn reload_swaps_snapshot_and_bumps_generation() {
        let store = ConfigStore::new(StaticConfig::default());
        let mut rx = store.subscribe();
        assert_eq!(store.generation(), 0);

        assert_eq!(store.reload_from_str(V1).unwrap(), 1);
        let in_flight = store.load();

        assert_eq!(store.reload_from_str(V2).unwrap(), 2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 2);

        // a request that started on generation 1 still sees it
        assert_eq!(in_flight.generation(), 1);
        assert!(in_flight.service("v1").is_some());
        assert!(store.load().service("v2").is_some());
    }

    #[test]
    fn invalid_document_keeps_previous_snapshot() {
        let store = ConfigStore::new(StaticConfig::default());
        store.reload_from_str(V1).unwrap();

        let broken = V1.replace("service = \"v1\"", "service = \"nope\"");
        assert!(matches!(
            store.reload_from_str(&broken),
            Err(ConfigError::Validation(_))
        ));
        assert!(store.reload_from_str("[[routers").is_err());

        assert_eq!(store.generation(), 1);
        assert!(store.load().service("v1").is_some());
    }

    #[test]
    fn reload_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), V2).unwrap();

        let store = ConfigStore::new(StaticConfig::default());
        assert_eq!(store.reload_from_file(file.path()).unwrap(), 1);
        assert!(store.load().service("v2").is_some());
    }
}
