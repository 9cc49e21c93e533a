//! Startup orchestration.
//!
//! ```text
//! static config (validated by the caller)
//!     → logging, Prometheus recorder
//!     → ConfigStore, first dynamic snapshot (fatal if invalid)
//!     → collector, upstream client, ProxyService
//!     → health supervisor, autoscaler, reload loop, SIGHUP forwarding
//!     → one server per entrypoint
//! wait for SIGINT/SIGTERM or a failed entrypoint
//!     → trigger shutdown, drain within the grace period
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::autoscale::{AutoscalingController, ScalingEvent};
use crate::config::loader::{load_dynamic, load_static, ConfigError};
use crate::config::schema::{DynamicConfig, StaticConfig};
use crate::config::store::ConfigStore;
use crate::config::watcher::{ConfigWatcher, ReloadTrigger};
use crate::health::active::{HealthSupervisor, HyperProber};
use crate::http::server::{serve_entrypoint, ServerError};
use crate::http::{HyperUpstream, ProxyService};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::observability::{logging, metrics, MetricsCollector};

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Load and validate both documents without starting anything.
pub fn check(config_path: Option<&Path>) -> Result<(StaticConfig, Option<DynamicConfig>), ConfigError> {
    let static_config = match config_path {
        Some(path) => load_static(path)?,
        None => StaticConfig::default(),
    };
    let dynamic = match &static_config.providers.file {
        Some(file) => Some(load_dynamic(Path::new(&file.path), &static_config)?),
        None => None,
    };
    Ok((static_config, dynamic))
}

/// Run the proxy until a shutdown signal arrives.
pub async fn run(static_config: StaticConfig) -> Result<(), StartupError> {
    logging::init(&static_config.log)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-proxy starting");

    let shutdown = Shutdown::new();
    let mut background = JoinSet::new();

    // 1. Metrics
    if static_config.metrics.prometheus {
        metrics::init_recorder()?;
        background.spawn(metrics::run_upkeep(UPKEEP_INTERVAL));
    }

    // 2. Configuration
    let store = Arc::new(ConfigStore::new(static_config.clone()));
    let dynamic_path = static_config
        .providers
        .file
        .as_ref()
        .map(|file| (PathBuf::from(&file.path), file.watch));
    if let Some((path, _)) = &dynamic_path {
        let generation = store.reload_from_file(path)?;
        tracing::info!(path = ?path, generation, "Dynamic configuration loaded");
    } else {
        tracing::warn!("No dynamic configuration provider, only internal routes are served");
    }

    // 3. Request path
    let collector = Arc::new(MetricsCollector::from_config(&static_config));
    let upstream = Arc::new(HyperUpstream::new(&static_config.timeouts));
    let service = ProxyService::new(store.clone(), upstream, collector.clone());

    // 4. Background tasks
    let prober = Arc::new(HyperProber::new(Duration::from_secs(
        static_config.timeouts.connect_secs,
    )));
    background.spawn(HealthSupervisor::new(store.clone(), prober).run(shutdown.subscribe()));

    if static_config.autoscaling.enabled {
        let (controller, decisions) =
            AutoscalingController::without_cpu(static_config.autoscaling.clone(), store.clone(), collector.clone());
        background.spawn(log_decisions(decisions));
        background.spawn(controller.run(shutdown.subscribe()));
    }

    let _watcher = match &dynamic_path {
        Some((path, watch)) => {
            let (watcher, triggers) = ConfigWatcher::new(path);
            background.spawn(signals::forward_hangups(watcher.sender(), shutdown.subscribe()));
            let guard = if *watch { Some(watcher.run()?) } else { None };
            background.spawn(reload_loop(
                store.clone(),
                collector.clone(),
                path.clone(),
                triggers,
                shutdown.subscribe(),
            ));
            guard
        }
        None => None,
    };

    // 5. Entrypoints
    let grace = Duration::from_secs(static_config.timeouts.shutdown_grace_secs);
    let mut servers = JoinSet::new();
    for entrypoint in static_config.entrypoints.iter().cloned() {
        let service = service.clone();
        let rx = shutdown.subscribe();
        servers.spawn(async move { serve_entrypoint(&entrypoint, service, rx, grace).await });
    }

    // 6. Wait
    let mut failure = None;
    tokio::select! {
        _ = signals::shutdown_signal() => {}
        Some(joined) = servers.join_next() => {
            match joined {
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Entrypoint failed");
                    failure = Some(e);
                }
                Ok(Ok(())) => tracing::warn!("Entrypoint stopped unexpectedly"),
                Err(e) => tracing::error!(error = %e, "Entrypoint task panicked"),
            }
        }
    }

    // 7. Drain
    shutdown.trigger();
    let report = shutdown.drain(&mut servers, grace + Duration::from_secs(1)).await;
    tracing::info!(finished = report.finished, aborted = report.aborted, "Entrypoints stopped");
    background.abort_all();
    while background.join_next().await.is_some() {}

    tracing::info!("Shutdown complete");
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Capacity is owned outside the proxy; decisions are only reported.
async fn log_decisions(mut decisions: mpsc::UnboundedReceiver<ScalingEvent>) {
    while let Some(event) = decisions.recv().await {
        tracing::info!(
            target: "autoscale",
            service = %event.service,
            direction = event.decision.direction(),
            decision = ?event.decision,
            "Scaling decision emitted"
        );
    }
}

/// Apply reload triggers until shutdown. Bursts of triggers are coalesced.
pub async fn reload_loop(
    store: Arc<ConfigStore>,
    collector: Arc<MetricsCollector>,
    path: PathBuf,
    mut triggers: mpsc::UnboundedReceiver<ReloadTrigger>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let trigger = tokio::select! {
            trigger = triggers.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
            _ = shutdown.recv() => break,
        };

        // editors often emit several events per save
        tokio::time::sleep(RELOAD_DEBOUNCE).await;
        while triggers.try_recv().is_ok() {}

        tracing::info!(?trigger, path = ?path, "Reloading dynamic configuration");
        match store.reload_from_file(&path) {
            Ok(_) => {
                let snapshot = store.load();
                collector.retain_known(
                    snapshot.router().routes().iter().map(|r| r.name.as_str()),
                    snapshot.services().map(|s| s.name()),
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Reload rejected, keeping previous configuration");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DYNAMIC: &str = r#"
[[services]]
name = "web"
backends = [{ address = "127.0.0.1:9000" }]

[[routers]]
name = "api"
path_prefix = "/api"
service = "web"
"#;

    #[tokio::test]
    async fn reload_loop_publishes_and_prunes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DYNAMIC.as_bytes()).unwrap();

        let store = Arc::new(ConfigStore::new(StaticConfig::default()));
        let collector = Arc::new(MetricsCollector::from_config(store.static_config()));
        collector.record("stale", Some("gone"), 200, Duration::from_millis(1));

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = broadcast::channel(1);
        let task = tokio::spawn(reload_loop(
            store.clone(),
            collector.clone(),
            file.path().to_path_buf(),
            rx,
            stop_rx,
        ));

        let mut generations = store.subscribe();
        tx.send(ReloadTrigger::Signal).unwrap();
        tx.send(ReloadTrigger::FileChanged).unwrap();
        tokio::time::timeout(Duration::from_secs(2), generations.changed())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.generation(), 1);
        assert!(store.load().service("web").is_some());
        assert!(collector.route_sample("stale").is_none());

        stop.send(()).unwrap();
        task.await.unwrap();
        // both triggers were coalesced into one reload
        assert_eq!(store.generation(), 1);
    }

    #[tokio::test]
    async fn invalid_reload_keeps_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[[routers]]\nname = \"x\"\nhost = \"a.example.com\"\nservice = \"missing\"\n")
            .unwrap();

        let store = Arc::new(ConfigStore::new(StaticConfig::default()));
        store.reload_from_str(DYNAMIC).unwrap();
        let collector = Arc::new(MetricsCollector::from_config(store.static_config()));

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = broadcast::channel(1);
        let task = tokio::spawn(reload_loop(
            store.clone(),
            collector,
            file.path().to_path_buf(),
            rx,
            stop_rx,
        ));

        tx.send(ReloadTrigger::Signal).unwrap();
        tokio::time::sleep(RELOAD_DEBOUNCE * 3).await;
        assert_eq!(store.generation(), 1);
        assert!(store.load().service("web").is_some());

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn check_without_config_uses_defaults() {
        let (static_config, dynamic) = check(None).unwrap();
        assert_eq!(static_config.entrypoints.len(), 2);
        assert!(dynamic.is_none());
    }
}
