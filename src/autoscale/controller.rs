//! Per-service scaling decisions.
//!
//! # Responsibilities
//! - Gather signals per service: CPU (when a [`CpuSource`] is wired in),
//!   requests per instance and p95 latency from the collector
//! - Decide scale-out, scale-in or nothing, honoring per-direction cooldowns
//!   and the capacity bounds
//! - Publish every non-idle decision on the event channel
//!
//! # Design Decisions
//! - Evaluation takes `now` explicitly so cooldowns and sustain periods are
//!   testable without sleeping
//! - Per-service state is dropped when the service leaves the snapshot

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use crate::config::schema::AutoscalingConfig;
use crate::config::store::ConfigStore;
use crate::observability::collector::MetricsCollector;
use crate::observability::metrics;
use crate::service::Service;

/// What the capacity owner should do with one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    ScaleOut { n: u32, cooldown_until: Instant },
    ScaleIn { n: u32, cooldown_until: Instant },
    NoOp,
}

impl ScalingDecision {
    pub fn direction(&self) -> &'static str {
        match self {
            ScalingDecision::ScaleOut { .. } => "out",
            ScalingDecision::ScaleIn { .. } => "in",
            ScalingDecision::NoOp => "none",
        }
    }
}

/// A decision addressed to one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingEvent {
    pub service: String,
    pub decision: ScalingDecision,
}

/// CPU utilization of a service's compute, in percent.
pub trait CpuSource: Send + Sync {
    fn cpu_percent(&self, service: &str) -> Option<f64>;
}

/// No CPU signal available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCpu;

impl CpuSource for NoCpu {
    fn cpu_percent(&self, _service: &str) -> Option<f64> {
        None
    }
}

/// Inputs of one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServiceSignals {
    pub instances: u32,
    pub cpu_percent: Option<f64>,
    pub requests_per_instance: f64,
    pub p95: Option<Duration>,
}

#[derive(Debug, Default)]
struct ScaleState {
    out_cooldown_until: Option<Instant>,
    in_cooldown_until: Option<Instant>,
    /// Start of the current run of ticks with every signal well below target.
    quiet_since: Option<Instant>,
}

fn cooling(until: Option<Instant>, now: Instant) -> bool {
    until.map_or(false, |until| now < until)
}

/// Periodic scale-out / scale-in evaluation over every service.
pub struct AutoscalingController {
    config: AutoscalingConfig,
    store: Arc<ConfigStore>,
    collector: Arc<MetricsCollector>,
    cpu: Arc<dyn CpuSource>,
    states: HashMap<String, ScaleState>,
    events: mpsc::UnboundedSender<ScalingEvent>,
}

impl AutoscalingController {
    pub fn new(
        config: AutoscalingConfig,
        store: Arc<ConfigStore>,
        collector: Arc<MetricsCollector>,
        cpu: Arc<dyn CpuSource>,
    ) -> (Self, mpsc::UnboundedReceiver<ScalingEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                store,
                collector,
                cpu,
                states: HashMap::new(),
                events,
            },
            rx,
        )
    }

    /// Controller without a CPU signal.
    pub fn without_cpu(
        config: AutoscalingConfig,
        store: Arc<ConfigStore>,
        collector: Arc<MetricsCollector>,
    ) -> (Self, mpsc::UnboundedReceiver<ScalingEvent>) {
        Self::new(config, store, collector, Arc::new(NoCpu))
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.cooldown_secs)
    }

    fn over_trigger(&self, signals: &ServiceSignals) -> bool {
        let cpu = signals
            .cpu_percent
            .map_or(false, |cpu| cpu > self.config.cpu_percent);
        let requests = signals.requests_per_instance > self.config.requests_per_instance;
        let latency = signals
            .p95
            .map_or(false, |p95| p95.as_secs_f64() * 1000.0 > self.config.p95_latency_ms as f64);
        cpu || requests || latency
    }

    fn well_below(&self, signals: &ServiceSignals) -> bool {
        let ratio = self.config.scale_in_ratio;
        let cpu = signals
            .cpu_percent
            .map_or(true, |cpu| cpu < self.config.cpu_percent * ratio);
        let requests = signals.requests_per_instance < self.config.requests_per_instance * ratio;
        let latency = signals
            .p95
            .map_or(true, |p95| p95.as_secs_f64() * 1000.0 < self.config.p95_latency_ms as f64 * ratio);
        cpu && requests && latency
    }

    /// Decide for one service. At most one decision per call.
    pub fn evaluate_at(&mut self, service: &str, signals: &ServiceSignals, now: Instant) -> ScalingDecision {
        let over = self.over_trigger(signals);
        let below = self.well_below(signals);
        let cooldown = self.cooldown();
        let step = self.config.step.max(1);
        let (min, max) = (self.config.min_capacity, self.config.max_capacity);
        let sustain = Duration::from_secs(self.config.scale_in_sustain_secs);

        let state = self.states.entry(service.to_owned()).or_default();

        if over {
            state.quiet_since = None;
            if cooling(state.out_cooldown_until, now) {
                tracing::debug!(service, "Scale-out suppressed by cooldown");
                return ScalingDecision::NoOp;
            }
            let n = step.min(max.saturating_sub(signals.instances));
            if n == 0 {
                tracing::debug!(service, instances = signals.instances, max, "Already at maximum capacity");
                return ScalingDecision::NoOp;
            }
            let cooldown_until = now + cooldown;
            state.out_cooldown_until = Some(cooldown_until);
            return ScalingDecision::ScaleOut { n, cooldown_until };
        }

        if !below {
            state.quiet_since = None;
            return ScalingDecision::NoOp;
        }

        let quiet_since = *state.quiet_since.get_or_insert(now);
        if now.saturating_duration_since(quiet_since) < sustain || cooling(state.in_cooldown_until, now) {
            return ScalingDecision::NoOp;
        }
        let n = step.min(signals.instances.saturating_sub(min));
        if n == 0 {
            return ScalingDecision::NoOp;
        }
        let cooldown_until = now + cooldown;
        state.in_cooldown_until = Some(cooldown_until);
        state.quiet_since = None;
        ScalingDecision::ScaleIn { n, cooldown_until }
    }

    /// Current signals of a service.
    pub fn signals_at(&self, service: &Service, now: Instant) -> ServiceSignals {
        let instances = service.backends().len() as u32;
        let window = Duration::from_secs(self.config.request_window_secs.max(1));
        let load = self.collector.service_load(service.name(), window, now);
        ServiceSignals {
            instances,
            cpu_percent: self.cpu.cpu_percent(service.name()),
            requests_per_instance: load.requests as f64 / f64::from(instances.max(1)),
            p95: load.p95,
        }
    }

    /// Evaluate every service of the current snapshot.
    ///
    /// Returns one event per service, `NoOp` included; only the others are
    /// published on the channel.
    pub fn tick_at(&mut self, now: Instant) -> Vec<ScalingEvent> {
        let snapshot = self.store.load();
        self.states
            .retain(|name, _| snapshot.service(name).is_some());

        let mut events = Vec::new();
        for service in snapshot.services() {
            let signals = self.signals_at(service, now);
            let decision = self.evaluate_at(service.name(), &signals, now);
            let event = ScalingEvent {
                service: service.name().to_string(),
                decision,
            };

            if decision != ScalingDecision::NoOp {
                tracing::info!(
                    service = %service.name(),
                    decision = ?decision,
                    instances = signals.instances,
                    cpu_percent = ?signals.cpu_percent,
                    requests_per_instance = signals.requests_per_instance,
                    p95_ms = ?signals.p95.map(|d| d.as_millis()),
                    "Scaling decision"
                );
                metrics::record_scaling_decision(service.name(), decision.direction());
                // a dropped receiver only means nobody listens
                let _ = self.events.send(event.clone());
            }
            events.push(event);
        }
        events
    }

    /// Run the control loop until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.config.tick_secs.max(1));
        tracing::info!(interval_secs = interval.as_secs(), "Autoscaling controller started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_at(Instant::now());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Autoscaling controller shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, DynamicConfig, ServiceConfig, StaticConfig};

    fn controller(config: AutoscalingConfig) -> (AutoscalingController, mpsc::UnboundedReceiver<ScalingEvent>) {
        let store = Arc::new(ConfigStore::new(StaticConfig::default()));
        let collector = Arc::new(MetricsCollector::new(
            Duration::from_secs(60),
            10_000,
            Duration::from_secs(60),
        ));
        AutoscalingController::without_cpu(config, store, collector)
    }

    fn hot() -> ServiceSignals {
        ServiceSignals {
            instances: 1,
            cpu_percent: Some(85.0),
            requests_per_instance: 10.0,
            p95: None,
        }
    }

    fn quiet() -> ServiceSignals {
        ServiceSignals {
            instances: 3,
            cpu_percent: Some(10.0),
            requests_per_instance: 5.0,
            p95: Some(Duration::from_millis(20)),
        }
    }

    #[test]
    fn cooldown_spaces_scale_outs() {
        let (mut c, _rx) = controller(AutoscalingConfig::default());
        let t0 = Instant::now();

        assert_eq!(
            c.evaluate_at("web", &hot(), t0),
            ScalingDecision::ScaleOut {
                n: 1,
                cooldown_until: t0 + Duration::from_secs(60)
            }
        );
        assert_eq!(
            c.evaluate_at("web", &hot(), t0 + Duration::from_secs(30)),
            ScalingDecision::NoOp
        );
        assert!(matches!(
            c.evaluate_at("web", &hot(), t0 + Duration::from_secs(61)),
            ScalingDecision::ScaleOut { n: 1, .. }
        ));
    }

    #[test]
    fn any_trigger_scales_out() {
        let (mut c, _rx) = controller(AutoscalingConfig::default());
        let t0 = Instant::now();
        let busy = ServiceSignals {
            instances: 2,
            cpu_percent: None,
            requests_per_instance: 1500.0,
            p95: None,
        };
        assert!(matches!(c.evaluate_at("a", &busy, t0), ScalingDecision::ScaleOut { .. }));

        let slow = ServiceSignals {
            instances: 2,
            p95: Some(Duration::from_millis(2500)),
            ..Default::default()
        };
        assert!(matches!(c.evaluate_at("b", &slow, t0), ScalingDecision::ScaleOut { .. }));
    }

    #[test]
    fn scale_in_needs_sustained_quiet() {
        let (mut c, _rx) = controller(AutoscalingConfig::default());
        let t0 = Instant::now();

        assert_eq!(c.evaluate_at("web", &quiet(), t0), ScalingDecision::NoOp);
        assert_eq!(
            c.evaluate_at("web", &quiet(), t0 + Duration::from_secs(299)),
            ScalingDecision::NoOp
        );
        assert!(matches!(
            c.evaluate_at("web", &quiet(), t0 + Duration::from_secs(300)),
            ScalingDecision::ScaleIn { n: 1, .. }
        ));
    }

    #[test]
    fn busy_tick_resets_quiet_period() {
        let (mut c, _rx) = controller(AutoscalingConfig::default());
        let t0 = Instant::now();
        let moderate = ServiceSignals {
            instances: 3,
            requests_per_instance: 600.0,
            ..Default::default()
        };

        c.evaluate_at("web", &quiet(), t0);
        c.evaluate_at("web", &moderate, t0 + Duration::from_secs(200));
        assert_eq!(
            c.evaluate_at("web", &quiet(), t0 + Duration::from_secs(310)),
            ScalingDecision::NoOp
        );
    }

    #[test]
    fn capacity_bounds_are_respected() {
        let (mut c, _rx) = controller(AutoscalingConfig::default());
        let t0 = Instant::now();

        let at_max = ServiceSignals {
            instances: 10,
            ..hot()
        };
        assert_eq!(c.evaluate_at("web", &at_max, t0), ScalingDecision::NoOp);

        let at_min = ServiceSignals {
            instances: 1,
            ..quiet()
        };
        c.evaluate_at("other", &at_min, t0);
        assert_eq!(
            c.evaluate_at("other", &at_min, t0 + Duration::from_secs(600)),
            ScalingDecision::NoOp
        );
    }

    #[test]
    fn tick_publishes_decisions_for_busy_services() {
        let store = Arc::new(ConfigStore::new(StaticConfig::default()));
        store
            .apply(DynamicConfig {
                services: vec![ServiceConfig {
                    name: "web".into(),
                    backends: vec![BackendConfig {
                        address: "127.0.0.1:9100".into(),
                        weight: 1,
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            })
            .unwrap();
        let collector = Arc::new(MetricsCollector::new(
            Duration::from_secs(60),
            10_000,
            Duration::from_secs(60),
        ));
        let now = Instant::now();
        for _ in 0..20 {
            collector.record_at("r", Some("web"), 200, Duration::from_millis(1), now);
        }

        let config = AutoscalingConfig {
            requests_per_instance: 10.0,
            ..Default::default()
        };
        let (mut c, mut rx) = AutoscalingController::without_cpu(config, store, collector);

        let events = c.tick_at(now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].service, "web");
        assert!(matches!(rx.try_recv().unwrap().decision, ScalingDecision::ScaleOut { n: 1, .. }));

        // still hot, but inside the cooldown
        let events = c.tick_at(now + Duration::from_secs(30));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].decision, ScalingDecision::NoOp);
        assert_eq!(events[0].decision.direction(), "none");
        assert!(rx.try_recv().is_err());
    }
}
