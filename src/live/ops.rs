//! Operational controls for the live controller: Prometheus metrics,
//! health/readiness flags and the HTTP endpoint serving both.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tiny_http::{Header, Response, Server};
use tracing::{info, warn};

use crate::config::Config;
use crate::types::{LatencyReading, Target};

#[derive(Debug, Clone)]
pub struct HealthState {
    healthy: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(true)),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub struct ControllerMetrics {
    registry: Registry,
    iterations: IntCounter,
    actuations_ok: IntCounter,
    actuations_fail: IntCounter,
    observe_fail_by_reason: IntCounterVec,
    learn_updates: IntCounter,
    epsilon: Gauge,
    last_reward: Gauge,
    last_action: IntGauge,
    latency_ms: GaugeVec,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let iterations = IntCounter::with_opts(Opts::new(
            "qroute_iterations",
            "Control loop iterations",
        ))?;
        let actuations_ok =
            IntCounter::with_opts(Opts::new("qroute_actuations_ok", "Successful weight updates"))?;
        let actuations_fail =
            IntCounter::with_opts(Opts::new("qroute_actuations_fail", "Failed weight updates"))?;
        let observe_fail_by_reason = IntCounterVec::new(
            Opts::new("qroute_observe_fail", "Failed observations by reason"),
            &["reason"],
        )?;
        let learn_updates =
            IntCounter::with_opts(Opts::new("qroute_learn_updates", "Q-table updates applied"))?;
        let epsilon = Gauge::with_opts(Opts::new("qroute_epsilon", "Current exploration rate"))?;
        let last_reward = Gauge::with_opts(Opts::new("qroute_last_reward", "Last reward"))?;
        let last_action =
            IntGauge::with_opts(Opts::new("qroute_last_action", "Last selected action index"))?;
        let latency_ms = GaugeVec::new(
            Opts::new("qroute_latency_ms", "Last observed latency per target"),
            &["target"],
        )?;
        registry.register(Box::new(iterations.clone()))?;
        registry.register(Box::new(actuations_ok.clone()))?;
        registry.register(Box::new(actuations_fail.clone()))?;
        registry.register(Box::new(observe_fail_by_reason.clone()))?;
        registry.register(Box::new(learn_updates.clone()))?;
        registry.register(Box::new(epsilon.clone()))?;
        registry.register(Box::new(last_reward.clone()))?;
        registry.register(Box::new(last_action.clone()))?;
        registry.register(Box::new(latency_ms.clone()))?;
        Ok(Self {
            registry,
            iterations,
            actuations_ok,
            actuations_fail,
            observe_fail_by_reason,
            learn_updates,
            epsilon,
            last_reward,
            last_action,
            latency_ms,
        })
    }

    pub fn inc_iteration(&self) {
        self.iterations.inc();
    }

    pub fn record_action(&self, action_index: usize) {
        self.last_action.set(action_index as i64);
    }

    pub fn inc_actuation(&self, ok: bool) {
        if ok {
            self.actuations_ok.inc();
        } else {
            self.actuations_fail.inc();
        }
    }

    pub fn inc_observe_fail(&self, reason: &str) {
        self.observe_fail_by_reason.with_label_values(&[reason]).inc();
    }

    pub fn record_learn(&self, reward: f64, epsilon: f64) {
        self.learn_updates.inc();
        self.last_reward.set(reward);
        self.epsilon.set(epsilon);
    }

    pub fn set_epsilon(&self, epsilon: f64) {
        self.epsilon.set(epsilon);
    }

    pub fn record_latencies(&self, reading: &LatencyReading) {
        for target in Target::ALL {
            self.latency_ms
                .with_label_values(&[target.as_str()])
                .set(reading.get(target));
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.get()
    }

    pub fn gather(&self) -> String {
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let _ = encoder.encode(&mf, &mut buf);
        String::from_utf8(buf).unwrap_or_default()
    }
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn with_content_type<R: std::io::Read>(resp: Response<R>, value: &str) -> Response<R> {
    match header("Content-Type", value) {
        Some(h) => resp.with_header(h),
        None => resp,
    }
}

/// Serve `/metrics`, `/health` and `/ready` from a background thread.
///
/// Bind failures are logged; the controller keeps running without the
/// endpoint.
pub fn start_metrics_server(addr: &str, metrics: ControllerMetrics, health: HealthState) {
    let addr = addr.to_string();
    std::thread::spawn(move || {
        let server = match Server::http(addr.as_str()) {
            Ok(server) => server,
            Err(err) => {
                warn!(addr = %addr, error = %err, "metrics server failed to bind");
                return;
            }
        };
        info!(addr = %addr, "metrics server listening");
        for request in server.incoming_requests() {
            let response = match request.url() {
                "/metrics" => with_content_type(
                    Response::from_string(metrics.gather()),
                    "text/plain; version=0.0.4",
                ),
                "/health" => {
                    if health.is_healthy() {
                        Response::from_string("ok")
                    } else {
                        Response::from_string("unhealthy").with_status_code(503)
                    }
                }
                "/ready" => {
                    if health.is_ready() {
                        Response::from_string("ready")
                    } else {
                        Response::from_string("not_ready").with_status_code(503)
                    }
                }
                _ => Response::from_string("not found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });
}

pub fn config_hash(cfg: &Config) -> u64 {
    fnv1a64(&format!("{cfg:?}"))
}

pub fn format_startup_log(
    cfg: &Config,
    source_label: &str,
    actuator_label: &str,
    metrics_addr: &str,
) -> String {
    let a = &cfg.agent;
    format!(
        "qroute_live | cfg={} | cfg_hash=0x{:016x} | source={} | actuator={} | actions={} | thresholds_ms={}/{} | alpha={} gamma={} eps={}..{} decay={} | dwell_s={} | seed={} | metrics_addr={}",
        cfg.version,
        config_hash(cfg),
        source_label,
        actuator_label,
        cfg.actions.len(),
        cfg.thresholds.low_ms,
        cfg.thresholds.high_ms,
        a.learning_rate,
        a.discount_factor,
        a.exploration_rate,
        a.exploration_min,
        a.exploration_decay,
        cfg.control.dwell.as_secs_f64(),
        cfg.seed
            .map(|s| s.to_string())
            .unwrap_or_else(|| "entropy".to_string()),
        metrics_addr
    )
}

fn fnv1a64(s: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut h = FNV_OFFSET;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}
