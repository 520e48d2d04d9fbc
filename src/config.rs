// src/config.rs
//
// Central configuration for the qroute controller.
//
// One explicit value carries every tunable: latency thresholds, agent
// hyperparameters, the action catalog, loop cadence and the two external
// collaborators (Prometheus query API, Kubernetes VirtualService).
// `Config::default()` holds the documented defaults; `Config::from_env()`
// overlays `QROUTE_*` environment variables on top of them.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::rl::actions::{ActionCatalog, CatalogError};
use crate::rl::agent::AgentParams;
use crate::rl::state::LatencyThresholds;

pub const CONFIG_VERSION: &str = "qroute-config-v1";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid config value for '{field}': {message}")]
    Invalid { field: String, message: String },
    #[error("invalid action catalog: {0}")]
    Catalog(#[from] CatalogError),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Human-readable config version.
    pub version: &'static str,
    /// LOW/MEDIUM/HIGH bucket boundaries.
    pub thresholds: LatencyThresholds,
    /// Learning rate, discount, exploration schedule.
    pub agent: AgentParams,
    /// RNG seed for exploration. `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Weight assignments the agent chooses between.
    pub actions: ActionCatalog,
    /// Loop cadence.
    pub control: ControlConfig,
    /// Metric source (Prometheus HTTP query API).
    pub prometheus: PrometheusConfig,
    /// Actuator (Istio VirtualService via the Kubernetes API).
    pub routing: RoutingConfig,
    /// Metrics / health endpoint.
    pub ops: OpsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlConfig {
    /// Dwell interval between actuation and the next observation.
    pub dwell: Duration,
    /// Stop after this many iterations. `None` runs until interrupted.
    pub max_iterations: Option<u64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(20),
            max_iterations: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrometheusConfig {
    /// Base URL, e.g. `http://localhost:9090`.
    pub url: String,
    /// Kubernetes namespace the workloads live in.
    pub namespace: String,
    /// Regex matched against `destination_workload`.
    pub workload_regex: String,
    /// Histogram quantile (0.99 = p99).
    pub quantile: f64,
    /// PromQL range for `rate()`, e.g. `1m`.
    pub rate_window: String,
    /// Latency assigned to a target that reports no sample.
    pub missing_latency_ms: f64,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".to_string(),
            namespace: "lirmm-services".to_string(),
            workload_regex: "product-service-v.-deployment".to_string(),
            quantile: 0.99,
            rate_window: "1m".to_string(),
            missing_latency_ms: 1000.0,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl PrometheusConfig {
    /// PromQL for per-workload latency quantile in milliseconds.
    pub fn latency_query(&self) -> String {
        format!(
            "histogram_quantile({}, sum(rate(istio_request_duration_milliseconds_bucket{{reporter=\"destination\", destination_workload=~\"{}\", namespace=\"{}\"}}[{}])) by (le, destination_workload))",
            self.quantile, self.workload_regex, self.namespace, self.rate_window
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingConfig {
    /// Kubernetes API server base URL.
    pub api_server: String,
    pub namespace: String,
    /// Name of the VirtualService to patch.
    pub virtual_service: String,
    /// Destination host of every weighted route.
    pub host: String,
    pub api_group: String,
    pub api_version: String,
    /// Bearer token file (used when `QROUTE_K8S_TOKEN` is unset).
    pub token_path: String,
    /// Skip TLS verification of the API server certificate.
    pub insecure_tls: bool,
    pub request_timeout: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            api_server: "https://kubernetes.default.svc".to_string(),
            namespace: "lirmm-services".to_string(),
            virtual_service: "product-service-vs".to_string(),
            host: "product-service-svc".to_string(),
            api_group: "networking.istio.io".to_string(),
            api_version: "v1alpha3".to_string(),
            token_path: "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string(),
            insecure_tls: false,
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpsConfig {
    /// Address for `/metrics`, `/health`, `/ready`. `None` disables it.
    pub metrics_addr: Option<String>,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            metrics_addr: Some("127.0.0.1:9898".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            thresholds: LatencyThresholds::default(),
            agent: AgentParams::default(),
            seed: None,
            actions: ActionCatalog::default(),
            control: ControlConfig::default(),
            prometheus: PrometheusConfig::default(),
            routing: RoutingConfig::default(),
            ops: OpsConfig::default(),
        }
    }
}

impl Config {
    /// Defaults overlaid with `QROUTE_*` environment variables.
    ///
    /// Unparsable values are logged and ignored; the default is kept.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Some(v) = env_parse::<f64>("QROUTE_ALPHA") {
            cfg.agent.learning_rate = v;
        }
        if let Some(v) = env_parse::<f64>("QROUTE_GAMMA") {
            cfg.agent.discount_factor = v;
        }
        if let Some(v) = env_parse::<f64>("QROUTE_EPSILON") {
            cfg.agent.exploration_rate = v;
        }
        if let Some(v) = env_parse::<f64>("QROUTE_EPSILON_MIN") {
            cfg.agent.exploration_min = v;
        }
        if let Some(v) = env_parse::<f64>("QROUTE_EPSILON_DECAY") {
            cfg.agent.exploration_decay = v;
        }
        if let Some(v) = env_parse::<u64>("QROUTE_SEED") {
            cfg.seed = Some(v);
        }
        if let Some(raw) = env_string("QROUTE_ACTIONS") {
            match ActionCatalog::parse(&raw) {
                Ok(catalog) => cfg.actions = catalog,
                Err(err) => warn!(key = "QROUTE_ACTIONS", error = %err, "ignoring invalid action catalog"),
            }
        }

        if let Some(v) = env_parse::<f64>("QROUTE_LOW_LATENCY_MS") {
            cfg.thresholds.low_ms = v;
        }
        if let Some(v) = env_parse::<f64>("QROUTE_HIGH_LATENCY_MS") {
            cfg.thresholds.high_ms = v;
        }

        if let Some(v) = env_parse::<f64>("QROUTE_DWELL_SECS") {
            match Duration::try_from_secs_f64(v) {
                Ok(d) => cfg.control.dwell = d,
                Err(_) => warn!(key = "QROUTE_DWELL_SECS", value = v, "ignoring invalid dwell"),
            }
        }
        if let Some(v) = env_parse::<u64>("QROUTE_MAX_ITERATIONS") {
            cfg.control.max_iterations = (v > 0).then_some(v);
        }

        if let Some(v) = env_string("QROUTE_PROMETHEUS_URL") {
            cfg.prometheus.url = v;
        }
        if let Some(v) = env_string("QROUTE_NAMESPACE") {
            cfg.prometheus.namespace = v.clone();
            cfg.routing.namespace = v;
        }
        if let Some(v) = env_string("QROUTE_WORKLOAD_REGEX") {
            cfg.prometheus.workload_regex = v;
        }
        if let Some(v) = env_parse::<f64>("QROUTE_LATENCY_QUANTILE") {
            cfg.prometheus.quantile = v;
        }
        if let Some(v) = env_string("QROUTE_RATE_WINDOW") {
            cfg.prometheus.rate_window = v;
        }
        if let Some(v) = env_parse::<f64>("QROUTE_MISSING_LATENCY_MS") {
            cfg.prometheus.missing_latency_ms = v;
        }
        if let Some(v) = env_parse::<u64>("QROUTE_PROMETHEUS_TIMEOUT_MS") {
            cfg.prometheus.request_timeout = Duration::from_millis(v);
        }

        if let Some(v) = env_string("QROUTE_K8S_API") {
            cfg.routing.api_server = v;
        }
        if let Some(v) = env_string("QROUTE_VIRTUAL_SERVICE") {
            cfg.routing.virtual_service = v;
        }
        if let Some(v) = env_string("QROUTE_ROUTE_HOST") {
            cfg.routing.host = v;
        }
        if let Some(v) = env_string("QROUTE_K8S_TOKEN_PATH") {
            cfg.routing.token_path = v;
        }
        if let Some(v) = env_bool("QROUTE_K8S_INSECURE") {
            cfg.routing.insecure_tls = v;
        }

        if let Some(v) = env::var("QROUTE_METRICS_ADDR").ok() {
            let v = v.trim();
            cfg.ops.metrics_addr = match v.to_ascii_lowercase().as_str() {
                "" | "off" | "none" => None,
                _ => Some(v.to_string()),
            };
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.agent.validate()?;
        if !self.thresholds.is_valid() {
            return Err(ConfigError::invalid(
                "thresholds",
                format!(
                    "need 0 <= low_ms < high_ms, got low_ms={} high_ms={}",
                    self.thresholds.low_ms, self.thresholds.high_ms
                ),
            ));
        }
        if self.actions.is_empty() {
            return Err(ConfigError::Catalog(CatalogError::Empty));
        }
        if self.control.dwell.is_zero() {
            return Err(ConfigError::invalid("control.dwell", "must be > 0"));
        }
        let q = self.prometheus.quantile;
        if !(q > 0.0 && q < 1.0) {
            return Err(ConfigError::invalid(
                "prometheus.quantile",
                format!("{q} not in (0, 1)"),
            ));
        }
        let missing = self.prometheus.missing_latency_ms;
        if !(missing.is_finite() && missing >= self.thresholds.high_ms) {
            return Err(ConfigError::invalid(
                "prometheus.missing_latency_ms",
                format!(
                    "{missing} must be finite and >= high threshold {}",
                    self.thresholds.high_ms
                ),
            ));
        }
        if self.prometheus.url.trim().is_empty() {
            return Err(ConfigError::invalid("prometheus.url", "empty"));
        }
        if self.routing.api_server.trim().is_empty() {
            return Err(ConfigError::invalid("routing.api_server", "empty"));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = env_string(key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "ignoring unparsable boolean override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn latency_query_mentions_workload_and_namespace() {
        let q = PrometheusConfig::default().latency_query();
        assert!(q.starts_with("histogram_quantile(0.99,"));
        assert!(q.contains("destination_workload=~\"product-service-v.-deployment\""));
        assert!(q.contains("namespace=\"lirmm-services\""));
        assert!(q.contains("[1m]"));
        assert!(q.ends_with("by (le, destination_workload))"));
    }

    #[test]
    fn missing_latency_must_encode_high() {
        let mut cfg = Config::default();
        cfg.prometheus.missing_latency_ms = 150.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "prometheus.missing_latency_ms"
        ));
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut cfg = Config::default();
        cfg.thresholds = LatencyThresholds {
            low_ms: 500.0,
            high_ms: 400.0,
        };
        assert!(cfg.validate().is_err());
    }
}
