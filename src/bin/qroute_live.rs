//! Live controller binary.
//!
//! Wires the Prometheus metric source, the VirtualService actuator (or a
//! dry-run no-op actuator) and the Q-learning agent into the control loop
//! and runs it until Ctrl-C / SIGTERM or the iteration limit.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use qroute::config::Config;
use qroute::io::prometheus::PrometheusSource;
use qroute::io::sim::NoopActuator;
use qroute::io::virtual_service::{EnvSecretProvider, VirtualServiceActuator};
use qroute::io::{Actuator, MetricSource};
use qroute::live::{
    format_startup_log, shutdown_channel, start_metrics_server, ControlLoop, ControllerMetrics,
    HealthState, ShutdownHandle,
};
use qroute::logging::init_logging;
use qroute::rl::{ActionCatalog, QLearningAgent, StateEncoder};
use qroute::telemetry::TelemetrySink;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ActuatorArg {
    /// Patch the Istio VirtualService.
    VirtualService,
    /// Log decisions only.
    Noop,
}

#[derive(Debug, Parser)]
#[command(name = "qroute_live", about = "Q-learning traffic-weight controller", version)]
struct Args {
    /// Which actuator to drive (default: virtual-service).
    #[arg(long, value_enum)]
    actuator: Option<ActuatorArg>,
    /// Shorthand for `--actuator noop`.
    #[arg(long)]
    dry_run: bool,
    /// Seed for exploration (default: OS entropy).
    #[arg(long)]
    seed: Option<u64>,
    /// Stop after this many iterations.
    #[arg(long)]
    max_iterations: Option<u64>,
    /// Dwell interval between actuation and observation.
    #[arg(long)]
    dwell_secs: Option<f64>,
    #[arg(long)]
    alpha: Option<f64>,
    #[arg(long)]
    gamma: Option<f64>,
    #[arg(long)]
    epsilon: Option<f64>,
    #[arg(long)]
    epsilon_decay: Option<f64>,
    /// Action catalog, e.g. "70,15,15;15,70,15".
    #[arg(long)]
    actions: Option<String>,
    #[arg(long)]
    prometheus_url: Option<String>,
    /// Metrics/health listen address, or "off".
    #[arg(long)]
    metrics_addr: Option<String>,
    /// Log filter (overrides QROUTE_LOG / RUST_LOG).
    #[arg(long)]
    log_level: Option<String>,
}

fn apply_args(cfg: &mut Config, args: &Args) -> Result<()> {
    if let Some(seed) = args.seed {
        cfg.seed = Some(seed);
    }
    if let Some(max) = args.max_iterations {
        cfg.control.max_iterations = Some(max);
    }
    if let Some(secs) = args.dwell_secs {
        cfg.control.dwell = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid --dwell-secs {secs}"))?;
    }
    if let Some(v) = args.alpha {
        cfg.agent.learning_rate = v;
    }
    if let Some(v) = args.gamma {
        cfg.agent.discount_factor = v;
    }
    if let Some(v) = args.epsilon {
        cfg.agent.exploration_rate = v;
        cfg.agent.exploration_min = cfg.agent.exploration_min.min(v);
    }
    if let Some(v) = args.epsilon_decay {
        cfg.agent.exploration_decay = v;
    }
    if let Some(raw) = &args.actions {
        cfg.actions = ActionCatalog::parse(raw).context("invalid --actions")?;
    }
    if let Some(url) = &args.prometheus_url {
        cfg.prometheus.url = url.clone();
    }
    if let Some(addr) = &args.metrics_addr {
        cfg.ops.metrics_addr = match addr.trim().to_ascii_lowercase().as_str() {
            "" | "off" | "none" => None,
            _ => Some(addr.clone()),
        };
    }
    Ok(())
}

fn spawn_signal_listener(handle: ShutdownHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("termination signal received");
        handle.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run_loop<A: Actuator>(
    cfg: &Config,
    source: PrometheusSource,
    actuator: A,
    metrics: ControllerMetrics,
    health: HealthState,
    handle: &ShutdownHandle,
) -> Result<()> {
    let agent = QLearningAgent::new(cfg.agent, cfg.actions.clone(), cfg.seed);
    let encoder = StateEncoder::new(cfg.thresholds);
    let mut control = ControlLoop::new(agent, encoder, source, actuator, cfg.control.clone())
        .with_metrics(metrics)
        .with_health(health)
        .with_telemetry(TelemetrySink::from_env())
        .with_shutdown(handle.signal());
    let summary = control.run().await.context("control loop failed")?;
    info!(
        iterations = summary.iterations,
        learned = summary.learned,
        skipped = summary.skipped,
        actuation_failures = summary.actuation_failures,
        final_epsilon = summary.final_epsilon,
        "qroute_live finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let mut cfg = Config::from_env();
    apply_args(&mut cfg, &args)?;
    cfg.validate().context("invalid configuration")?;
    for index in cfg.actions.unbalanced() {
        warn!(
            action = index,
            weights = %cfg.actions.weights(index),
            "action weights do not sum to 100"
        );
    }

    let actuator_arg = if args.dry_run {
        ActuatorArg::Noop
    } else {
        args.actuator.unwrap_or(ActuatorArg::VirtualService)
    };

    let source = PrometheusSource::new(&cfg.prometheus).context("metric source setup")?;
    let metrics = ControllerMetrics::new().context("metrics registry")?;
    let health = HealthState::new();
    let metrics_label = cfg.ops.metrics_addr.clone().unwrap_or_else(|| "off".to_string());
    if let Some(addr) = &cfg.ops.metrics_addr {
        start_metrics_server(addr, metrics.clone(), health.clone());
    }

    let (handle, _signal) = shutdown_channel();
    spawn_signal_listener(handle.clone());

    match actuator_arg {
        ActuatorArg::Noop => {
            let actuator = NoopActuator;
            info!("{}", format_startup_log(&cfg, &source.describe(), &actuator.describe(), &metrics_label));
            run_loop(&cfg, source, actuator, metrics, health, &handle).await
        }
        ActuatorArg::VirtualService => {
            let actuator = VirtualServiceActuator::new(&cfg.routing, &EnvSecretProvider)
                .context("actuator setup")?;
            info!("{}", format_startup_log(&cfg, &source.describe(), &actuator.describe(), &metrics_label));
            run_loop(&cfg, source, actuator, metrics, health, &handle).await
        }
    }
}
