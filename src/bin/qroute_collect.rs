//! Experiment metric collector.
//!
//! Records request rate, p99 latency, CPU and 5xx rate for the managed
//! workloads to `{out_dir}/{experiment}_{query}.jsonl` while an
//! experiment (baseline or controller-enabled) runs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use qroute::collect::{default_queries, CollectorConfig, Collector};
use qroute::config::Config;
use qroute::io::prometheus::PrometheusSource;
use qroute::live::shutdown_channel;
use qroute::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "qroute_collect", about = "Scrape experiment metrics from Prometheus", version)]
struct Args {
    /// Output file prefix, e.g. "baseline" or "ai_q_learning_run1".
    #[arg(long, default_value = "baseline")]
    experiment: String,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// Total collection time.
    #[arg(long, default_value_t = 1800)]
    duration_secs: u64,
    #[arg(long, default_value_t = 15)]
    interval_secs: u64,
    /// Workload name prefix shared by every variant.
    #[arg(long, default_value = "product-service")]
    workload_prefix: String,
    #[arg(long)]
    prometheus_url: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let mut cfg = Config::from_env();
    if let Some(url) = &args.prometheus_url {
        cfg.prometheus.url = url.clone();
    }
    cfg.validate().context("invalid configuration")?;
    let backend = PrometheusSource::new(&cfg.prometheus).context("prometheus client setup")?;
    let queries = default_queries(&cfg.prometheus.namespace, &args.workload_prefix);
    let collector_cfg = CollectorConfig {
        experiment: args.experiment.clone(),
        out_dir: args.out_dir.clone(),
        scrape_interval: Duration::from_secs(args.interval_secs),
        duration: Duration::from_secs(args.duration_secs),
    };
    collector_cfg
        .validate()
        .context("invalid collector configuration")?;

    let (handle, signal) = shutdown_channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        handle.trigger();
    });

    let mut collector = Collector::new(backend, queries, collector_cfg)
        .context("collector setup")?
        .with_shutdown(signal);
    for path in collector.output_paths() {
        info!(path = %path.display(), "writing");
    }
    let summary = collector.run().await.context("collection failed")?;
    info!(
        experiment = %args.experiment,
        scrapes = summary.scrapes,
        rows = summary.rows,
        failed_queries = summary.failed_queries,
        "results saved"
    );
    Ok(())
}
