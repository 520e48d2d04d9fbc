// src/collect.rs
//
// Experiment metric collector.
//
// Scrapes a fixed set of PromQL instant queries every `scrape_interval`
// until `duration` has elapsed (or a stop is requested) and appends one
// JSONL row per returned series to `{out_dir}/{experiment}_{name}.jsonl`.
// Runs alongside the controller to record the effect of its decisions;
// it never feeds back into the loop.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::io::prometheus::{PrometheusSource, Sample};
use crate::io::{BoxFuture, SourceError};
use crate::live::ShutdownSignal;
use crate::telemetry::now_rfc3339;

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorQuery {
    /// File-name suffix, e.g. `p99_latency_per_pod_ms`.
    pub name: String,
    pub promql: String,
    /// Series label written as `pod`. `None` for service-wide aggregates.
    pub label: Option<String>,
    /// Write an explicit `0.0` row when the query returns no series.
    pub zero_when_empty: bool,
}

impl CollectorQuery {
    pub fn new(name: &str, promql: String, label: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            promql,
            label: label.map(str::to_string),
            zero_when_empty: false,
        }
    }

    pub fn zero_when_empty(mut self) -> Self {
        self.zero_when_empty = true;
        self
    }
}

/// Request rate, p99 latency and CPU per pod, plus the service-wide 5xx rate.
pub fn default_queries(namespace: &str, workload_prefix: &str) -> Vec<CollectorQuery> {
    vec![
        CollectorQuery::new(
            "rps_per_pod",
            format!(
                "sum(rate(istio_requests_total{{reporter=\"destination\", destination_workload=~\"{workload_prefix}.*\", namespace=\"{namespace}\"}}[1m])) by (destination_workload)"
            ),
            Some("destination_workload"),
        ),
        CollectorQuery::new(
            "p99_latency_per_pod_ms",
            format!(
                "histogram_quantile(0.99, sum(rate(istio_request_duration_milliseconds_bucket{{reporter=\"destination\", destination_workload=~\"{workload_prefix}.*\", namespace=\"{namespace}\"}}[1m])) by (le, destination_workload))"
            ),
            Some("destination_workload"),
        ),
        CollectorQuery::new(
            "cpu_usage_per_pod_cores",
            format!(
                "sum(rate(container_cpu_usage_seconds_total{{namespace=\"{namespace}\", pod=~\"{workload_prefix}-.*\"}}[1m])) by (pod)"
            ),
            Some("pod"),
        ),
        CollectorQuery::new(
            "error_rate_5xx_total",
            format!(
                "sum(rate(istio_requests_total{{reporter=\"destination\", destination_workload=~\"{workload_prefix}.*\", response_code=~\"5.*\"}}[1m]))"
            ),
            None,
        )
        .zero_when_empty(),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorRow {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    pub value: f64,
}

/// Rows for one query result. Series missing the label are written as
/// `pod = "unknown"`.
pub fn rows_for(query: &CollectorQuery, samples: &[Sample], timestamp: &str) -> Vec<CollectorRow> {
    if samples.is_empty() {
        if query.zero_when_empty {
            return vec![CollectorRow {
                timestamp: timestamp.to_string(),
                pod: None,
                value: 0.0,
            }];
        }
        return Vec::new();
    }
    samples
        .iter()
        .map(|sample| CollectorRow {
            timestamp: timestamp.to_string(),
            pod: query
                .label
                .as_deref()
                .map(|label| sample.label(label).unwrap_or("unknown").to_string()),
            value: sample.value,
        })
        .collect()
}

/// Instant-query backend for the collector.
pub trait InstantQuery: Send + Sync {
    fn instant(&self, promql: &str) -> BoxFuture<'_, Result<Vec<Sample>, SourceError>>;
}

impl InstantQuery for PrometheusSource {
    fn instant(&self, promql: &str) -> BoxFuture<'_, Result<Vec<Sample>, SourceError>> {
        let promql = promql.to_string();
        Box::pin(async move { self.instant_query(&promql).await })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub experiment: String,
    pub out_dir: PathBuf,
    pub scrape_interval: Duration,
    pub duration: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            experiment: "baseline".to_string(),
            out_dir: PathBuf::from("."),
            scrape_interval: Duration::from_secs(15),
            duration: Duration::from_secs(1800),
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.trim().is_empty() {
            return Err(ConfigError::invalid("collector.experiment", "must not be empty"));
        }
        if self.scrape_interval.is_zero() {
            return Err(ConfigError::invalid("collector.scrape_interval", "must be > 0"));
        }
        if self.duration.is_zero() {
            return Err(ConfigError::invalid("collector.duration", "must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("collector output error for {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectSummary {
    pub scrapes: u64,
    pub rows: u64,
    pub failed_queries: u64,
}

struct Output {
    query: CollectorQuery,
    path: PathBuf,
    writer: BufWriter<File>,
}

pub struct Collector<Q> {
    backend: Q,
    cfg: CollectorConfig,
    outputs: Vec<Output>,
    shutdown: ShutdownSignal,
    summary: CollectSummary,
}

impl<Q: InstantQuery> Collector<Q> {
    /// Create (truncating) one output file per query.
    pub fn new(
        backend: Q,
        queries: Vec<CollectorQuery>,
        cfg: CollectorConfig,
    ) -> Result<Self, CollectError> {
        cfg.validate()?;
        fs::create_dir_all(&cfg.out_dir).map_err(|source| CollectError::Output {
            path: cfg.out_dir.display().to_string(),
            source,
        })?;
        let mut outputs = Vec::with_capacity(queries.len());
        for query in queries {
            let path = cfg
                .out_dir
                .join(format!("{}_{}.jsonl", cfg.experiment, query.name));
            let file = File::create(&path).map_err(|source| CollectError::Output {
                path: path.display().to_string(),
                source,
            })?;
            outputs.push(Output {
                query,
                path,
                writer: BufWriter::new(file),
            });
        }
        Ok(Self {
            backend,
            cfg,
            outputs,
            shutdown: ShutdownSignal::never(),
            summary: CollectSummary::default(),
        })
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.outputs.iter().map(|o| o.path.clone()).collect()
    }

    /// Run every query once. A failed query is logged and skipped.
    pub async fn scrape_once(&mut self) -> Result<(), CollectError> {
        let timestamp = now_rfc3339();
        for output in &mut self.outputs {
            let samples = match self.backend.instant(&output.query.promql).await {
                Ok(samples) => samples,
                Err(err) => {
                    self.summary.failed_queries += 1;
                    warn!(
                        query = %output.query.name,
                        reason = err.reason_label(),
                        error = %err,
                        "collector query failed"
                    );
                    continue;
                }
            };
            for row in rows_for(&output.query, &samples, &timestamp) {
                let line = match serde_json::to_string(&row) {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(query = %output.query.name, error = %err, "row not serializable, skipped");
                        continue;
                    }
                };
                writeln!(output.writer, "{line}").map_err(|source| CollectError::Output {
                    path: output.path.display().to_string(),
                    source,
                })?;
                self.summary.rows += 1;
            }
            output.writer.flush().map_err(|source| CollectError::Output {
                path: output.path.display().to_string(),
                source,
            })?;
        }
        self.summary.scrapes += 1;
        Ok(())
    }

    pub async fn run(&mut self) -> Result<CollectSummary, CollectError> {
        let deadline = Instant::now() + self.cfg.duration;
        info!(
            experiment = %self.cfg.experiment,
            queries = self.outputs.len(),
            duration_s = self.cfg.duration.as_secs(),
            interval_s = self.cfg.scrape_interval.as_secs(),
            "collection started"
        );
        while Instant::now() < deadline {
            if self.shutdown.is_triggered() {
                break;
            }
            self.scrape_once().await?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            info!(
                scrape = self.summary.scrapes,
                remaining_s = remaining.as_secs(),
                "scrape complete"
            );
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                _ = sleep(self.cfg.scrape_interval) => {}
            }
        }
        info!(
            experiment = %self.cfg.experiment,
            scrapes = self.summary.scrapes,
            rows = self.summary.rows,
            "collection finished"
        );
        Ok(self.summary)
    }
}
