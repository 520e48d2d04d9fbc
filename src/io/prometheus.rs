//! Prometheus HTTP query API metric source.
//!
//! Issues one instant query per fetch against `{url}/api/v1/query`. The
//! response is an instant vector:
//!
//! ```text
//! {"status":"success","data":{"resultType":"vector","result":[
//!   {"metric":{"destination_workload":"product-service-v1-deployment"},
//!    "value":[1712345678.123,"152.4"]}
//! ]}}
//! ```
//!
//! Each series is mapped to a [`Target`] through its workload label.
//! Targets with no series (or a `NaN` quantile, which Prometheus reports
//! when a workload received no traffic) get `missing_latency_ms`.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::{BoxFuture, MetricSource, SourceError};
use crate::config::PrometheusConfig;
use crate::types::{LatencyMs, LatencyReading, Target};

/// Label the latency query groups by.
pub const WORKLOAD_LABEL: &str = "destination_workload";

/// One series of an instant-vector result.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: serde_json::Map<String, Value>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).and_then(|v| v.as_str())
    }
}

/// Interpret a `/api/v1/query` response body.
///
/// An empty `result` is returned as an empty vector; callers decide
/// whether that is an error.
pub fn parse_query_response(body: &Value) -> Result<Vec<Sample>, SourceError> {
    let status = body
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SourceError::parse("missing 'status' field"))?;
    if status != "success" {
        let error = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return Err(SourceError::status(format!(
            "query status={status}: {error}"
        )));
    }
    let result = body
        .get("data")
        .and_then(|d| d.get("result"))
        .and_then(|r| r.as_array())
        .ok_or_else(|| SourceError::parse("missing 'data.result' array"))?;

    let mut out = Vec::with_capacity(result.len());
    for entry in result {
        let labels = entry
            .get("metric")
            .and_then(|m| m.as_object())
            .cloned()
            .unwrap_or_default();
        let value = entry
            .get("value")
            .and_then(|v| v.as_array())
            .and_then(|pair| pair.get(1))
            .ok_or_else(|| SourceError::parse("series without 'value' pair"))?;
        out.push(Sample {
            labels,
            value: parse_sample_value(value)?,
        });
    }
    Ok(out)
}

/// Prometheus encodes sample values as strings (`"152.4"`, `"NaN"`, `"+Inf"`).
fn parse_sample_value(value: &Value) -> Result<f64, SourceError> {
    if let Some(s) = value.as_str() {
        return match s {
            "NaN" => Ok(f64::NAN),
            "+Inf" | "Inf" => Ok(f64::INFINITY),
            "-Inf" => Ok(f64::NEG_INFINITY),
            other => other
                .parse::<f64>()
                .map_err(|_| SourceError::parse(format!("sample value '{other}' is not a number"))),
        };
    }
    value
        .as_f64()
        .ok_or_else(|| SourceError::parse("sample value is neither string nor number"))
}

/// Map samples onto targets by `label`, filling absent targets.
pub fn samples_to_reading(
    samples: &[Sample],
    label: &str,
    missing_latency_ms: LatencyMs,
) -> LatencyReading {
    let mapped = samples.iter().filter_map(|s| {
        let target = s.label(label).and_then(Target::from_label)?;
        Some((target, s.value))
    });
    LatencyReading::from_samples(mapped, missing_latency_ms)
}

pub struct PrometheusSource {
    client: Client,
    endpoint: String,
    query: String,
    missing_latency_ms: LatencyMs,
}

impl PrometheusSource {
    pub fn new(cfg: &PrometheusConfig) -> Result<Self, SourceError> {
        Self::with_query(cfg, cfg.latency_query())
    }

    pub fn with_query(cfg: &PrometheusConfig, query: String) -> Result<Self, SourceError> {
        let client = build_client(cfg.request_timeout)?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/query", cfg.url.trim_end_matches('/')),
            query,
            missing_latency_ms: cfg.missing_latency_ms,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Run an arbitrary instant query against the same endpoint.
    pub async fn instant_query(&self, promql: &str) -> Result<Vec<Sample>, SourceError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("query", promql)])
            .send()
            .await
            .map_err(|e| SourceError::transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::status(format!("HTTP {status}")));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SourceError::parse(e.to_string()))?;
        parse_query_response(&body)
    }

    async fn fetch(&self) -> Result<LatencyReading, SourceError> {
        let samples = self.instant_query(&self.query).await?;
        if samples.is_empty() {
            return Err(SourceError::empty("latency query returned no series"));
        }
        debug!(series = samples.len(), "latency query ok");
        let reading = samples_to_reading(&samples, WORKLOAD_LABEL, self.missing_latency_ms);
        for target in reading.missing_targets() {
            warn!(
                phase = "observe",
                target = %target,
                fallback_ms = self.missing_latency_ms,
                "target not reporting, using fallback latency"
            );
        }
        Ok(reading)
    }
}

fn build_client(timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SourceError::transport(format!("client build failed: {e}")))
}

impl MetricSource for PrometheusSource {
    fn fetch_latencies(&self) -> BoxFuture<'_, Result<LatencyReading, SourceError>> {
        Box::pin(self.fetch())
    }

    fn describe(&self) -> String {
        format!("prometheus:{}", self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SourceErrorKind;
    use serde_json::json;

    fn vector(result: Value) -> Value {
        json!({"status": "success", "data": {"resultType": "vector", "result": result}})
    }

    #[test]
    fn parses_instant_vector() {
        let body = vector(json!([
            {"metric": {"destination_workload": "product-service-v1-deployment"}, "value": [1.0, "250"]},
            {"metric": {"destination_workload": "product-service-v2-deployment"}, "value": [1.0, "150.5"]},
            {"metric": {"destination_workload": "product-service-v3-deployment"}, "value": [1.0, "600"]}
        ]));
        let samples = parse_query_response(&body).unwrap();
        assert_eq!(samples.len(), 3);
        let reading = samples_to_reading(&samples, WORKLOAD_LABEL, 1000.0);
        assert_eq!(reading.values(), &[250.0, 150.5, 600.0]);
        assert!(reading.missing_targets().is_empty());
    }

    #[test]
    fn nan_and_absent_targets_use_fallback() {
        let body = vector(json!([
            {"metric": {"destination_workload": "product-service-v1-deployment"}, "value": [1.0, "NaN"]},
            {"metric": {"destination_workload": "product-service-v2-deployment"}, "value": [1.0, "80"]}
        ]));
        let samples = parse_query_response(&body).unwrap();
        let reading = samples_to_reading(&samples, WORKLOAD_LABEL, 1000.0);
        assert_eq!(reading.values(), &[1000.0, 80.0, 1000.0]);
        assert_eq!(reading.missing_targets(), vec![Target::V1, Target::V3]);
    }

    #[test]
    fn unrelated_series_are_ignored() {
        let body = vector(json!([
            {"metric": {"destination_workload": "cart-service"}, "value": [1.0, "10"]}
        ]));
        let samples = parse_query_response(&body).unwrap();
        let reading = samples_to_reading(&samples, WORKLOAD_LABEL, 1000.0);
        assert_eq!(reading.missing_targets().len(), 3);
    }

    #[test]
    fn error_status_is_reported() {
        let body = json!({"status": "error", "errorType": "bad_data", "error": "parse error"});
        let err = parse_query_response(&body).unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::Status);
        assert!(err.message.contains("parse error"));
    }

    #[test]
    fn malformed_bodies_are_parse_errors() {
        assert_eq!(
            parse_query_response(&json!({})).unwrap_err().kind,
            SourceErrorKind::Parse
        );
        let body = vector(json!([{"metric": {}, "value": [1.0, "abc"]}]));
        assert_eq!(
            parse_query_response(&body).unwrap_err().kind,
            SourceErrorKind::Parse
        );
    }

    #[test]
    fn empty_result_is_not_an_error_at_parse_level() {
        let samples = parse_query_response(&vector(json!([]))).unwrap();
        assert!(samples.is_empty());
    }
}
