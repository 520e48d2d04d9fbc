use std::io::Write;
use std::sync::{Arc, Mutex};

use qroute::config::{PrometheusConfig, RoutingConfig};
use qroute::io::prometheus::PrometheusSource;
use qroute::io::virtual_service::{build_patch, SecretProvider, VirtualServiceActuator, TOKEN_ENV};
use qroute::io::{ActuateErrorKind, Actuator, MetricSource, SourceErrorKind};
use qroute::types::{Target, WeightTuple};
use serde_json::{json, Value};
use wiremock::matchers::{bearer_token, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VS_PATH: &str =
    "/apis/networking.istio.io/v1alpha3/namespaces/lirmm-services/virtualservices/product-service-vs";

fn vector(result: Value) -> Value {
    json!({"status": "success", "data": {"resultType": "vector", "result": result}})
}

fn series(workload: &str, value: &str) -> Value {
    json!({"metric": {"destination_workload": workload}, "value": [1712345678.1, value]})
}

fn prometheus_cfg(server: &MockServer) -> PrometheusConfig {
    PrometheusConfig {
        url: server.uri(),
        ..PrometheusConfig::default()
    }
}

async fn answer_latency_query(server: &MockServer, template: ResponseTemplate) {
    let query = prometheus_cfg(server).latency_query();
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .and(query_param("query", query.as_str()))
        .respond_with(template)
        .expect(1)
        .mount(server)
        .await;
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn latency_query_maps_series_onto_targets() {
    let server = MockServer::start().await;
    answer_latency_query(
        &server,
        ResponseTemplate::new(200).set_body_json(vector(json!([
            series("product-service-v1-deployment", "250"),
            series("product-service-v2-deployment", "150"),
            series("product-service-v3-deployment", "600"),
        ]))),
    )
    .await;
    let source = PrometheusSource::new(&prometheus_cfg(&server)).unwrap();
    let reading = source.fetch_latencies().await.unwrap();
    assert_eq!(reading.values(), &[250.0, 150.0, 600.0]);
    assert!(reading.missing_targets().is_empty());
}

#[tokio::test]
async fn silent_targets_are_filled_and_logged() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let server = MockServer::start().await;
    answer_latency_query(
        &server,
        ResponseTemplate::new(200).set_body_json(vector(json!([
            series("product-service-v2-deployment", "80"),
            series("product-service-v3-deployment", "NaN"),
        ]))),
    )
    .await;
    let source = PrometheusSource::new(&prometheus_cfg(&server)).unwrap();
    let reading = source.fetch_latencies().await.unwrap();
    assert_eq!(reading.values(), &[1000.0, 80.0, 1000.0]);
    assert_eq!(reading.missing_targets(), vec![Target::V1, Target::V3]);

    let text = logs.text();
    assert!(text.contains("target not reporting"), "{text}");
    assert!(text.contains("target=v1"), "{text}");
    assert!(text.contains("target=v3"), "{text}");
}

#[tokio::test]
async fn empty_result_is_a_failure_not_a_reading() {
    let server = MockServer::start().await;
    answer_latency_query(
        &server,
        ResponseTemplate::new(200).set_body_json(vector(json!([]))),
    )
    .await;
    let source = PrometheusSource::new(&prometheus_cfg(&server)).unwrap();
    let err = source.fetch_latencies().await.unwrap_err();
    assert_eq!(err.kind, SourceErrorKind::Empty);
}

#[tokio::test]
async fn non_success_http_is_a_status_failure() {
    let server = MockServer::start().await;
    answer_latency_query(&server, ResponseTemplate::new(503)).await;
    let source = PrometheusSource::new(&prometheus_cfg(&server)).unwrap();
    let err = source.fetch_latencies().await.unwrap_err();
    assert_eq!(err.kind, SourceErrorKind::Status);
    assert!(err.message.contains("503"), "{}", err.message);
}

#[tokio::test]
async fn api_error_body_is_a_status_failure() {
    let server = MockServer::start().await;
    answer_latency_query(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({"status": "error", "errorType": "bad_data", "error": "parse error"})),
    )
    .await;
    let source = PrometheusSource::new(&prometheus_cfg(&server)).unwrap();
    let err = source.fetch_latencies().await.unwrap_err();
    assert_eq!(err.kind, SourceErrorKind::Status);
    assert!(err.message.contains("parse error"));
}

#[tokio::test]
async fn garbled_body_is_a_parse_failure() {
    let server = MockServer::start().await;
    answer_latency_query(&server, ResponseTemplate::new(200).set_body_string("<html>")).await;
    let source = PrometheusSource::new(&prometheus_cfg(&server)).unwrap();
    let err = source.fetch_latencies().await.unwrap_err();
    assert_eq!(err.kind, SourceErrorKind::Parse);
}

#[tokio::test]
async fn unreachable_prometheus_is_a_transport_failure() {
    let cfg = PrometheusConfig {
        url: "http://127.0.0.1:1".to_string(),
        ..PrometheusConfig::default()
    };
    let source = PrometheusSource::new(&cfg).unwrap();
    let err = source.fetch_latencies().await.unwrap_err();
    assert_eq!(err.kind, SourceErrorKind::Transport);
}

struct StaticToken(&'static str);

impl SecretProvider for StaticToken {
    fn get(&self, key: &str) -> Option<String> {
        (key == TOKEN_ENV).then(|| self.0.to_string())
    }
}

fn actuator(server: &MockServer) -> VirtualServiceActuator {
    let cfg = RoutingConfig {
        api_server: server.uri(),
        token_path: "/nonexistent/qroute/token".to_string(),
        ..RoutingConfig::default()
    };
    VirtualServiceActuator::new(&cfg, &StaticToken("s3cret")).unwrap()
}

#[tokio::test]
async fn apply_sends_merge_patch_with_bearer_token() {
    let server = MockServer::start().await;
    let weights = WeightTuple::new([15, 70, 15]);
    Mock::given(method("PATCH"))
        .and(path(VS_PATH))
        .and(header("content-type", "application/merge-patch+json"))
        .and(bearer_token("s3cret"))
        .and(body_json(build_patch("product-service-svc", &weights)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    actuator(&server).apply(weights).await.unwrap();
}

#[tokio::test]
async fn refused_credentials_are_auth_failures() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(VS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(VS_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let act = actuator(&server);
    let err = act.apply(WeightTuple::new([34, 33, 33])).await.unwrap_err();
    assert_eq!(err.kind, ActuateErrorKind::Auth);
    let err = act.probe().await.unwrap_err();
    assert_eq!(err.kind, ActuateErrorKind::Auth);
}

#[tokio::test]
async fn rejected_patch_is_not_an_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(VS_PATH))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;
    let err = actuator(&server)
        .apply(WeightTuple::new([0, 50, 50]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ActuateErrorKind::Rejected);
}

#[tokio::test]
async fn reachability_check_reads_the_virtual_service() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VS_PATH))
        .and(bearer_token("s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "VirtualService"})))
        .expect(1)
        .mount(&server)
        .await;
    actuator(&server).probe().await.unwrap();
}
