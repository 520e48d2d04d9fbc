//! Istio VirtualService actuator.
//!
//! Rewrites the weighted HTTP route of one VirtualService through the
//! Kubernetes API with a JSON merge patch. The token is read once at
//! construction from `QROUTE_K8S_TOKEN` or, failing that, from the
//! configured service-account token file.

use std::fs;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::info;

use super::{ActuateError, Actuator, BoxFuture};
use crate::config::RoutingConfig;
use crate::types::{Target, WeightTuple};

pub const TOKEN_ENV: &str = "QROUTE_K8S_TOKEN";

/// Source of API credentials.
pub trait SecretProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Merge-patch body assigning `weights` to the route subsets `v1..vN`.
pub fn build_patch(host: &str, weights: &WeightTuple) -> Value {
    let route: Vec<Value> = Target::ALL
        .iter()
        .map(|target| {
            json!({
                "destination": {"host": host, "subset": target.as_str()},
                "weight": weights.weight(*target),
            })
        })
        .collect();
    json!({"spec": {"http": [{"route": route}]}})
}

pub fn resource_url(cfg: &RoutingConfig) -> String {
    format!(
        "{}/apis/{}/{}/namespaces/{}/virtualservices/{}",
        cfg.api_server.trim_end_matches('/'),
        cfg.api_group,
        cfg.api_version,
        cfg.namespace,
        cfg.virtual_service
    )
}

pub struct VirtualServiceActuator {
    client: Client,
    url: String,
    host: String,
    name: String,
    token: Option<String>,
}

impl VirtualServiceActuator {
    pub fn new(cfg: &RoutingConfig, secrets: &dyn SecretProvider) -> Result<Self, ActuateError> {
        let token = match secrets.get(TOKEN_ENV) {
            Some(token) => Some(token.trim().to_string()),
            None => fs::read_to_string(&cfg.token_path)
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        };
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .danger_accept_invalid_certs(cfg.insecure_tls)
            .build()
            .map_err(|e| ActuateError::transport(format!("client build failed: {e}")))?;
        Ok(Self {
            client,
            url: resource_url(cfg),
            host: cfg.host.clone(),
            name: cfg.virtual_service.clone(),
            token,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn patch(&self, weights: WeightTuple) -> Result<(), ActuateError> {
        let body = build_patch(&self.host, &weights);
        let req = self
            .client
            .patch(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/merge-patch+json")
            .body(body.to_string());
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| ActuateError::transport(e.to_string()))?;
        check_status(resp.status(), &self.name)?;
        info!(
            phase = "act",
            virtual_service = %self.name,
            weights = %weights,
            "VirtualService patched"
        );
        Ok(())
    }

    async fn get(&self) -> Result<(), ActuateError> {
        let req = self.client.get(&self.url);
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| ActuateError::transport(e.to_string()))?;
        check_status(resp.status(), &self.name)
    }
}

fn check_status(status: StatusCode, name: &str) -> Result<(), ActuateError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ActuateError::auth(format!("HTTP {status} for VirtualService '{name}'")))
        }
        _ => Err(ActuateError::rejected(format!(
            "HTTP {status} for VirtualService '{name}'"
        ))),
    }
}

impl Actuator for VirtualServiceActuator {
    fn apply(&self, weights: WeightTuple) -> BoxFuture<'_, Result<(), ActuateError>> {
        Box::pin(self.patch(weights))
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), ActuateError>> {
        Box::pin(self.get())
    }

    fn describe(&self) -> String {
        format!("virtualservice:{}", self.name)
    }
}
