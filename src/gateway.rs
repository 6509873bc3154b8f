//! Request coordination.
//!
//! One call runs lookup, render, dispatch, normalize and filter in order.
//! All state here is read-only once built and shared across requests.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::filter::{FieldFilter, HttpPolicySource, PolicySource};
use crate::normalize;
use crate::registry::TemplateRegistry;
use crate::render::Renderer;
use crate::transport::Dispatcher;
use reqwest::header::{HeaderMap, HeaderName};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// The gateway call path.
pub struct Gateway {
    registry: Arc<TemplateRegistry>,
    renderer: Renderer,
    dispatcher: Dispatcher,
    filter: FieldFilter,
    forward_headers: Vec<HeaderName>,
    /// Metrics tracking
    requests_processed: AtomicU64,
    requests_failed: AtomicU64,
}

/// Request counters reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub requests_processed: u64,
    pub requests_failed: u64,
}

impl Gateway {
    /// Create a gateway that fetches filter policies over HTTP.
    pub fn new(config: &GatewayConfig, registry: TemplateRegistry) -> Result<Self, GatewayError> {
        let source = Arc::new(HttpPolicySource::new(&config.policy)?);
        Self::with_policy_source(config, registry, source)
    }

    /// Create a gateway with a custom policy source.
    pub fn with_policy_source(
        config: &GatewayConfig,
        registry: TemplateRegistry,
        source: Arc<dyn PolicySource>,
    ) -> Result<Self, GatewayError> {
        let forward_headers = config
            .forwarding
            .headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
                    GatewayError::Config(format!("Invalid forwarded header '{}': {}", name, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let renderer = Renderer::for_registry(config.client.clone(), &registry)?;

        Ok(Self {
            registry: Arc::new(registry),
            renderer,
            dispatcher: Dispatcher::new(config)?,
            filter: FieldFilter::new(source, config.policy.field_matching),
            forward_headers,
            requests_processed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Build outbound channels that would otherwise be built on first use.
    pub async fn warm_up(&self) -> Result<(), GatewayError> {
        self.dispatcher.warm_up().await
    }

    /// Run one call for `group/service`.
    pub async fn execute(
        &self,
        group: &str,
        service: &str,
        params: &HashMap<String, String>,
        inbound: &HeaderMap,
    ) -> Result<Value, GatewayError> {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        let result = self.call(group, service, params, inbound).await;
        if result.is_err() {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn call(
        &self,
        group: &str,
        service: &str,
        params: &HashMap<String, String>,
        inbound: &HeaderMap,
    ) -> Result<Value, GatewayError> {
        let template = self.registry.lookup(group, service)?;

        let dropped = params.keys().filter(|k| !template.declares(k)).count();
        if dropped > 0 {
            debug!(dropped, "Ignoring undeclared request fields");
        }

        let body = self.renderer.render(group, service, template, params)?;
        let raw = self
            .dispatcher
            .dispatch(template, body, &self.forwarded_headers(inbound))
            .await?;
        let document = normalize::to_structured(raw.as_bytes())?;

        info!(group = %group, service = %service, "Upstream response normalized");
        Ok(self.filter.filter(service, document).await)
    }

    /// Inbound headers on the forwarding allow-list.
    pub fn forwarded_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut forwarded = HeaderMap::new();
        for name in &self.forward_headers {
            for value in inbound.get_all(name) {
                forwarded.append(name.clone(), value.clone());
            }
        }
        forwarded
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}
