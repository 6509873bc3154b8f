//! Outbound dispatch.
//!
//! Templates with a service URI are sent directly to it; all others go to the
//! security server, over mutual TLS when its URL is https. The security
//! server client is built once on first use and shared by all requests.

use crate::config::{GatewayConfig, SecurityServerConfig, TlsConfig};
use crate::error::GatewayError;
use crate::redact::redact;
use crate::template::Template;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::error::Error as StdError;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Default content type for outbound envelopes.
pub const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Where a template's request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// Straight to the service URI
    Direct(&'a str),
    /// Through the configured security server
    SecurityServer,
}

impl<'a> Route<'a> {
    pub fn for_template(template: &'a Template) -> Self {
        match template.service_uri() {
            Some(uri) => Route::Direct(uri),
            None => Route::SecurityServer,
        }
    }
}

/// Sends rendered envelopes upstream.
pub struct Dispatcher {
    security_server: SecurityServerConfig,
    tls: TlsConfig,
    direct_client: reqwest::Client,
    security_server_client: OnceCell<reqwest::Client>,
}

impl Dispatcher {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let direct_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.direct.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            security_server: config.security_server.clone(),
            tls: config.tls.clone(),
            direct_client,
            security_server_client: OnceCell::new(),
        })
    }

    /// Send `body` for `template` and return the raw response text.
    ///
    /// `forwarded` headers override the template's static headers.
    pub async fn dispatch(
        &self,
        template: &Template,
        body: String,
        forwarded: &HeaderMap,
    ) -> Result<String, GatewayError> {
        let headers = outbound_headers(template, forwarded)?;
        let (client, target) = match Route::for_template(template) {
            Route::Direct(uri) => (&self.direct_client, uri),
            Route::SecurityServer => (
                self.security_server_client().await?,
                self.security_server.url.as_str(),
            ),
        };

        info!(
            method = %template.method(),
            target = %target,
            payload_bytes = body.len(),
            "Sending request"
        );
        debug!(payload = %redact(&body), "Outbound payload");

        let response = client
            .request(template.method().into(), target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| classify(&e))?;

        if !status.is_success() {
            warn!(
                target = %target,
                status = status.as_u16(),
                body = %redact(&text),
                "Upstream returned an error status"
            );
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(target = %target, response_bytes = text.len(), "Upstream response received");
        Ok(text)
    }

    /// Build the mutual TLS channel ahead of the first request.
    pub async fn warm_up(&self) -> Result<(), GatewayError> {
        if self.security_server.is_secure() {
            self.security_server_client().await?;
        }
        Ok(())
    }

    /// The security server client, built on first use.
    ///
    /// Concurrent first callers wait on the same initialisation; a failed
    /// build is not cached, so the next call retries it.
    pub async fn security_server_client(&self) -> Result<&reqwest::Client, GatewayError> {
        self.security_server_client
            .get_or_try_init(|| async {
                let timeout = Duration::from_secs(self.security_server.timeout_secs);
                let builder = reqwest::Client::builder().timeout(timeout);

                let builder = if self.security_server.is_secure() {
                    let tls = self.tls.clone();
                    let tls_config =
                        tokio::task::spawn_blocking(move || crate::tls::build_client_config(&tls))
                            .await
                            .map_err(|e| {
                                GatewayError::Internal(format!("TLS setup task failed: {}", e))
                            })??;
                    info!(url = %self.security_server.url, "Mutual TLS channel ready");
                    builder.use_preconfigured_tls(tls_config)
                } else {
                    builder
                };

                builder.build().map_err(|e| {
                    GatewayError::Config(format!("Failed to create security server client: {}", e))
                })
            })
            .await
    }
}

/// Template headers, then forwarded headers, then the XML content type default.
pub fn outbound_headers(
    template: &Template,
    forwarded: &HeaderMap,
) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    for (name, value) in template.headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| GatewayError::Template(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| GatewayError::Template(format!("Invalid value for header {}: {}", name, e)))?;
        headers.insert(name, value);
    }

    for name in forwarded.keys() {
        headers.remove(name);
    }
    for (name, value) in forwarded {
        headers.append(name.clone(), value.clone());
    }

    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
    }
    Ok(headers)
}

/// Map a client error to the gateway taxonomy.
pub fn classify(err: &reqwest::Error) -> GatewayError {
    let detail = describe(err);
    if has_tls_cause(err) {
        GatewayError::Tls(detail)
    } else if err.is_timeout() {
        GatewayError::Timeout(detail)
    } else if err.is_connect() {
        GatewayError::Connection(detail)
    } else if err.is_body() || err.is_decode() {
        GatewayError::MalformedResponse(detail)
    } else if err.is_builder() {
        GatewayError::Internal(detail)
    } else {
        GatewayError::Connection(detail)
    }
}

/// Search the cause tree of `err` for a rustls error.
///
/// hyper wraps handshake failures in nested `io::Error`s whose `source()`
/// skips the payload, so each `io::Error` is opened with `get_ref()` as well.
fn has_tls_cause(err: &(dyn StdError + 'static)) -> bool {
    let mut pending = vec![err];
    while let Some(e) = pending.pop() {
        if e.downcast_ref::<rustls::Error>().is_some() {
            return true;
        }
        if let Some(inner) = e.downcast_ref::<std::io::Error>().and_then(|io| io.get_ref()) {
            pending.push(inner);
        }
        if let Some(source) = e.source() {
            pending.push(source);
        }
    }
    false
}

fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }
    message
}
