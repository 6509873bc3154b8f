//! X-Road Template Gateway
//!
//! Exposes SOAP services reachable through an X-Road security server as a
//! REST/JSON API. Each service is described by a template file; a call
//! renders the template with the caller's parameters, sends it upstream,
//! converts the XML response to JSON and applies a per-service field policy.
//!
//! # Features
//!
//! - Template registry loaded once at startup (fail-fast)
//! - Strict rendering with builtin X-Road identity variables
//! - Mutual TLS to the security server from PKCS#12 key material
//! - Hardened XML normalization (no DTDs, no entity expansion)
//! - Field selection and masking driven by an external policy source
//! - Uniform response envelope with trace ids
//!
//! # Example
//!
//! ```ignore
//! use xtr_gateway::{Gateway, GatewayConfig, TemplateRegistry};
//!
//! let registry = TemplateRegistry::load(&config.templates)?;
//! let gateway = Arc::new(Gateway::new(&config, registry)?);
//! let app = xtr_gateway::server::build_app(gateway, config.server.body_limit_bytes);
//! axum::serve(listener, app).await?;
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod normalize;
pub mod openapi;
pub mod redact;
pub mod registry;
pub mod render;
pub mod response;
pub mod server;
pub mod template;
pub mod tls;
pub mod transport;

pub use config::GatewayConfig;
pub use error::{ErrorCode, GatewayError};
pub use gateway::Gateway;
pub use registry::TemplateRegistry;
pub use response::ApiResponse;
