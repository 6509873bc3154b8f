//! X-Road Template Gateway binary.
//!
//! Run with: `xtr-gateway --config config.yaml`

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use xtr_gateway::server::build_app;
use xtr_gateway::{Gateway, GatewayConfig, TemplateRegistry};

/// REST/JSON gateway for X-Road SOAP services.
///
/// Loads service templates at startup and serves one endpoint per template,
/// forwarding calls to the security server or directly to the service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listen address, overrides server.listen
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Keystore password, overrides tls.keystore_password
    #[arg(long, env = "XTR_KEYSTORE_PASSWORD", hide_env_values = true)]
    keystore_password: Option<String>,

    /// Trust store password, overrides tls.truststore_password
    #[arg(long, env = "XTR_TRUSTSTORE_PASSWORD", hide_env_values = true)]
    truststore_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting X-Road Template Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    let mut config = if args.config.exists() {
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        GatewayConfig::from_yaml(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        GatewayConfig::default()
    };

    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(password) = args.keystore_password {
        config.tls.keystore_password = password;
    }
    if let Some(password) = args.truststore_password {
        config.tls.truststore_password = Some(password);
    }
    config.validate().context("Invalid configuration")?;

    info!(
        listen = %config.server.listen,
        security_server = %config.security_server.url,
        mutual_tls = config.security_server.is_secure(),
        templates = %config.templates.root.display(),
        policy_source = %config.policy.base_url,
        "Configuration loaded"
    );

    // Serving with a partial registry is never allowed.
    let registry =
        TemplateRegistry::load(&config.templates).context("Failed to load templates")?;
    if registry.is_empty() {
        info!("No templates found; only /api and /health will answer");
    }

    let gateway = Arc::new(Gateway::new(&config, registry).context("Failed to create gateway")?);
    gateway
        .warm_up()
        .await
        .context("Failed to set up the security server channel")?;

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;
    info!("Listening on {}", config.server.listen);

    axum::serve(listener, build_app(gateway, config.server.body_limit_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("X-Road Template Gateway stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
