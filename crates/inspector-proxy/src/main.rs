use anyhow::{Context, Result};
use clap::Parser;
use inspector_proxy::{handlers, server, InspectorProxy, ProxyConfig, ReconnectPolicy, Registry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "inspector-proxy",
    version,
    about = "Chrome DevTools Protocol relay for on-device JavaScript runtimes"
)]
struct Cli {
    /// JSON config file; flags below override its fields.
    #[arg(long, env = "INSPECTOR_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the WebSocket listener to.
    #[arg(long, env = "INSPECTOR_PROXY_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Interval between page list polls, in milliseconds.
    #[arg(long, env = "INSPECTOR_PROXY_PAGES_POLL_MS")]
    pages_poll_interval_ms: Option<u64>,

    /// Reject a device whose id is already connected instead of replacing it.
    #[arg(long, env = "INSPECTOR_PROXY_REJECT_DUPLICATES", default_value_t = false)]
    reject_duplicates: bool,

    /// CDP method to answer locally with an empty result. Repeatable.
    #[arg(long = "stub-method", env = "INSPECTOR_PROXY_STUB_METHODS", value_delimiter = ',')]
    stub_methods: Vec<String>,

    /// Log every relayed CDP message (needs RUST_LOG=inspector_proxy::cdp=trace).
    #[arg(long, env = "INSPECTOR_PROXY_TRACE_MESSAGES", default_value_t = false)]
    trace_messages: bool,
}

impl TryFrom<Cli> for ProxyConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => ProxyConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ProxyConfig::default(),
        };
        if let Some(listen_addr) = cli.listen_addr {
            config.listen_addr = listen_addr;
        }
        if let Some(interval) = cli.pages_poll_interval_ms {
            config.pages_poll_interval_ms = interval;
        }
        if cli.reject_duplicates {
            config.reconnect_policy = ReconnectPolicy::Reject;
        }
        if !cli.stub_methods.is_empty() {
            config.stub_methods = cli.stub_methods;
        }
        config.trace_messages |= cli.trace_messages;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ProxyConfig::try_from(Cli::parse())?;
    tracing::debug!(?config, "Starting inspector proxy");

    let registry = Arc::new(Registry::new(config.reconnect_policy));
    let proxy = InspectorProxy::new(
        registry,
        handlers::build_factory(config.stub_methods.clone(), config.trace_messages),
    );

    tokio::select! {
        result = server::serve(proxy.clone(), &config) => {
            result.with_context(|| format!("inspector proxy on {} failed", config.listen_addr))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    proxy.shutdown().await;
    Ok(())
}
