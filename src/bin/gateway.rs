use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wazira_gateway::config::{API_KEY_ENV, DEFAULT_API_KEY};
use wazira_gateway::{load_config, server, ConfigFormat, Gateway, GatewayConfig};

#[derive(Parser, Debug)]
#[command(name = "wazira-gateway", about = "Privacy-preserving query gateway")]
struct Args {
    /// TOML or YAML config file. Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ConfigFormat::Auto)]
    config_format: ConfigFormat,

    /// Overrides `server.bind`.
    #[arg(long)]
    bind: Option<SocketAddr>,

    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = match &args.config {
        Some(path) => load_config(path, args.config_format)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    config.validate().context("invalid configuration")?;

    if config.auth.uses_default_key() {
        tracing::warn!(
            "api key is the built-in default {DEFAULT_API_KEY:?}; set {API_KEY_ENV} or auth.api-key"
        );
    }

    let bind = config.server.bind;
    let prune_every = Duration::from_secs(config.rate_limit.prune_interval_secs);
    let gateway = Gateway::builder(config)
        .build()
        .context("building gateway")?;
    server::serve(Arc::new(gateway), bind, prune_every)
        .await
        .context("serving http")?;
    Ok(())
}
