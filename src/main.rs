use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use lucy::config::{read_config, validate_config, ConfigError, ProxyConfig};
use lucy::net::Listener;
use lucy::observability::{logging::init_logging, metrics::init_metrics, record::sink_for};
use lucy::{ProxyServer, Shutdown};

#[derive(Parser)]
#[command(name = "lucy")]
#[command(version, about = "Forward HTTP debugging proxy", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "LUCY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "LUCY_PORT")]
    port: Option<u16>,

    /// Outbound request timeout in seconds
    #[arg(long, env = "LUCY_TIMEOUT")]
    timeout: Option<u64>,

    /// Header and request body read timeout in seconds
    #[arg(long, env = "LUCY_SERVER_TIMEOUT")]
    server_timeout: Option<u64>,

    /// Maximum request or response body size in bytes
    #[arg(long, env = "LUCY_MAX_BODY_SIZE")]
    max_body_size: Option<u64>,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// File values (or defaults) with command-line values on top.
    fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(secs) = self.timeout {
            config.timeouts.request_secs = secs;
        }
        if let Some(secs) = self.server_timeout {
            config.timeouts.server_secs = secs;
        }
        if let Some(bytes) = self.max_body_size {
            config.limits.max_body_size = bytes;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.into_config()?;
    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address(),
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        server_timeout_secs = config.timeouts.server_secs,
        max_body_size = config.limits.max_body_size,
        "lucy starting"
    );

    if config.observability.metrics_enabled {
        init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let sink = sink_for(config.observability.traffic_output);
    let listener = Listener::bind(&config.listener).await?;
    let server = ProxyServer::new(config, sink);

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    shutdown.trigger_on_signal();

    server.run(listener, shutdown_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
