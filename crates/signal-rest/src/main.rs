use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use signal_rest::backend::SignalCli;
use signal_rest::config::Config;
use signal_rest::gateway::Gateway;
use signal_rest::logging::LogControl;
use signal_rest::server::{self, AppState};

/// REST gateway in front of signal-cli.
#[derive(Parser, Debug)]
#[command(name = "signal-rest", version, about, long_about = None)]
struct Cli {
    /// Path to the YAML config file. A missing file means defaults.
    #[arg(long, default_value = "signal-rest.yaml")]
    config: PathBuf,

    /// signal-cli configuration root.
    #[arg(long)]
    signal_cli_config: Option<PathBuf>,

    /// Staging directory for outgoing attachments.
    #[arg(long)]
    attachment_tmp_dir: Option<PathBuf>,

    /// Staging directory for profile avatars.
    #[arg(long)]
    avatar_tmp_dir: Option<PathBuf>,

    #[arg(long, env = "PORT")]
    port: Option<u16>,

    #[arg(long)]
    host: Option<String>,

    /// signal-cli executable.
    #[arg(long)]
    signal_cli_binary: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(dir) = self.signal_cli_config {
            config.signal_cli.config_dir = dir;
        }
        if let Some(dir) = self.attachment_tmp_dir {
            config.attachment_tmp_dir = dir;
        }
        if let Some(dir) = self.avatar_tmp_dir {
            config.avatar_tmp_dir = dir;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(binary) = self.signal_cli_binary {
            config.signal_cli.binary = binary;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    cli.apply(&mut config);

    let logging = LogControl::init(&config.logging.level)?;
    config.ensure_writable_dirs().await?;

    let backend = Arc::new(SignalCli::new(
        &config.signal_cli.binary,
        &config.signal_cli.config_dir,
    ));
    let gateway = Arc::new(Gateway::from_config(&config, backend));
    let app = server::build_app(AppState { gateway, logging }, &config.server);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "signal-rest listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("signal-rest stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
