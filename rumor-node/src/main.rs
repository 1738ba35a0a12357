// Rumor node: UDP gossip chat and file sharing with a console UI.

mod config;
mod console;
mod transport;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rumor_core::RumorCore;

#[derive(Parser, Debug)]
#[command(about = "Gossip chat and file-sharing node", author, version)]
struct Cli {
    /// Initial peers (host:port)
    peers: Vec<String>,

    /// Relay only our own messages and route announcements
    #[arg(long)]
    noforward: bool,

    /// Fixed UDP port instead of the identity-derived range
    #[arg(long)]
    port: Option<u16>,

    /// Numeric identity selecting the default port range (default: user id)
    #[arg(long)]
    identity: Option<u32>,

    /// Origin name (default: random)
    #[arg(long)]
    origin: Option<String>,

    /// Share a file at startup (repeat flag for multiple)
    #[arg(long = "share", value_name = "FILE")]
    share: Vec<PathBuf>,

    /// Directory for completed downloads
    #[arg(long, value_name = "DIR")]
    download_dir: Option<PathBuf>,

    /// Tick length in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Config file (default: ~/.config/rumor/config.toml, then /etc/rumor/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(self, c: &mut config::Config) {
        if self.noforward {
            c.forwarding = false;
        }
        if self.port.is_some() {
            c.port = self.port;
        }
        if self.identity.is_some() {
            c.identity = self.identity;
        }
        if self.origin.is_some() {
            c.origin = self.origin;
        }
        if let Some(dir) = self.download_dir {
            c.download_dir = dir;
        }
        if let Some(ms) = self.tick_ms {
            c.tick_ms = ms;
        }
        c.peers.extend(self.peers);
        c.share.extend(self.share);
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    cli.apply(&mut cfg);

    let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let core = RumorCore::new(cfg.core_config()).context("invalid origin")?;
    let (socket, port) = transport::bind(&cfg.candidate_ports()).await?;
    tracing::info!(origin = core.origin(), port, forwarding = cfg.forwarding, "listening");
    console::notice(format_args!("you are {} on port {port}", core.origin()));

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = console::read_commands(tx).await {
            tracing::warn!(error = %e, "console input failed");
        }
    });
    transport::run(core, socket, port, &cfg, rx, shutdown_signal()).await
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
            )
            .try_init();
    });
}
