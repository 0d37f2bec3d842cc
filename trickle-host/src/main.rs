//! Trickle host entry point.
//!
//! ```text
//! trickle-host                     Serve with trickle-host.toml (or defaults)
//! trickle-host --config <path>     Load a custom config TOML
//! trickle-host --listen <addr:port> Override the listen address
//! trickle-host --gen-config        Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trickle_host::config::HostConfig;
use trickle_host::input::LoggingInputSink;
use trickle_host::service::HostService;
use trickle_host::source::PatternSource;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "trickle-host", about = "Trickle screen streaming host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "trickle-host.toml")]
    config: PathBuf,

    /// Listen address, overriding the config file.
    #[arg(short, long)]
    listen: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = HostConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = cli.listen.unwrap_or_else(|| config.bind_addr());
    let (width, height) = config.screen_size();

    info!("trickle-host v{}", env!("CARGO_PKG_VERSION"));
    info!("screen: {width}x{height}, block size {}", config.screen.block_size);
    info!("max sessions: {}", config.network.max_sessions);
    if config.auth.password.is_empty() {
        warn!("no password configured; any viewer that knows the protocol can log in");
    }

    let listener = TcpListener::bind(&addr).await?;
    let service = HostService::new(
        config,
        Arc::new(PatternSource::new(width, height)),
        Arc::new(LoggingInputSink::new()),
    );
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.serve(listener).await?;
    Ok(())
}
