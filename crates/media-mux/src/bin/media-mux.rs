//! media-mux - single-port STUN/DTLS/SRTP dispatcher
//!
//! Relays DTLS to a remote key server and SRTP between peers until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use rvoip_media_mux::logging::{parse_log_level, setup_logging, LoggingConfig};
use rvoip_media_mux::{DispatcherConfig, MediaDispatcher, UdpForwarder};

#[derive(Parser, Debug)]
#[command(name = "media-mux")]
#[command(about = "Single-socket DTLS/SRTP/STUN media dispatcher")]
#[command(version)]
pub struct Args {
    /// UDP port shared by all peers
    #[arg(short, long, default_value = "5004")]
    pub port: u16,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,

    /// Key-distribution server receiving the DTLS traffic
    #[arg(short, long, default_value = "127.0.0.1:4433")]
    pub key_server: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = parse_log_level(&args.log_level)?;
    setup_logging(LoggingConfig::new(level).with_json(args.json))?;

    let config = match &args.config {
        Some(path) => DispatcherConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DispatcherConfig::default(),
    };

    let forwarder = UdpForwarder::connect(args.key_server.as_str())
        .await
        .with_context(|| format!("resolving key server {}", args.key_server))?;

    let idle_timeout = config.idle_timeout();
    let dispatcher = MediaDispatcher::new(config, Arc::new(forwarder.clone()))?;
    forwarder.set_distributor(Arc::new(dispatcher.clone()));

    dispatcher.listen(args.port).await?;
    info!("Key server: {}", forwarder.server_addr());
    info!("SRTP policy: {:?}", dispatcher.config().srtp_policy);

    // Relay sessions follow the same idle timeout as the peers
    let reaper = idle_timeout.map(|max_idle| {
        let forwarder = forwarder.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(max_idle);
            loop {
                ticker.tick().await;
                forwarder.close_idle(max_idle).await;
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down");

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    dispatcher.stop().await;
    forwarder.stop().await;

    Ok(())
}
