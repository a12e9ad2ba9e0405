use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pwa_push_relay::{
    cfg::Config,
    notification::{
        keys::{self, KeyProvider, VapidKeys},
        store::MemoryStore,
        svc::{Dispatcher, WebPushSender},
    },
    server::{AppState, Server},
};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pwa-push-relay")]
#[command(about = "Web Push relay for the PWA")]
#[command(version)]
struct Args {
    /// Write a fresh VAPID key pair to VAPID_FILE and exit
    #[arg(long)]
    generate_keys: bool,

    /// Replace an existing key file when generating
    #[arg(long, requires = "generate_keys")]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("load config")?;
    if args.generate_keys {
        let generated = VapidKeys::generate();
        keys::write_key_file(&config.vapid_file, &generated, args.force)?;
        info!(
            file = %config.vapid_file.display(),
            public_key = %generated.public_key,
            "VAPID keys generated"
        );
        return Ok(());
    }

    let keys = Arc::new(KeyProvider::load(&config));
    if !keys.is_configured() {
        warn!("Starting without VAPID keys, /sendNotification will answer 500");
    }
    let sender = WebPushSender::new(config.push_ttl).context("init push client")?;
    let dispatcher = Dispatcher::new(Arc::new(MemoryStore::new()), keys, Arc::new(sender));
    let state = Arc::new(AppState { dispatcher });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
        }
        let _ = shutdown_tx.send(());
    });

    Server::start(&config.bind_addr(), state, shutdown_rx).await
}
