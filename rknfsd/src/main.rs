mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use log::{error, info};
use rknfsd::config::{Config, load_config};
use rknfsd::server::init_crypto;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();
    init_crypto();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { config, addr, root } => {
            let mut cfg = match config {
                Some(path) => load_config(&path)?,
                None => Config::default(),
            };
            if let Some(addr) = addr {
                cfg.addr = addr;
            }
            if let Some(root) = root {
                cfg.root = root;
            }

            let shutdown = CancellationToken::new();
            let token = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received Ctrl+C, shutting down...");
                        token.cancel();
                    }
                    Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
                }
            });

            rknfsd::run(cfg, shutdown).await?;
            info!("Exiting cleanly...");
        }
    }
    Ok(())
}
