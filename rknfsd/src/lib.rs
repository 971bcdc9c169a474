pub mod config;
pub mod handlers;
pub mod localfs;
pub mod optimizer;
pub mod resolver;
pub mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use common::WriteVerifier;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::handlers::NfsService;
use crate::optimizer::BatchWriteOptimizer;
use crate::resolver::PathResolver;
use crate::server::NfsServer;

/// Builds the service stack for `cfg`: resolver, optimizer and handlers
/// sharing one verifier.
pub fn build_service(cfg: &Config, verifier: WriteVerifier) -> Arc<NfsService> {
    let resolver = Arc::new(PathResolver::new(cfg.root.clone()));
    let optimizer = Arc::new(BatchWriteOptimizer::new(
        resolver.clone(),
        cfg.flush.batch_size,
    ));
    Arc::new(NfsService::new(resolver, optimizer, verifier))
}

/// Serves `cfg` until `shutdown` fires, then stops the flusher, which drains
/// every queued write to disk before this returns.
pub async fn run(cfg: Config, shutdown: CancellationToken) -> Result<()> {
    cfg.validate()?;
    std::fs::create_dir_all(&cfg.root)
        .with_context(|| format!("Failed to create root {}", cfg.root.display()))?;

    let verifier = WriteVerifier::from_start_time();
    let service = build_service(&cfg, verifier);

    let flusher_cancel = CancellationToken::new();
    let flusher = service
        .optimizer()
        .clone()
        .spawn_flusher(cfg.flush.interval(), flusher_cancel.clone());

    let server = NfsServer::bind(cfg.socket_addr()?, service)?;
    info!(
        "[rknfsd] (verifier: {verifier}) listening on {}",
        server.local_addr()?
    );
    let result = server.run(shutdown).await;

    flusher_cancel.cancel();
    flusher.await.context("batch flusher panicked")?;
    result
}
