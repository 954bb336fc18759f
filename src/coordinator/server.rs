//! Config node server

use crate::common::{Config, Result};
use crate::coordinator::http::create_router;
use crate::coordinator::manager::MetadataCoordinator;
use crate::coordinator::raft_node::{ConsensusGateway, RaftNode};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct Coordinator {
    config: Config,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Open the command log, replay it, and serve HTTP until ctrl-c.
    pub async fn serve(self) -> Result<()> {
        let cfg = &self.config.coordinator;
        tracing::info!("Starting config node: {}", cfg.node_id);
        tracing::info!("  HTTP API: {}", cfg.bind_addr);
        tracing::info!("  Data dir: {}", cfg.data_dir.display());
        tracing::info!(
            "  Replication: schema={} data={}",
            self.config.defaults.schema_replication_factor,
            self.config.defaults.data_replication_factor
        );

        let raft = Arc::new(RaftNode::open(
            cfg,
            self.config.defaults.clone(),
            &self.config.security,
        )?);
        let coordinator = Arc::new(MetadataCoordinator::new(raft.clone(), &self.config)?);

        let router = create_router(coordinator).layer(TraceLayer::new_for_http());
        let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;

        tracing::info!(
            "✓ Config node ready ({}, applied index {})",
            raft.role(),
            raft.applied_index()
        );

        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            tracing::error!("HTTP server error: {}", e);
        }

        raft.sync().await?;
        tracing::info!("Config node {} stopped", cfg.node_id);
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
