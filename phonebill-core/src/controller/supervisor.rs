use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{net::TcpListener, task::JoinSet};
use tracing::{error, info, warn};

use super::{dispatch::serve_connection, ClusterState};
use crate::{
    blocks::{ActiveBlockInfo, BlockAllocator, BlockError},
    config::{BenchConfig, ConfigError, ControllerConfig},
    protocol::Connection,
    registry::{ClientInfo, ClientRegistry},
};

/// Errors which stop the controller as a whole
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The listening socket could not be opened
    #[error("Failed to listen on port {port}: {source}")]
    Bind {
        /// requested port
        port: u16,
        /// underlying error
        source: std::io::Error,
    },
    /// The configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The block allocator could not be seeded
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// The controller of a benchmark cluster.
///
/// Accepts connections and runs one dispatch loop per connection until a shutdown is requested.
/// Cloning gives another handle to the same cluster state.
#[derive(Debug, Clone)]
pub struct Controller {
    state: Arc<ClusterState>,
    shutdown_grace: Duration,
}

impl Controller {
    /// Create a controller handing out `bench_config` and blocks from `blocks`
    pub fn new(bench_config: BenchConfig, blocks: BlockAllocator, shutdown_grace: Duration) -> Self {
        Self {
            state: Arc::new(ClusterState::new(bench_config, blocks)),
            shutdown_grace,
        }
    }

    /// Create a controller from its configuration. The allocator is seeded with the contracts
    /// already present in the database.
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ControllerError> {
        let bench_config = config.load_bench_config()?;
        let blocks = BlockAllocator::from_existing_records(
            config.existing_contracts,
            bench_config.contract_block_size(),
        )?;
        Ok(Self::new(bench_config, blocks, config.shutdown_grace()))
    }

    /// Bind the configured port and serve until shutdown
    pub async fn run(config: &ControllerConfig) -> Result<(), ControllerError> {
        let controller = Self::from_config(config)?;
        let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
            .await
            .map_err(|source| ControllerError::Bind {
                port: config.listen_port,
                source,
            })?;
        controller.serve(listener).await;
        Ok(())
    }

    /// Registered workers
    pub fn clients(&self) -> Vec<Arc<ClientInfo>> {
        self.state.registry.snapshot()
    }

    /// The client registry
    pub fn registry(&self) -> &ClientRegistry {
        &self.state.registry
    }

    /// Snapshot of the populated blocks
    pub fn active_block_info(&self) -> ActiveBlockInfo {
        self.state.blocks.active_block_info()
    }

    /// Request a shutdown as if a control client had sent one
    pub fn shutdown(&self) {
        self.state.registry.shutdown();
        self.state.shutdown.send_replace(true);
    }

    /// Accept connections on `listener` until a shutdown is requested.
    ///
    /// After the shutdown request no new connections are accepted. Running connections get the
    /// grace period to finish, the remaining ones are aborted.
    pub async fn serve(&self, listener: TcpListener) {
        let mut shutdown = self.state.shutdown.subscribe();
        let mut tasks = JoinSet::new();
        info!(addr = ?listener.local_addr().ok(), "Controller listening");

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(x) => x,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    tasks.spawn(serve_connection(
                        Arc::clone(&self.state),
                        Connection::from_tcp(stream),
                        peer.ip().to_string(),
                    ));
                }
                _ = shutdown.changed() => (),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            }
        }
        drop(listener);

        info!(running = tasks.len(), grace = ?self.shutdown_grace, "Shutdown requested, waiting for connections");
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
        })
        .await;
        if drained.is_err() {
            warn!(aborted = tasks.len(), "Grace period elapsed, aborting connections");
            tasks.shutdown().await;
            for client in self.state.registry.snapshot() {
                self.state
                    .registry
                    .mark_down(&client, "Controller shut down.".to_string());
            }
        }
        info!("Controller stopped");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Connection task panicked");
        }
    }
}
