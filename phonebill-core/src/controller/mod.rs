//! The controller process: one dispatch loop per connection around shared cluster state.
//!
//! ```text
//! TcpListener ──accept──▶ dispatch loop ──▶ handler table ──▶ ClientRegistry
//!                              ▲   │                      └─▶ BlockAllocator
//!                              └───┘ reply
//! ```
mod dispatch;
mod handlers;
mod report;
mod session;
mod supervisor;

pub use report::cluster_status;
pub use supervisor::{Controller, ControllerError};

use thiserror::Error;
use tokio::sync::watch;

use crate::{
    blocks::{BlockAllocator, BlockError},
    config::{BenchConfig, ConfigError},
    protocol::{Message, ProtocolError},
    registry::{ClientRegistry, RegistrationError, StatusError},
};

/// State shared by all dispatch loops of one controller
#[derive(Debug)]
pub(crate) struct ClusterState {
    pub(crate) registry: ClientRegistry,
    pub(crate) blocks: BlockAllocator,
    pub(crate) bench_config: BenchConfig,
    /// Raised once a shutdown was requested
    pub(crate) shutdown: watch::Sender<bool>,
}

impl ClusterState {
    pub(crate) fn new(bench_config: BenchConfig, blocks: BlockAllocator) -> Self {
        Self {
            registry: ClientRegistry::new(),
            blocks,
            bench_config,
            shutdown: watch::Sender::new(false),
        }
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Errors ending a dispatch loop. They only ever affect the connection they occurred on.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Reading or writing the connection failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// No handler is defined for the received message
    #[error("Protocol error, bad message: {0}")]
    NoHandler(Message),
    /// A worker message arrived on a connection without a registered worker
    #[error("Protocol error, {0} requires a registered worker")]
    NotRegistered(Message),
    /// A registration arrived on a connection which is already identified
    #[error("Protocol error, {0} on an already identified connection")]
    AlreadyIdentified(Message),
    /// The registration was refused
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// A status report was refused
    #[error(transparent)]
    Status(#[from] StatusError),
    /// A block operation was refused
    #[error(transparent)]
    Block(#[from] BlockError),
    /// The benchmark configuration could not be serialized
    #[error(transparent)]
    Config(#[from] ConfigError),
}
