//! Worker side of the cluster: the processes driven by the controller.
//!
//! The drivers only speak the protocol, the actual work is plugged in through
//! [OnlineWorkload]/[WorkloadFactory] for online apps and [BatchJob] for the billing batch.
mod batch;
mod command;
mod online;
mod synthetic;

pub use batch::{run_phone_bill, BatchJob};
pub use command::{run_command, COMMANDS};
pub use online::{run_online_app, status_line, OnlineWorkload, WorkloadFactory};
pub use synthetic::{
    pick_active_block, ContractInserter, HistoryReader, SyntheticBilling, SyntheticWorkloads,
};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::{
    blocks::BlockAccessError,
    config::{BenchConfig, ConfigError},
    protocol::{ControllerClient, Message, ProtocolError},
    registry::Status,
};

/// Failure of a workload or batch job
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// Accessing contract blocks failed
    #[error(transparent)]
    Blocks(#[from] BlockAccessError),
    /// The work itself failed
    #[error("{0}")]
    Failed(String),
    /// The task running the work panicked
    #[error("Workload panicked: {0}")]
    Panicked(String),
}

/// Errors ending a driver
#[derive(Debug, Error)]
pub enum DriverError {
    /// Talking to the controller failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The benchmark configuration sent by the controller is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The work failed, the failure was reported to the controller
    #[error(transparent)]
    Workload(#[from] WorkloadError),
    /// Only control requests can be sent as a command
    #[error("{0} is not a control command")]
    NotACommand(Message),
}

/// Register with the controller and apply the polling interval of the returned configuration
async fn register<R, W>(
    client: &mut ControllerClient<R, W>,
    message: Message,
) -> Result<BenchConfig, DriverError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let body = client.request(message, &[]).await?;
    let config = BenchConfig::from_body(&body)?;
    client.set_polling_interval(config.polling_interval());
    info!(%message, "Registered with controller");
    Ok(config)
}

/// Report READY and wait for the controller. Returns false if the worker was stopped before it
/// ran.
async fn wait_for_run<R, W>(client: &ControllerClient<R, W>) -> Result<bool, DriverError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    client.update_status(Status::Ready, "Waiting.").await?;
    let command = client
        .wait_for_command(&[Message::RequestRun, Message::RequestStop])
        .await?;
    if command == Message::RequestStop {
        info!("Stopped before running");
        client
            .update_status(Status::Running, "Aborted before running.")
            .await?;
        client.close().await?;
        return Ok(false);
    }
    Ok(true)
}

/// Status text reported for a failed worker
fn failure_message(error: &WorkloadError) -> String {
    format!("Aborted with exception: {error}")
}
