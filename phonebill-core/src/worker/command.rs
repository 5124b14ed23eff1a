use tokio::net::ToSocketAddrs;
use tracing::debug;

use super::DriverError;
use crate::protocol::{ControllerClient, Message};

/// Requests a control client may send
pub const COMMANDS: [Message; 3] = [
    Message::GetClusterStatus,
    Message::StartExecution,
    Message::ShutdownCluster,
];

/// Send one control request to the controller at `addr` and return the reply lines
pub async fn run_command(
    addr: impl ToSocketAddrs,
    message: Message,
) -> Result<Vec<String>, DriverError> {
    if !COMMANDS.contains(&message) {
        return Err(DriverError::NotACommand(message));
    }
    let client = ControllerClient::connect(addr).await?;
    let reply = client.request(message, &[]).await?;
    debug!(%message, lines = reply.len(), "Command answered");
    client.close().await?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_config, TestCluster};

    #[tokio::test]
    async fn rejects_worker_messages() {
        let err = run_command("127.0.0.1:1", Message::GetNewBlock)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NotACommand(Message::GetNewBlock)));
    }

    #[tokio::test]
    async fn commands_on_empty_cluster() {
        let cluster = TestCluster::start(fast_config()).await;
        let reply = run_command(cluster.addr, Message::StartExecution)
            .await
            .unwrap();
        assert_eq!(
            reply,
            vec!["Failed to start execution because no clients are ready to run.".to_string()]
        );

        let report = run_command(cluster.addr, Message::GetClusterStatus)
            .await
            .unwrap();
        assert_eq!(report.len(), 3);
        assert!(report[1].starts_with("Start "));

        let reply = run_command(cluster.addr, Message::ShutdownCluster)
            .await
            .unwrap();
        assert!(reply.is_empty());
    }
}
