use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info};

use super::{failure_message, register, wait_for_run, DriverError, WorkloadError};
use crate::{
    config::BenchConfig,
    protocol::{ControllerClient, Message},
    registry::Status,
};

/// The billing batch run by the phone bill worker
#[async_trait]
pub trait BatchJob: Send + Sync {
    /// Run the whole batch
    async fn execute(&self, config: &BenchConfig) -> Result<(), WorkloadError>;

    /// Ask a running batch to end early
    fn abort(&self);

    /// Progress text, reported whenever it changes
    fn status(&self) -> String;

    /// Text reported once the batch finished
    fn final_message(&self) -> String;
}

/// Drive the phone bill worker: register, wait to be started, run `job` while reporting its
/// progress and report the outcome.
///
/// The batch runs no online apps of its own, a STOP from the controller aborts the job.
pub async fn run_phone_bill<R, W>(
    mut client: ControllerClient<R, W>,
    job: Arc<dyn BatchJob>,
) -> Result<(), DriverError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let config = register(&mut client, Message::InitPhoneBill)
        .await?
        .without_online_apps();
    if !wait_for_run(&client).await? {
        return Ok(());
    }
    client
        .update_status(Status::Running, "Initializing.")
        .await?;

    let handle = {
        let job = Arc::clone(&job);
        tokio::spawn(async move { job.execute(&config).await })
    };
    let mut reported = String::new();
    while !handle.is_finished() {
        if client.poll(&[Message::RequestStop]).await? == Message::RequestStop {
            info!("Stop requested by controller, aborting phone bill");
            job.abort();
        }
        tokio::time::sleep(client.polling_interval()).await;
        let status = job.status();
        if status != reported {
            client.update_status(Status::Running, &status).await?;
            reported = status;
        }
    }
    let result = match handle.await {
        Ok(result) => result,
        Err(e) => Err(WorkloadError::Panicked(e.to_string())),
    };
    client.notify(Message::EndPhoneBill, &[]).await?;

    match result {
        Ok(()) => {
            client
                .update_status(Status::Success, &job.final_message())
                .await?;
            info!("Phone bill client finished successfully");
            client.close().await?;
            Ok(())
        }
        Err(e) => {
            client
                .update_status(Status::Fail, &failure_message(&e))
                .await?;
            error!(error = %e, "Phone bill client finished with an error");
            client.close().await?;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        registry::ClientType,
        testing::{fast_config, TestCluster},
        worker::{run_command, run_online_app, SyntheticBilling, SyntheticWorkloads},
    };

    #[tokio::test]
    async fn runs_to_completion() {
        let cluster = TestCluster::start(fast_config()).await;
        let client = cluster.connect().await;
        let job = Arc::new(SyntheticBilling::new(5, Duration::from_millis(5)));
        let driver = tokio::spawn(run_phone_bill(client, job));

        cluster.wait_for(ClientType::Batch, Status::Ready).await;
        run_command(cluster.addr, Message::StartExecution).await.unwrap();
        driver.await.unwrap().unwrap();

        let info = cluster.wait_for(ClientType::Batch, Status::Success).await;
        assert_eq!(info.last_message(), "Finished 5 steps.");
    }

    #[tokio::test]
    async fn stop_aborts_job() {
        let cluster = TestCluster::start(fast_config()).await;
        let client = cluster.connect().await;
        let job = Arc::new(SyntheticBilling::new(100_000, Duration::from_millis(1)));
        let driver = tokio::spawn(run_phone_bill(client, job));

        cluster.wait_for(ClientType::Batch, Status::Ready).await;
        run_command(cluster.addr, Message::StartExecution).await.unwrap();
        cluster.wait_for(ClientType::Batch, Status::Running).await;
        cluster.controller.registry().shutdown();
        driver.await.unwrap().unwrap();

        let info = cluster.wait_for(ClientType::Batch, Status::Success).await;
        assert!(info.last_message().starts_with("Aborted after "));
    }

    /// The end of the batch stops the online apps, and a new batch may register afterwards
    #[tokio::test]
    async fn batch_end_stops_online_apps() {
        let cluster = TestCluster::start(fast_config()).await;
        let online_client = cluster.connect().await;
        let online =
            tokio::spawn(async move { run_online_app(online_client, &SyntheticWorkloads).await });
        let batch_client = cluster.connect().await;
        let job = Arc::new(SyntheticBilling::new(3, Duration::from_millis(5)));
        let batch = tokio::spawn(run_phone_bill(batch_client, job));

        cluster.wait_for(ClientType::OnlineApp, Status::Ready).await;
        cluster.wait_for(ClientType::Batch, Status::Ready).await;
        let reply = run_command(cluster.addr, Message::StartExecution).await.unwrap();
        assert_eq!(reply.len(), 2);

        batch.await.unwrap().unwrap();
        online.await.unwrap().unwrap();
        cluster.wait_for(ClientType::OnlineApp, Status::Success).await;

        tokio::time::timeout(Duration::from_secs(10), async {
            while cluster.controller.registry().batch_alive() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        let again = cluster.connect().await;
        again.request(Message::InitPhoneBill, &[]).await.unwrap();
    }
}
