//! Helpers to run a controller and its workers inside one test
use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{net::TcpListener, task::JoinHandle};

use crate::{
    blocks::BlockAllocator,
    config::BenchConfig,
    protocol::ControllerClient,
    registry::{ClientInfo, ClientType, Status},
    Controller,
};

/// A controller serving on a loopback port
pub(crate) struct TestCluster {
    pub(crate) controller: Controller,
    pub(crate) addr: SocketAddr,
    server: JoinHandle<()>,
}

/// Benchmark settings with fast polling and no online apps
pub(crate) fn fast_config() -> BenchConfig {
    BenchConfig::builder()
        .polling_interval_ms(2)
        .master_update_thread_count(0)
        .master_delete_insert_thread_count(0)
        .history_update_thread_count(0)
        .history_insert_thread_count(0)
        .build()
}

impl TestCluster {
    pub(crate) async fn start(config: BenchConfig) -> Self {
        // several tests share the global subscriber
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let controller = Controller::new(config, BlockAllocator::new(), Duration::from_secs(1));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.serve(listener).await })
        };
        Self {
            controller,
            addr,
            server,
        }
    }

    pub(crate) async fn connect(&self) -> ControllerClient {
        ControllerClient::connect(self.addr).await.unwrap()
    }

    /// Wait until a client of `client_type` reports `status`
    pub(crate) async fn wait_for(&self, client_type: ClientType, status: Status) -> Arc<ClientInfo> {
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let found = self
                    .controller
                    .clients()
                    .into_iter()
                    .find(|c| c.client_type() == client_type && c.status() == status);
                if let Some(client) = found {
                    return client;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        match found {
            Ok(client) => client,
            Err(_) => panic!("no {client_type} client reached {status}"),
        }
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.server.abort();
    }
}
