use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

use indexmap::IndexMap;
use tracing::info;

use super::{
    ClientId, ClientInfo, ClientType, PendingRequest, RegistrationError, Status, StatusChange,
    StatusError,
};

/// All workers which ever registered with the controller, including those which already ended.
///
/// There is no lock around the whole registry: the map lock is only held to insert a client or
/// to copy out the current set of clients, all per client state lives in [ClientInfo].
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<IndexMap<ClientId, Arc<ClientInfo>>>,
    next_id: AtomicU64,
    /// Admission flag for the single batch worker
    batch_alive: AtomicBool,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new worker. At most one batch worker is admitted at a time.
    pub fn register(
        &self,
        client_type: ClientType,
        node: String,
    ) -> Result<Arc<ClientInfo>, RegistrationError> {
        match client_type {
            ClientType::CommandLine => return Err(RegistrationError::NotAWorker(client_type)),
            ClientType::Batch => {
                if self
                    .batch_alive
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return Err(RegistrationError::BatchAlreadyConnected);
                }
            }
            ClientType::OnlineApp => (),
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(ClientInfo::new(id, client_type, node));
        #[allow(clippy::unwrap_used)]
        self.clients
            .lock()
            .unwrap()
            .insert(id, Arc::clone(&client));
        info!(client = id, %client_type, node = client.node(), "Registered client");
        Ok(client)
    }

    /// The connection of `client` is gone, a batch client gives up its admission
    pub fn release(&self, client: &ClientInfo) {
        if client.client_type() == ClientType::Batch {
            self.batch_alive.store(false, Ordering::Release);
        }
    }

    /// True while a batch worker is connected
    pub fn batch_alive(&self) -> bool {
        self.batch_alive.load(Ordering::Acquire)
    }

    /// Copy of the current set of clients in registration order
    pub fn snapshot(&self) -> Vec<Arc<ClientInfo>> {
        #[allow(clippy::unwrap_used)]
        self.clients.lock().unwrap().values().cloned().collect()
    }

    /// Number of clients ever registered
    pub fn len(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        self.clients.lock().unwrap().len()
    }

    /// True if no client ever registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a status reported by `client`
    pub fn update_status(
        &self,
        client: &ClientInfo,
        status: Status,
        message: String,
    ) -> Result<StatusChange, StatusError> {
        let change = client.update_status(status, message)?;
        self.on_status_change(client, change);
        Ok(change)
    }

    /// The connection to `client` was lost
    pub fn mark_down(&self, client: &ClientInfo, message: String) -> Option<StatusChange> {
        let change = client.mark_down(message)?;
        self.on_status_change(client, change);
        Some(change)
    }

    fn on_status_change(&self, client: &ClientInfo, change: StatusChange) {
        if client.client_type() == ClientType::Batch && change.is_end() {
            info!(status = %change.to, "Batch client ended, stopping online apps");
            self.stop_online_apps();
        }
    }

    /// Ask every online app to stop
    pub fn stop_online_apps(&self) -> Vec<Arc<ClientInfo>> {
        self.snapshot()
            .into_iter()
            .filter(|c| c.client_type() == ClientType::OnlineApp)
            .filter(|c| c.request_stop(PendingRequest::Stop))
            .collect()
    }

    /// Hand a run request to every READY client, returns the clients which got one
    pub fn start_execution(&self) -> Vec<Arc<ClientInfo>> {
        self.snapshot()
            .into_iter()
            .filter(|c| c.request_run())
            .collect()
    }

    /// Ask every client which has not ended to stop, returns the clients which were asked
    pub fn shutdown(&self) -> Vec<Arc<ClientInfo>> {
        self.snapshot()
            .into_iter()
            .filter(|c| c.request_stop(PendingRequest::Shutdown))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;

    fn register_ready(registry: &ClientRegistry, client_type: ClientType) -> Arc<ClientInfo> {
        let client = registry.register(client_type, "node".into()).unwrap();
        registry
            .update_status(&client, Status::Ready, "Waiting.".into())
            .unwrap();
        client
    }

    #[test]
    fn command_line_is_not_registered() {
        let registry = ClientRegistry::new();
        assert_eq!(
            registry
                .register(ClientType::CommandLine, "node".into())
                .unwrap_err(),
            RegistrationError::NotAWorker(ClientType::CommandLine)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn single_batch_admission() {
        let registry = ClientRegistry::new();
        let batch = registry.register(ClientType::Batch, "a".into()).unwrap();
        assert_eq!(
            registry.register(ClientType::Batch, "b".into()).unwrap_err(),
            RegistrationError::BatchAlreadyConnected
        );
        // online apps are not affected
        registry.register(ClientType::OnlineApp, "c".into()).unwrap();

        registry.release(&batch);
        assert!(!registry.batch_alive());
        registry.register(ClientType::Batch, "d".into()).unwrap();
        assert_eq!(registry.len(), 3);
    }

    /// Two racing batch registrations yield one success and one failure
    #[test]
    fn concurrent_batch_registration() {
        for _ in 0..50 {
            let registry = Arc::new(ClientRegistry::new());
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|i| {
                    let registry = Arc::clone(&registry);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        registry.register(ClientType::Batch, format!("node-{i}"))
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(RegistrationError::BatchAlreadyConnected))));
            assert_eq!(registry.len(), 1);
        }
    }

    #[test]
    fn start_execution_targets_ready_clients() {
        let registry = ClientRegistry::new();
        let ready = register_ready(&registry, ClientType::OnlineApp);
        let initializing = registry.register(ClientType::OnlineApp, "x".into()).unwrap();

        let started = registry.start_execution();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].id(), ready.id());
        assert_eq!(initializing.pending_request(), PendingRequest::None);

        // repeated start does not queue a second run
        assert!(registry.start_execution().is_empty());
    }

    #[test]
    fn shutdown_skips_ended_clients() {
        let registry = ClientRegistry::new();
        let running = register_ready(&registry, ClientType::OnlineApp);
        let ended = register_ready(&registry, ClientType::OnlineApp);
        registry
            .update_status(&ended, Status::Success, "done".into())
            .unwrap();

        let stopped = registry.shutdown();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].id(), running.id());
        assert_eq!(running.pending_request(), PendingRequest::Shutdown);
    }

    #[test]
    fn batch_end_stops_online_apps() {
        let registry = ClientRegistry::new();
        let online = register_ready(&registry, ClientType::OnlineApp);
        let batch = register_ready(&registry, ClientType::Batch);

        registry
            .update_status(&batch, Status::Running, "Initializing.".into())
            .unwrap();
        assert_eq!(online.pending_request(), PendingRequest::None);

        registry
            .update_status(&batch, Status::Success, "Finished.".into())
            .unwrap();
        assert_eq!(online.pending_request(), PendingRequest::Stop);
        assert_eq!(batch.pending_request(), PendingRequest::None);
    }

    #[test]
    fn lost_batch_stops_online_apps() {
        let registry = ClientRegistry::new();
        let online = register_ready(&registry, ClientType::OnlineApp);
        let batch = register_ready(&registry, ClientType::Batch);
        registry.mark_down(&batch, "lost".into());
        assert_eq!(online.pending_request(), PendingRequest::Stop);
        assert_eq!(batch.status(), Status::Down);
    }

    #[test]
    fn ended_clients_stay_visible() {
        let registry = ClientRegistry::new();
        let client = register_ready(&registry, ClientType::OnlineApp);
        registry.mark_down(&client, "lost".into());
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status(), Status::Down);
    }
}
