use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{ClientId, ClientType, PendingRequest, Status, StatusError};

/// A status transition which was applied to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// status before the change
    pub from: Status,
    /// status after the change
    pub to: Status,
}

impl StatusChange {
    /// True if this change ended the client
    pub fn is_end(&self) -> bool {
        !self.from.is_terminal() && self.to.is_terminal()
    }
}

/// Mutable part of [ClientInfo]
#[derive(Debug)]
struct ClientState {
    status: Status,
    pending: PendingRequest,
    /// A request was handed out and the worker has not reported back since
    processing: bool,
    last_message: String,
}

/// Everything the controller knows about one connected worker.
///
/// Each instance guards its own mutable state, handlers of different connections only contend
/// when they touch the same client.
#[derive(Debug)]
pub struct ClientInfo {
    id: ClientId,
    client_type: ClientType,
    node: String,
    started_at: DateTime<Utc>,
    state: Mutex<ClientState>,
}

impl ClientInfo {
    pub(crate) fn new(id: ClientId, client_type: ClientType, node: String) -> Self {
        Self {
            id,
            client_type,
            node,
            started_at: Utc::now(),
            state: Mutex::new(ClientState {
                status: Status::Initializing,
                pending: PendingRequest::None,
                processing: false,
                last_message: "No message".to_string(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        // critical sections never panic while holding the lock
        #[allow(clippy::unwrap_used)]
        self.state.lock().unwrap()
    }

    /// Id of this client within the registry
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Declared role of this client
    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    /// Peer address of the client connection
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Time of registration
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.state().status
    }

    /// Last free text reported by the worker
    pub fn last_message(&self) -> String {
        self.state().last_message.clone()
    }

    /// Request waiting for the next poll
    pub fn pending_request(&self) -> PendingRequest {
        self.state().pending
    }

    /// Whether a handed out request awaits acknowledgement
    pub fn is_processing(&self) -> bool {
        self.state().processing
    }

    /// Apply a status reported by the worker. A report also acknowledges the request the worker
    /// last received.
    pub fn update_status(
        &self,
        status: Status,
        message: String,
    ) -> Result<StatusChange, StatusError> {
        let mut state = self.state();
        if !state.status.can_transition_to(status) {
            return Err(StatusError::IllegalTransition {
                from: state.status,
                to: status,
            });
        }
        let change = StatusChange {
            from: state.status,
            to: status,
        };
        state.status = status;
        state.last_message = message;
        state.processing = false;
        Ok(change)
    }

    /// The connection was lost. Has no effect on clients which already ended.
    pub fn mark_down(&self, message: String) -> Option<StatusChange> {
        let mut state = self.state();
        if state.status.is_terminal() {
            return None;
        }
        let change = StatusChange {
            from: state.status,
            to: Status::Down,
        };
        state.status = Status::Down;
        state.last_message = message;
        state.pending = PendingRequest::None;
        Some(change)
    }

    /// Place a run request, only succeeds if the client is READY, has nothing pending and no
    /// request in flight
    pub fn request_run(&self) -> bool {
        let mut state = self.state();
        if state.status == Status::Ready
            && state.pending == PendingRequest::None
            && !state.processing
        {
            state.pending = PendingRequest::Run;
            true
        } else {
            false
        }
    }

    /// Place a stop request, replacing anything pending. Ended clients are left alone.
    pub fn request_stop(&self, request: PendingRequest) -> bool {
        debug_assert!(matches!(
            request,
            PendingRequest::Stop | PendingRequest::Shutdown
        ));
        let mut state = self.state();
        if state.status.is_terminal() {
            return false;
        }
        state.pending = request;
        true
    }

    /// Hand out the pending request for a poll.
    ///
    /// Nothing is handed out while an earlier request is unacknowledged, so a slow worker can
    /// not receive the same request twice.
    pub fn take_pending(&self) -> PendingRequest {
        let mut state = self.state();
        if state.pending == PendingRequest::None || state.processing || state.status.is_terminal()
        {
            return PendingRequest::None;
        }
        state.processing = true;
        let request = std::mem::take(&mut state.pending);
        debug!(client = self.id, ?request, "Took pending request");
        request
    }
}
