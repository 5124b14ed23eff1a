use std::sync::Arc;

use super::DispatchError;
use crate::{protocol::Message, registry::ClientInfo};

/// What the peer of a connection turned out to be
#[derive(Debug)]
enum Role {
    /// Nothing identifying was received yet
    Unidentified,
    /// A registered worker
    Worker(Arc<ClientInfo>),
    /// A control client, never registered
    CommandLine,
}

/// Per connection state of a dispatch loop
#[derive(Debug)]
pub(crate) struct Session {
    node: String,
    role: Role,
}

impl Session {
    pub(crate) fn new(node: String) -> Self {
        Self {
            node,
            role: Role::Unidentified,
        }
    }

    /// Peer address of the connection
    pub(crate) fn node(&self) -> &str {
        &self.node
    }

    /// The registered worker, if any
    pub(crate) fn client(&self) -> Option<&Arc<ClientInfo>> {
        match &self.role {
            Role::Worker(client) => Some(client),
            _ => None,
        }
    }

    /// The registered worker, `message` is refused without one
    pub(crate) fn worker(&self, message: Message) -> Result<&Arc<ClientInfo>, DispatchError> {
        self.client().ok_or(DispatchError::NotRegistered(message))
    }

    /// Make sure `message` may register a worker on this connection
    pub(crate) fn check_unidentified(&self, message: Message) -> Result<(), DispatchError> {
        match self.role {
            Role::Unidentified => Ok(()),
            _ => Err(DispatchError::AlreadyIdentified(message)),
        }
    }

    /// Bind the connection to a freshly registered worker
    pub(crate) fn register(&mut self, client: Arc<ClientInfo>) {
        debug_assert!(matches!(self.role, Role::Unidentified));
        self.role = Role::Worker(client);
    }

    /// A control request arrived. Unidentified connections become control clients, workers may
    /// issue control requests as well.
    pub(crate) fn control_request(&mut self) {
        if let Role::Unidentified = self.role {
            self.role = Role::CommandLine;
        }
    }

    pub(crate) fn is_command_line(&self) -> bool {
        matches!(self.role, Role::CommandLine)
    }

    /// The worker of this connection reached a terminal status
    pub(crate) fn is_finished(&self) -> bool {
        self.client().is_some_and(|c| c.status().is_terminal())
    }
}
