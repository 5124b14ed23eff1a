//! Lifecycle bookkeeping of every worker connected to the controller
mod client_info;
mod clients;

pub use client_info::{ClientInfo, StatusChange};
pub use clients::ClientRegistry;

use std::{fmt::Display, str::FromStr};

use thiserror::Error;

use crate::protocol::Message;

/// Identifies a registered client for the lifetime of the controller
pub type ClientId = u64;

/// Role of a connected process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientType {
    /// Online traffic generator
    OnlineApp,
    /// Billing batch runner, at most one at a time
    Batch,
    /// Short lived control client, never registered
    CommandLine,
}

impl Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientType::OnlineApp => "ONLINE_APP",
            ClientType::Batch => "BATCH",
            ClientType::CommandLine => "COMMAND_LINE",
        };
        f.write_str(name)
    }
}

/// Lifecycle status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Registered, applying configuration
    Initializing,
    /// Waiting to be started
    Ready,
    /// Executing
    Running,
    /// Finished with an error
    Fail,
    /// Finished normally
    Success,
    /// Connection to the worker was lost
    Down,
}

const STATUS_NAMES: [(Status, &str); 6] = [
    (Status::Initializing, "INITIALIZING"),
    (Status::Ready, "READY"),
    (Status::Running, "RUNNING"),
    (Status::Fail, "FAIL"),
    (Status::Success, "SUCCESS"),
    (Status::Down, "DOWN"),
];

impl Status {
    /// Once a terminal status is reached the worker is done for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Fail | Status::Success | Status::Down)
    }

    /// Whether a worker may move from this status to `next`
    pub fn can_transition_to(&self, next: Status) -> bool {
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (_, Status::Initializing) => false,
            (Status::Running, Status::Ready) => false,
            _ => true,
        }
    }

    fn name(&self) -> &'static str {
        #[allow(clippy::unwrap_used)]
        STATUS_NAMES.iter().find(|(s, _)| s == self).unwrap().1
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Status {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STATUS_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(status, _)| *status)
            .ok_or_else(|| StatusError::Unknown(s.to_string()))
    }
}

/// What the controller wants a worker to do next, handed out on the next poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PendingRequest {
    /// Nothing to do
    #[default]
    None,
    /// Start executing
    Run,
    /// Stop, e.g. because the batch finished
    Stop,
    /// Stop because the cluster shuts down
    Shutdown,
}

impl PendingRequest {
    /// The polling response delivering this request
    pub fn polling_response(&self) -> Message {
        match self {
            PendingRequest::None => Message::RequestNone,
            PendingRequest::Run => Message::RequestRun,
            PendingRequest::Stop | PendingRequest::Shutdown => Message::RequestStop,
        }
    }
}

/// Rejected status reports
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    /// Not a status literal
    #[error("Unknown status: `{0}`")]
    Unknown(String),
    /// The transition is not part of the lifecycle
    #[error("Illegal status transition {from} -> {to}")]
    IllegalTransition {
        /// current status
        from: Status,
        /// reported status
        to: Status,
    },
}

/// Rejected registrations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// Only one batch worker may be connected at a time
    #[error("A phone bill batch client has already connected")]
    BatchAlreadyConnected,
    /// Control clients are not tracked
    #[error("Clients of type {0} can not be registered")]
    NotAWorker(ClientType),
}
