//! The application level wire protocol spoken between controller and workers.
//!
//! Every message is one line holding the catalog name, zero or more body lines and a sentinel
//! line closing the message. See [codec] for the framing.
mod client;
mod codec;

pub use client::ControllerClient;
pub use codec::{Connection, MessageReader, MessageWriter, Received, END_OF_MESSAGE};

use std::{fmt::Display, str::FromStr};

use thiserror::Error;

/// How a message travels and who may send it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Sent and forgotten, no reply
    Notification,
    /// Answered with a reply body
    Request,
    /// Sent only by workers, answered with a [MessageKind::PollingResponse]
    Polling,
    /// Sent only by the controller as the answer to [MessageKind::Polling]
    PollingResponse,
}

/// The closed catalog of messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Message {
    /// Registers an online app worker, the reply is the benchmark configuration
    InitOnlineApp,
    /// Registers the billing batch worker, the reply is the benchmark configuration
    InitPhoneBill,
    /// The billing batch announces its end, online apps get stopped
    EndPhoneBill,
    /// Worker asks for a pending request
    Polling,
    /// Worker reports its status, body is the status literal and one line of free text
    UpdateStatus,
    /// Worker shall stop
    RequestStop,
    /// Worker shall start running
    RequestRun,
    /// Nothing to do
    RequestNone,
    /// Ask for a fresh contract block, reply is the decimal block number
    GetNewBlock,
    /// Report a contract block as populated, body is the decimal block number
    SubmitBlock,
    /// Ask for the active block info (watermark)
    GetActiveBlockInfo,
    /// Control client: formatted status of every worker
    GetClusterStatus,
    /// Control client: stop every worker and the controller
    ShutdownCluster,
    /// Control client: start every ready worker
    StartExecution,
}

/// Catalog name and kind of every message
const CATALOG: [(Message, &str, MessageKind); 14] = [
    (Message::InitOnlineApp, "INIT_ONLINE_APP", MessageKind::Request),
    (Message::InitPhoneBill, "INIT_PHONE_BILL", MessageKind::Request),
    (Message::EndPhoneBill, "END_PHONE_BILL", MessageKind::Notification),
    (Message::Polling, "POLLING", MessageKind::Polling),
    (Message::UpdateStatus, "UPDATE_STATUS", MessageKind::Notification),
    (Message::RequestStop, "REQUEST_STOP", MessageKind::PollingResponse),
    (Message::RequestRun, "REQUEST_RUN", MessageKind::PollingResponse),
    (Message::RequestNone, "REQUEST_NONE", MessageKind::PollingResponse),
    (Message::GetNewBlock, "GET_NEW_BLOCK", MessageKind::Request),
    (Message::SubmitBlock, "SUBMIT_BLOCK", MessageKind::Notification),
    (Message::GetActiveBlockInfo, "GET_ACTIVE_BLOCK_INFO", MessageKind::Request),
    (Message::GetClusterStatus, "GET_CLUSTER_STATUS", MessageKind::Request),
    (Message::ShutdownCluster, "SHUTDOWN_CLUSTER", MessageKind::Request),
    (Message::StartExecution, "START_EXECUTION", MessageKind::Request),
];

impl Message {
    /// Every message of the catalog
    pub fn all() -> impl Iterator<Item = Message> {
        CATALOG.iter().map(|(msg, _, _)| *msg)
    }

    fn entry(&self) -> &'static (Message, &'static str, MessageKind) {
        // every variant has exactly one catalog entry
        #[allow(clippy::unwrap_used)]
        CATALOG.iter().find(|(msg, _, _)| msg == self).unwrap()
    }

    /// Name of the message as written on the wire
    pub fn name(&self) -> &'static str {
        self.entry().1
    }

    /// Kind of the message
    pub fn kind(&self) -> MessageKind {
        self.entry().2
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CATALOG
            .iter()
            .find(|(_, name, _)| *name == s)
            .map(|(msg, _, _)| *msg)
            .ok_or_else(|| ProtocolError::UnknownMessage(s.to_string()))
    }
}

/// A message received from a worker or control client together with its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WholeMessage {
    /// Which message this is
    pub message: Message,
    /// Body lines, empty unless the message carries a body
    pub body: Vec<String>,
}

impl WholeMessage {
    /// Create a new whole message
    pub fn new(message: Message, body: Vec<String>) -> Self {
        Self { message, body }
    }
}

/// Everything that can go wrong on the wire. All of these are fatal to the connection they
/// occurred on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Reading from or writing to the socket failed
    #[error("IO error on connection: {0}")]
    Io(#[from] std::io::Error),
    /// A message line did not name a catalog entry
    #[error("Protocol error, unknown message: `{0}`")]
    UnknownMessage(String),
    /// A message of a kind not allowed at this point
    #[error("Protocol error, unexpected message {message} of kind {kind:?}")]
    UnexpectedKind {
        /// received or attempted message
        message: Message,
        /// its kind
        kind: MessageKind,
    },
    /// A polling response which the caller did not expect
    #[error("Protocol error, unexpected polling response: {0}")]
    UnexpectedResponse(Message),
    /// The body did not have the shape the message requires
    #[error("Protocol error, malformed body of {message}: {reason}")]
    MalformedBody {
        /// message the body belongs to
        message: Message,
        /// what is wrong
        reason: String,
    },
    /// A body line to be sent contains a line break
    #[error("Body line contains a line break: {0:?}")]
    LineBreakInBody(String),
    /// The peer closed the connection in the middle of a message
    #[error("Connection closed in the middle of a message")]
    Truncated,
    /// The peer closed the connection while a reply was awaited
    #[error("Connection closed by peer")]
    Closed,
}

impl ProtocolError {
    pub(crate) fn malformed(message: Message, reason: impl Into<String>) -> Self {
        Self::MalformedBody {
            message,
            reason: reason.into(),
        }
    }

    /// Fails unless `body` has exactly `lines` lines
    pub(crate) fn expect_lines(
        message: Message,
        body: &[String],
        lines: usize,
    ) -> Result<(), Self> {
        if body.len() == lines {
            Ok(())
        } else {
            Err(Self::malformed(
                message,
                format!("expected {lines} lines, got {}", body.len()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for msg in Message::all() {
            assert_eq!(msg, msg.name().parse::<Message>().unwrap());
        }
    }

    #[test]
    fn catalog_names_are_unique() {
        let mut names: Vec<_> = Message::all().map(|m| m.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn unknown_name_is_protocol_error() {
        let err = "GET_SOMETHING".parse::<Message>().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessage(s) if s == "GET_SOMETHING"));
    }

    #[test]
    fn polling_responses() {
        let responses: Vec<_> = Message::all()
            .filter(|m| m.kind() == MessageKind::PollingResponse)
            .collect();
        assert_eq!(
            responses,
            vec![Message::RequestStop, Message::RequestRun, Message::RequestNone]
        );
        assert_eq!(Message::Polling.kind(), MessageKind::Polling);
    }
}
