use std::sync::Arc;

use tracing::{debug, info};

use super::{report, session::Session, ClusterState, DispatchError};
use crate::{
    blocks::BlockNumber,
    protocol::{Message, ProtocolError},
    registry::{ClientInfo, ClientType, Status},
};

/// Reply of [StartExecution](Message::StartExecution) when nothing was started
pub(crate) const MSG_NO_CLIENTS: &str =
    "Failed to start execution because no clients are ready to run.";

type RequestFn = fn(&ClusterState, &mut Session, &[String]) -> Result<Vec<String>, DispatchError>;
type NotificationFn = fn(&ClusterState, &mut Session, &[String]) -> Result<(), DispatchError>;
type PollingFn = fn(&ClusterState, &mut Session, &[String]) -> Result<Message, DispatchError>;

/// A handler, shaped by the kind of message it handles
#[derive(Clone, Copy)]
pub(crate) enum Handler {
    /// Produces the reply body
    Request(RequestFn),
    /// Produces nothing
    Notification(NotificationFn),
    /// Produces the polling response
    Polling(PollingFn),
}

/// Every message the controller accepts. Polling responses are never accepted.
const HANDLERS: [(Message, Handler); 11] = [
    (Message::InitOnlineApp, Handler::Request(init_online_app)),
    (Message::InitPhoneBill, Handler::Request(init_phone_bill)),
    (Message::EndPhoneBill, Handler::Notification(end_phone_bill)),
    (Message::Polling, Handler::Polling(polling)),
    (Message::UpdateStatus, Handler::Notification(update_status)),
    (Message::GetNewBlock, Handler::Request(get_new_block)),
    (Message::SubmitBlock, Handler::Notification(submit_block)),
    (Message::GetActiveBlockInfo, Handler::Request(get_active_block_info)),
    (Message::GetClusterStatus, Handler::Request(get_cluster_status)),
    (Message::ShutdownCluster, Handler::Request(shutdown_cluster)),
    (Message::StartExecution, Handler::Request(start_execution)),
];

/// Look up the handler of `message`
pub(crate) fn handler_for(message: Message) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(msg, _)| *msg == message)
        .map(|(_, handler)| *handler)
}

fn register(
    state: &ClusterState,
    session: &mut Session,
    message: Message,
    client_type: ClientType,
    body: &[String],
) -> Result<Vec<String>, DispatchError> {
    ProtocolError::expect_lines(message, body, 0)?;
    session.check_unidentified(message)?;
    let client = state
        .registry
        .register(client_type, session.node().to_string())?;
    session.register(client);
    Ok(state.bench_config.to_body()?)
}

fn init_online_app(
    state: &ClusterState,
    session: &mut Session,
    body: &[String],
) -> Result<Vec<String>, DispatchError> {
    register(state, session, Message::InitOnlineApp, ClientType::OnlineApp, body)
}

fn init_phone_bill(
    state: &ClusterState,
    session: &mut Session,
    body: &[String],
) -> Result<Vec<String>, DispatchError> {
    register(state, session, Message::InitPhoneBill, ClientType::Batch, body)
}

fn end_phone_bill(
    state: &ClusterState,
    session: &mut Session,
    body: &[String],
) -> Result<(), DispatchError> {
    let client = session.worker(Message::EndPhoneBill)?;
    ProtocolError::expect_lines(Message::EndPhoneBill, body, 0)?;
    let stopped = state.registry.stop_online_apps();
    info!(
        client = client.id(),
        stopped = stopped.len(),
        "Phone bill ended, stopping online apps"
    );
    Ok(())
}

fn polling(
    _state: &ClusterState,
    session: &mut Session,
    body: &[String],
) -> Result<Message, DispatchError> {
    let client = session.worker(Message::Polling)?;
    ProtocolError::expect_lines(Message::Polling, body, 0)?;
    Ok(client.take_pending().polling_response())
}

fn update_status(
    state: &ClusterState,
    session: &mut Session,
    body: &[String],
) -> Result<(), DispatchError> {
    let client = session.worker(Message::UpdateStatus)?;
    let [status, text] = body else {
        return Err(ProtocolError::malformed(
            Message::UpdateStatus,
            format!("expected 2 lines, got {}", body.len()),
        )
        .into());
    };
    let status: Status = status.parse()?;
    if status == Status::Down {
        return Err(ProtocolError::malformed(
            Message::UpdateStatus,
            "DOWN can not be reported by a worker",
        )
        .into());
    }
    let change = state.registry.update_status(client, status, text.clone())?;
    debug!(client = client.id(), from = %change.from, to = %change.to, text = %text, "Status update");
    Ok(())
}

fn get_new_block(
    state: &ClusterState,
    _session: &mut Session,
    body: &[String],
) -> Result<Vec<String>, DispatchError> {
    ProtocolError::expect_lines(Message::GetNewBlock, body, 0)?;
    Ok(vec![state.blocks.get_new_block().to_string()])
}

fn submit_block(
    state: &ClusterState,
    _session: &mut Session,
    body: &[String],
) -> Result<(), DispatchError> {
    ProtocolError::expect_lines(Message::SubmitBlock, body, 1)?;
    let block: BlockNumber = body[0].trim().parse().map_err(|_| {
        ProtocolError::malformed(
            Message::SubmitBlock,
            format!("expected a block number, got {:?}", body[0]),
        )
    })?;
    state.blocks.submit(block)?;
    Ok(())
}

fn get_active_block_info(
    state: &ClusterState,
    _session: &mut Session,
    body: &[String],
) -> Result<Vec<String>, DispatchError> {
    ProtocolError::expect_lines(Message::GetActiveBlockInfo, body, 0)?;
    Ok(vec![state.blocks.active_block_info().to_string()])
}

fn get_cluster_status(
    state: &ClusterState,
    session: &mut Session,
    body: &[String],
) -> Result<Vec<String>, DispatchError> {
    ProtocolError::expect_lines(Message::GetClusterStatus, body, 0)?;
    session.control_request();
    Ok(report::cluster_status(&state.registry.snapshot()))
}

fn client_lines(verb: &str, clients: &[Arc<ClientInfo>]) -> Vec<String> {
    clients
        .iter()
        .map(|c| {
            format!(
                "Request {verb} for a client: Type = {}, Node = {}",
                c.client_type(),
                c.node()
            )
        })
        .collect()
}

fn shutdown_cluster(
    state: &ClusterState,
    session: &mut Session,
    body: &[String],
) -> Result<Vec<String>, DispatchError> {
    ProtocolError::expect_lines(Message::ShutdownCluster, body, 0)?;
    session.control_request();
    state.shutdown.send_replace(true);
    let stopped = state.registry.shutdown();
    info!(node = session.node(), stopped = stopped.len(), "Cluster shutdown requested");
    Ok(client_lines("stop", &stopped))
}

fn start_execution(
    state: &ClusterState,
    session: &mut Session,
    body: &[String],
) -> Result<Vec<String>, DispatchError> {
    ProtocolError::expect_lines(Message::StartExecution, body, 0)?;
    session.control_request();
    let started = state.registry.start_execution();
    info!(node = session.node(), started = started.len(), "Start execution requested");
    if started.is_empty() {
        return Ok(vec![MSG_NO_CLIENTS.to_string()]);
    }
    Ok(client_lines("start", &started))
}
