use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use super::{
    handlers::{self, Handler},
    session::Session,
    ClusterState, DispatchError,
};
use crate::protocol::{Connection, Received, WholeMessage};

/// Serve one connection until the peer closes it, its worker ends or an error occurs.
///
/// A worker which did not reach a terminal status is marked DOWN afterwards and a batch worker
/// gives up its admission.
pub(crate) async fn serve_connection<R, W>(
    state: Arc<ClusterState>,
    mut connection: Connection<R, W>,
    node: String,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = Session::new(node);
    debug!(node = session.node(), "Connection accepted");
    let result = dispatch_loop(&state, &mut connection, &mut session).await;

    if let Err(e) = &result {
        warn!(node = session.node(), error = %e, "Aborting connection");
    }
    if let Some(client) = session.client() {
        let reason = match &result {
            Ok(()) => "Connection closed by the client.".to_string(),
            Err(e) => format!("Connection aborted: {e}"),
        };
        if state.registry.mark_down(client, reason).is_some() {
            info!(
                client = client.id(),
                client_type = %client.client_type(),
                node = client.node(),
                "Client is down"
            );
        }
        state.registry.release(client);
    }
    let _ = connection.writer().shutdown().await;
}

async fn dispatch_loop<R, W>(
    state: &ClusterState,
    connection: &mut Connection<R, W>,
    session: &mut Session,
) -> Result<(), DispatchError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let WholeMessage { message, body } = match connection.reader().read_whole_message().await? {
            Received::Message(msg) => msg,
            Received::Closed => return Ok(()),
        };
        debug!(node = session.node(), %message, lines = body.len(), "Received message");

        match handlers::handler_for(message).ok_or(DispatchError::NoHandler(message))? {
            Handler::Request(handler) => {
                let reply = handler(state, session, &body)?;
                connection.writer().write_body(&reply).await?;
            }
            Handler::Notification(handler) => handler(state, session, &body)?,
            Handler::Polling(handler) => {
                let response = handler(state, session, &body)?;
                connection.writer().write_message(response, &[]).await?;
            }
        }

        if session.is_finished() {
            if let Some(client) = session.client() {
                info!(
                    client = client.id(),
                    status = %client.status(),
                    node = client.node(),
                    "Client has finished"
                );
            }
            return Ok(());
        }
    }
}
