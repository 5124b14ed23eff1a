use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        ToSocketAddrs,
    },
    sync::Mutex,
};
use tracing::debug;

use super::{Connection, Message, MessageKind, ProtocolError, Received};
use crate::registry::Status;

const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(5000);

/// Worker side end of a controller connection.
///
/// The client may be shared by several tasks of one worker process, each request/reply pair is
/// exchanged under a lock so that replies can not be mixed up.
pub struct ControllerClient<R = OwnedReadHalf, W = OwnedWriteHalf> {
    connection: Mutex<Connection<R, W>>,
    polling_interval: Duration,
}

impl ControllerClient {
    /// Connect to the controller listening at `addr`
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        Ok(Self::new(Connection::connect(addr).await?))
    }
}

impl<R, W> ControllerClient<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Use an established connection
    pub fn new(connection: Connection<R, W>) -> Self {
        Self {
            connection: Mutex::new(connection),
            polling_interval: DEFAULT_POLLING_INTERVAL,
        }
    }

    /// Pause between two polls while waiting for a command
    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    /// Change the pause between two polls
    pub fn set_polling_interval(&mut self, interval: Duration) {
        self.polling_interval = interval;
    }

    /// Send a request and wait for the reply body
    pub async fn request(
        &self,
        message: Message,
        body: &[String],
    ) -> Result<Vec<String>, ProtocolError> {
        expect_kind(message, MessageKind::Request)?;
        let mut conn = self.connection.lock().await;
        conn.writer().write_message(message, body).await?;
        conn.reader().read_body().await.map_err(reply_cut_off)
    }

    /// Send a notification, no reply is read
    pub async fn notify(&self, message: Message, body: &[String]) -> Result<(), ProtocolError> {
        expect_kind(message, MessageKind::Notification)?;
        let mut conn = self.connection.lock().await;
        conn.writer().write_message(message, body).await
    }

    /// Ask the controller for a pending request.
    ///
    /// Returns [Message::RequestNone] or one of the `expected` responses, anything else is a
    /// protocol error.
    pub async fn poll(&self, expected: &[Message]) -> Result<Message, ProtocolError> {
        let mut conn = self.connection.lock().await;
        conn.writer().write_message(Message::Polling, &[]).await?;
        let response = match conn.reader().read_message().await? {
            Received::Message(msg) => msg,
            Received::Closed => return Err(ProtocolError::Closed),
        };
        let body = conn.reader().read_body().await.map_err(reply_cut_off)?;
        drop(conn);

        expect_kind(response, MessageKind::PollingResponse)?;
        if !body.is_empty() {
            return Err(ProtocolError::malformed(
                response,
                format!("unexpected polling body: {}", body.join("\\n")),
            ));
        }
        if response == Message::RequestNone || expected.contains(&response) {
            Ok(response)
        } else {
            Err(ProtocolError::UnexpectedResponse(response))
        }
    }

    /// Poll until the controller answers with something other than [Message::RequestNone]
    pub async fn wait_for_command(&self, expected: &[Message]) -> Result<Message, ProtocolError> {
        loop {
            match self.poll(expected).await? {
                Message::RequestNone => tokio::time::sleep(self.polling_interval).await,
                command => {
                    debug!(?command, "Received command from controller");
                    return Ok(command);
                }
            }
        }
    }

    /// Report the worker status together with a line of free text.
    /// Line breaks in the text are replaced by spaces.
    pub async fn update_status(&self, status: Status, message: &str) -> Result<(), ProtocolError> {
        let text = message.replace(['\r', '\n'], " ");
        self.notify(Message::UpdateStatus, &[status.to_string(), text])
            .await
    }

    /// Close the connection towards the controller
    pub async fn close(&self) -> Result<(), ProtocolError> {
        self.connection.lock().await.writer().shutdown().await
    }
}

/// The controller went away while a reply was awaited, how far it got does not matter
fn reply_cut_off(error: ProtocolError) -> ProtocolError {
    match error {
        ProtocolError::Truncated => ProtocolError::Closed,
        other => other,
    }
}

fn expect_kind(message: Message, kind: MessageKind) -> Result<(), ProtocolError> {
    if message.kind() == kind {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedKind {
            message,
            kind: message.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageReader, MessageWriter, WholeMessage};
    use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    type Peer = (
        MessageReader<ReadHalf<DuplexStream>>,
        MessageWriter<WriteHalf<DuplexStream>>,
    );

    fn client() -> (
        ControllerClient<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>,
        Peer,
    ) {
        let (a, b) = duplex(64 * 1024);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        let mut client = ControllerClient::new(Connection::new(ar, aw));
        client.set_polling_interval(Duration::from_millis(1));
        (client, (MessageReader::new(br), MessageWriter::new(bw)))
    }

    #[tokio::test]
    async fn request_reads_reply() {
        let (client, (mut reader, mut writer)) = client();
        let server = tokio::spawn(async move {
            let msg = reader.read_whole_message().await.unwrap();
            writer.write_body(&["17".to_string()]).await.unwrap();
            msg
        });
        let reply = client.request(Message::GetNewBlock, &[]).await.unwrap();
        assert_eq!(reply, vec!["17".to_string()]);
        assert_eq!(
            server.await.unwrap(),
            Received::Message(WholeMessage::new(Message::GetNewBlock, vec![]))
        );
    }

    #[tokio::test]
    async fn request_rejects_notification() {
        let (client, _peer) = client();
        let err = client.request(Message::SubmitBlock, &[]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedKind { .. }));
        let err = client.notify(Message::GetNewBlock, &[]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedKind { .. }));
    }

    #[tokio::test]
    async fn request_on_closed_connection() {
        let (client, peer) = client();
        drop(peer);
        let err = client.request(Message::GetNewBlock, &[]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Closed | ProtocolError::Io(_)));
    }

    #[tokio::test]
    async fn update_status_body() {
        let (client, (mut reader, _writer)) = client();
        client
            .update_status(Status::Running, "two\nlines")
            .await
            .unwrap();
        let msg = reader.read_whole_message().await.unwrap();
        assert_eq!(
            msg,
            Received::Message(WholeMessage::new(
                Message::UpdateStatus,
                vec!["RUNNING".to_string(), "two lines".to_string()]
            ))
        );
    }

    #[tokio::test]
    async fn wait_for_command_skips_none() {
        let (client, (mut reader, mut writer)) = client();
        let server = tokio::spawn(async move {
            for response in [Message::RequestNone, Message::RequestNone, Message::RequestRun] {
                let msg = reader.read_whole_message().await.unwrap();
                assert_eq!(
                    msg,
                    Received::Message(WholeMessage::new(Message::Polling, vec![]))
                );
                writer.write_message(response, &[]).await.unwrap();
            }
        });
        let command = client
            .wait_for_command(&[Message::RequestRun, Message::RequestStop])
            .await
            .unwrap();
        assert_eq!(command, Message::RequestRun);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn poll_rejects_unexpected_response() {
        let (client, (mut reader, mut writer)) = client();
        tokio::spawn(async move {
            reader.read_whole_message().await.unwrap();
            writer.write_message(Message::RequestRun, &[]).await.unwrap();
        });
        let err = client.poll(&[Message::RequestStop]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedResponse(Message::RequestRun)));
    }

    #[tokio::test]
    async fn poll_rejects_body() {
        let (client, (mut reader, mut writer)) = client();
        tokio::spawn(async move {
            reader.read_whole_message().await.unwrap();
            writer
                .write_message(Message::RequestNone, &["junk".to_string()])
                .await
                .unwrap();
        });
        let err = client.poll(&[]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedBody { .. }));
    }

    #[tokio::test]
    async fn poll_rejects_non_response_kind() {
        let (client, (mut reader, mut writer)) = client();
        tokio::spawn(async move {
            reader.read_whole_message().await.unwrap();
            writer.write_message(Message::Polling, &[]).await.unwrap();
        });
        let err = client.poll(&[]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedKind { .. }));
    }

    /// Peer reads one message, answers with `partial` and hangs up
    fn cut_off_after(
        partial: &'static [u8],
    ) -> ControllerClient<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>> {
        let (a, b) = duplex(64 * 1024);
        let (ar, aw) = split(a);
        let (br, mut bw) = split(b);
        tokio::spawn(async move {
            let mut reader = MessageReader::new(br);
            reader.read_whole_message().await.unwrap();
            bw.write_all(partial).await.unwrap();
            bw.shutdown().await.unwrap();
        });
        ControllerClient::new(Connection::new(ar, aw))
    }

    /// A reply cut off in the middle reads as a closed connection for requests and polls alike
    #[tokio::test]
    async fn reply_cut_off_is_closed() {
        let client = cut_off_after(b"REQUEST_NONE\n");
        assert!(matches!(client.poll(&[]).await, Err(ProtocolError::Closed)));

        let client = cut_off_after(b"17\n");
        assert!(matches!(
            client.request(Message::GetNewBlock, &[]).await,
            Err(ProtocolError::Closed)
        ));
    }
}
