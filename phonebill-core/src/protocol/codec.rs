//! Line oriented framing of protocol messages.
//!
//! ```text
//! GET_NEW_BLOCK
//! === end of message ===
//! ```
//!
//! A message is its catalog name on one line, the body lines and the [END_OF_MESSAGE] sentinel.
//! Replies to requests are only a body and the sentinel. Body lines which equal the sentinel or
//! start with `\` are written with an additional leading `\`, which the reader strips again, so
//! no body can ever terminate a message early.
use std::borrow::Cow;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream, ToSocketAddrs,
    },
};

use super::{Message, ProtocolError, WholeMessage};

/// Line closing every message and reply
pub const END_OF_MESSAGE: &str = "=== end of message ===";

const ESCAPE: char = '\\';

/// Result of reading from a connection. The peer closing the connection between two messages
/// is not an error but the normal way a conversation ends.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<T> {
    /// A complete item was read
    Message(T),
    /// The peer closed the connection
    Closed,
}

/// Reads messages and bodies from a byte stream
pub struct MessageReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap a byte stream
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Read one line without its terminator, `None` on end of stream
    async fn read_line(&mut self) -> Result<Option<&str>, ProtocolError> {
        self.line.clear();
        if self.inner.read_line(&mut self.line).await? == 0 {
            return Ok(None);
        }
        let line = self.line.strip_suffix('\n').unwrap_or(&self.line);
        Ok(Some(line.strip_suffix('\r').unwrap_or(line)))
    }

    /// Wait for the next message line
    pub async fn read_message(&mut self) -> Result<Received<Message>, ProtocolError> {
        match self.read_line().await? {
            Some(line) => Ok(Received::Message(line.parse()?)),
            None => Ok(Received::Closed),
        }
    }

    /// Read body lines up to and including the sentinel
    pub async fn read_body(&mut self) -> Result<Vec<String>, ProtocolError> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line().await?.ok_or(ProtocolError::Truncated)?;
            if line == END_OF_MESSAGE {
                return Ok(body);
            }
            body.push(unescape(line).to_owned());
        }
    }

    /// Read a message line followed by its body
    pub async fn read_whole_message(&mut self) -> Result<Received<WholeMessage>, ProtocolError> {
        let message = match self.read_message().await? {
            Received::Message(message) => message,
            Received::Closed => return Ok(Received::Closed),
        };
        let body = self.read_body().await?;
        Ok(Received::Message(WholeMessage::new(message, body)))
    }
}

/// Writes messages and bodies to a byte stream. Every write is flushed before it returns.
pub struct MessageWriter<W> {
    inner: BufWriter<W>,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap a byte stream
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// Write the message line, the body and the sentinel
    pub async fn write_message(
        &mut self,
        message: Message,
        body: &[String],
    ) -> Result<(), ProtocolError> {
        check_body(body)?;
        self.write_line(message.name()).await?;
        self.write_checked_body(body).await
    }

    /// Write a bare body and the sentinel, this is how requests are answered
    pub async fn write_body(&mut self, body: &[String]) -> Result<(), ProtocolError> {
        check_body(body)?;
        self.write_checked_body(body).await
    }

    /// Flush and close the write direction
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    async fn write_checked_body(&mut self, body: &[String]) -> Result<(), ProtocolError> {
        for line in body {
            self.write_line(&escape(line)).await?;
        }
        self.write_line(END_OF_MESSAGE).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        Ok(())
    }
}

/// Nothing is written if any line would break the framing
fn check_body(body: &[String]) -> Result<(), ProtocolError> {
    match body.iter().find(|line| line.contains(['\n', '\r'])) {
        Some(line) => Err(ProtocolError::LineBreakInBody(line.clone())),
        None => Ok(()),
    }
}

fn escape(line: &str) -> Cow<'_, str> {
    if line == END_OF_MESSAGE || line.starts_with(ESCAPE) {
        Cow::Owned(format!("{ESCAPE}{line}"))
    } else {
        Cow::Borrowed(line)
    }
}

fn unescape(line: &str) -> &str {
    line.strip_prefix(ESCAPE).unwrap_or(line)
}

/// Both directions of one stream connection
pub struct Connection<R, W> {
    reader: MessageReader<R>,
    writer: MessageWriter<W>,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a connection from the two halves of a stream
    pub fn new(read: R, write: W) -> Self {
        Self {
            reader: MessageReader::new(read),
            writer: MessageWriter::new(write),
        }
    }

    /// Reading half
    pub fn reader(&mut self) -> &mut MessageReader<R> {
        &mut self.reader
    }

    /// Writing half
    pub fn writer(&mut self) -> &mut MessageWriter<W> {
        &mut self.writer
    }
}

impl Connection<OwnedReadHalf, OwnedWriteHalf> {
    /// Use an accepted or connected TCP stream
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self::new(read, write)
    }

    /// Connect to the controller
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_tcp(stream))
    }
}
