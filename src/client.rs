use crate::protocol::{CommandResponse, CommandType, ProtocolError, ProtocolHandler, ServerFrame};
use serde_json::Value;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("server closed the connection")]
    Closed,
}

/// A bus message forwarded by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedMessage {
    pub topic: String,
    pub payload: Value,
}

/// Line-oriented client for the simulator bridge.
pub struct ControlClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    protocol: ProtocolHandler,
    /// Messages that arrived while waiting for a response.
    backlog: VecDeque<ForwardedMessage>,
    timeout: Duration,
}

impl ControlClient {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            protocol: ProtocolHandler::new(),
            backlog: VecDeque::new(),
            timeout: RESPONSE_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a command and wait for its response.
    pub async fn send(&mut self, command_type: CommandType) -> Result<CommandResponse, ClientError> {
        let command = self.protocol.create_command(command_type);
        let encoded = serde_json::to_string(&command).map_err(ProtocolError::from)?;
        self.writer.write_all(encoded.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.await_response(command.id))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Parse errors are answered with id 0, so those match any request.
    async fn await_response(&mut self, id: u32) -> Result<CommandResponse, ClientError> {
        loop {
            match self.read_frame().await? {
                ServerFrame::Response(response) if response.id == id || response.id == 0 => {
                    return Ok(response);
                }
                ServerFrame::Response(_) => {}
                ServerFrame::Message { topic, payload } => {
                    self.backlog.push_back(ForwardedMessage { topic, payload });
                }
            }
        }
    }

    /// Next forwarded bus message. `None` once the server hangs up.
    pub async fn next_message(&mut self) -> Result<Option<ForwardedMessage>, ClientError> {
        if let Some(message) = self.backlog.pop_front() {
            return Ok(Some(message));
        }
        loop {
            match self.read_frame().await {
                Ok(ServerFrame::Message { topic, payload }) => {
                    return Ok(Some(ForwardedMessage { topic, payload }));
                }
                Ok(ServerFrame::Response(_)) => {}
                Err(ClientError::Closed) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_frame(&mut self) -> Result<ServerFrame, ClientError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Err(ClientError::Closed);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(self.protocol.decode_frame(&line)?);
        }
    }
}
