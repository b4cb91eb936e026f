//! TCP bridge exposing a pipeline to remote clients.
//!
//! Clients send one [`ControlCommand`](crate::protocol::ControlCommand) per
//! line and receive [`ServerFrame`]s. A client may hold one bus
//! subscription; its messages are forwarded on the same connection.

use crate::broker::{BusError, HandlerError, Message, MessageHandler, SubscriptionId};
use crate::pipeline::Pipeline;
use crate::protocol::{
    message_frame, CommandResponse, CommandType, ProtocolError, ProtocolHandler, ResponseStatus, ServerFrame,
    MAX_COMMAND_SIZE,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Frames queued for one client before forwarded bus messages are dropped.
const CLIENT_OUTBOUND_CAPACITY: usize = 256;

/// Most bytes of one client line kept in memory. The rest of a longer line
/// is skipped and the line is answered with a size error.
const MAX_LINE_BYTES: usize = MAX_COMMAND_SIZE * 2;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Accept clients until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
) -> Result<(), BridgeError> {
    info!(addr = %listener.local_addr()?, "Bridge listening");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!(%addr, "Client connected");
                    let pipeline = Arc::clone(&pipeline);
                    let cancel = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, addr, pipeline, cancel).await {
                            warn!(%addr, error = %e, "Client error");
                        }
                        info!(%addr, "Client disconnected");
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    info!("Bridge stopped");
    Ok(())
}

/// Forwards bus messages to a client's outbound queue.
struct ClientForwarder {
    addr: SocketAddr,
    outbound: mpsc::Sender<ServerFrame>,
}

impl MessageHandler for ClientForwarder {
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.outbound
            .try_send(message_frame(&message.topic, &message.payload))
            .map_err(|e| HandlerError::Failed(format!("client {} not keeping up: {e}", self.addr)))
    }
}

struct ClientSession {
    addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    protocol: ProtocolHandler,
    outbound: mpsc::Sender<ServerFrame>,
    subscription: Option<SubscriptionId>,
}

impl ClientSession {
    async fn handle_line(&mut self, line: &str) -> CommandResponse {
        let command = match self.protocol.parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "Rejected command");
                return self.protocol.create_error_response(0, &e);
            }
        };
        debug!(addr = %self.addr, id = command.id, command = command.command_type.name(), "Received command");

        match &command.command_type {
            CommandType::Subscribe { pattern } => match self.subscribe(pattern) {
                Ok(id) => self.protocol.create_response(
                    command.id,
                    ResponseStatus::Success,
                    Some(&format!("subscribed to {pattern} as {id}")),
                ),
                Err(e) => self
                    .protocol
                    .create_response(command.id, ResponseStatus::Error, Some(&e.to_string())),
            },
            CommandType::Unsubscribe => {
                let message = if self.unsubscribe() {
                    "unsubscribed"
                } else {
                    "no active subscription"
                };
                self.protocol
                    .create_response(command.id, ResponseStatus::Success, Some(message))
            }
            _ => self.pipeline.execute(&command).await,
        }
    }

    fn reject_oversized(&self, size: usize) -> CommandResponse {
        let error = ProtocolError::MessageTooLarge {
            size,
            max: MAX_COMMAND_SIZE,
        };
        warn!(addr = %self.addr, error = %error, "Rejected command");
        self.protocol.create_error_response(0, &error)
    }

    fn subscribe(&mut self, pattern: &str) -> Result<SubscriptionId, BusError> {
        self.unsubscribe();
        let forwarder = Arc::new(ClientForwarder {
            addr: self.addr,
            outbound: self.outbound.clone(),
        });
        let id = self.pipeline.bus().subscribe(pattern, forwarder)?;
        info!(addr = %self.addr, pattern, subscription = %id, "Client subscribed");
        self.subscription = Some(id);
        Ok(id)
    }

    fn unsubscribe(&mut self) -> bool {
        match self.subscription.take() {
            Some(id) => self.pipeline.bus().unsubscribe(id),
            None => false,
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
) -> Result<(), BridgeError> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let (outbound, outbound_rx) = mpsc::channel(CLIENT_OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_frames(writer, outbound_rx));

    let mut session = ClientSession {
        addr,
        pipeline,
        protocol: ProtocolHandler::new(),
        outbound,
        subscription: None,
    };

    let result = loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            line = read_client_line(&mut reader, MAX_LINE_BYTES) => line,
        };
        let response = match line {
            Ok(ClientLine::Line(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                session.handle_line(trimmed).await
            }
            Ok(ClientLine::TooLong(size)) => session.reject_oversized(size),
            Ok(ClientLine::Closed) => break Ok(()),
            Err(e) => break Err(BridgeError::from(e)),
        };

        if session.outbound.send(ServerFrame::Response(response)).await.is_err() {
            break Ok(());
        }
    };

    session.unsubscribe();
    drop(session);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%addr, error = %e, "Writer stopped"),
        Err(e) => warn!(%addr, error = %e, "Writer task failed"),
    }
    result
}

#[derive(Debug, PartialEq, Eq)]
enum ClientLine {
    Line(String),
    /// Byte length of a line that went over the limit.
    TooLong(usize),
    Closed,
}

/// Read up to the next newline, keeping at most `limit` bytes.
async fn read_client_line<R>(reader: &mut R, limit: usize) -> io::Result<ClientLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut size = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if size == 0 {
                return Ok(ClientLine::Closed);
            }
            break;
        }
        let newline = available.iter().position(|&b| b == b'\n');
        let chunk = &available[..newline.unwrap_or(available.len())];
        size += chunk.len();
        if size <= limit {
            line.extend_from_slice(chunk);
        }
        let consumed = chunk.len() + usize::from(newline.is_some());
        reader.consume(consumed);
        if newline.is_some() {
            break;
        }
    }

    if size > limit {
        Ok(ClientLine::TooLong(size))
    } else {
        Ok(ClientLine::Line(String::from_utf8_lossy(&line).into_owned()))
    }
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<ServerFrame>,
) -> Result<(), BridgeError> {
    let protocol = ProtocolHandler::new();
    while let Some(frame) = frames.recv().await {
        let encoded = protocol.encode_frame(&frame)?;
        writer.write_all(encoded.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.shutdown().await?;
    Ok(())
}
