use crate::topic::TopicPattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MAX_COMMAND_SIZE: usize = 512;

/// A control request sent by a client, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub id: u32,
    pub timestamp: u64,
    pub command_type: CommandType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    Ping,
    Status,
    StartScenario { scenario: String },
    StopScenario { scenario: String },
    StartAll,
    StopAll,
    StartSensor { sensor_id: String },
    StopSensor { sensor_id: String },
    IsolateSensor { sensor_id: String },
    RecoverSensor { sensor_id: String },
    Snapshot { scenario: Option<String> },
    /// Stream bus messages matching `pattern` to this connection.
    Subscribe { pattern: String },
    Unsubscribe,
}

impl CommandType {
    pub fn name(&self) -> &'static str {
        match self {
            CommandType::Ping => "ping",
            CommandType::Status => "status",
            CommandType::StartScenario { .. } => "start_scenario",
            CommandType::StopScenario { .. } => "stop_scenario",
            CommandType::StartAll => "start_all",
            CommandType::StopAll => "stop_all",
            CommandType::StartSensor { .. } => "start_sensor",
            CommandType::StopSensor { .. } => "stop_sensor",
            CommandType::IsolateSensor { .. } => "isolate_sensor",
            CommandType::RecoverSensor { .. } => "recover_sensor",
            CommandType::Snapshot { .. } => "snapshot",
            CommandType::Subscribe { .. } => "subscribe",
            CommandType::Unsubscribe => "unsubscribe",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: u32,
    pub timestamp: u64,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Error,
    InvalidCommand,
    ParseError,
}

/// Everything the server writes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    Response(CommandResponse),
    /// A bus message forwarded to a subscribed client.
    Message { topic: String, payload: Value },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl ProtocolError {
    pub fn response_status(&self) -> ResponseStatus {
        match self {
            ProtocolError::MessageTooLarge { .. } | ProtocolError::InvalidJson(_) => ResponseStatus::ParseError,
            ProtocolError::InvalidCommand(_) | ProtocolError::InvalidParameter(_) => {
                ResponseStatus::InvalidCommand
            }
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn timestamp_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Encodes and decodes the newline-delimited control protocol.
#[derive(Debug)]
pub struct ProtocolHandler {
    next_id: u32,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    pub fn parse_command(&self, line: &str) -> Result<ControlCommand, ProtocolError> {
        if line.len() > MAX_COMMAND_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: line.len(),
                max: MAX_COMMAND_SIZE,
            });
        }
        let command: ControlCommand = serde_json::from_str(line)?;
        self.validate_command(&command)?;
        Ok(command)
    }

    pub fn validate_command(&self, command: &ControlCommand) -> Result<(), ProtocolError> {
        if command.id == 0 {
            return Err(ProtocolError::InvalidCommand("command id must be non-zero".to_string()));
        }

        match &command.command_type {
            CommandType::StartSensor { sensor_id }
            | CommandType::StopSensor { sensor_id }
            | CommandType::IsolateSensor { sensor_id }
            | CommandType::RecoverSensor { sensor_id } => {
                if sensor_id.trim().is_empty() {
                    return Err(ProtocolError::InvalidParameter("sensor_id is empty".to_string()));
                }
            }
            CommandType::StartScenario { scenario } | CommandType::StopScenario { scenario } => {
                if scenario.trim().is_empty() {
                    return Err(ProtocolError::InvalidParameter("scenario is empty".to_string()));
                }
            }
            CommandType::Subscribe { pattern } => {
                TopicPattern::parse(pattern)
                    .map_err(|e| ProtocolError::InvalidParameter(e.to_string()))?;
            }
            _ => {}
        }

        Ok(())
    }

    pub fn next_command_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        id
    }

    pub fn create_command(&mut self, command_type: CommandType) -> ControlCommand {
        ControlCommand {
            id: self.next_command_id(),
            timestamp: timestamp_ms(),
            command_type,
        }
    }

    pub fn create_response(&self, command_id: u32, status: ResponseStatus, message: Option<&str>) -> CommandResponse {
        CommandResponse {
            id: command_id,
            timestamp: timestamp_ms(),
            status,
            message: message.map(str::to_string),
            data: None,
        }
    }

    pub fn create_error_response(&self, command_id: u32, error: &ProtocolError) -> CommandResponse {
        self.create_response(command_id, error.response_status(), Some(&error.to_string()))
    }

    pub fn encode_frame(&self, frame: &ServerFrame) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(frame)?)
    }

    pub fn decode_frame(&self, line: &str) -> Result<ServerFrame, ProtocolError> {
        Ok(serde_json::from_str(line)?)
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus payloads are JSON text; forward them as JSON when they parse.
pub fn message_frame(topic: &str, payload: &str) -> ServerFrame {
    ServerFrame::Message {
        topic: topic.to_string(),
        payload: serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string())),
    }
}
