//! Socket envelope

use crate::types::FileChange;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Sync,
    Diff,
    Ack,
    Error,
    Ping,
    Pong,
    Change,
}

/// `{type, payload?, error?}` JSON frame exchanged on the notification socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            payload: None,
            error: None,
        }
    }

    pub fn with_payload<T: Serialize>(kind: MessageType, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            payload: Some(serde_json::to_value(payload)?),
            error: None,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Error,
            payload: None,
            error: Some(message.into()),
        }
    }

    pub fn change(change: &FileChange) -> Result<Self, serde_json::Error> {
        Self::with_payload(MessageType::Change, change)
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode the payload as `T`; a missing payload decodes from `null`.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone().unwrap_or(Value::Null))
    }

    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}
