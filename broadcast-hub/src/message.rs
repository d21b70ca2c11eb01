use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Identity assigned to a client at admission. Never reused within a process.
pub type ClientId = u64;

/// An opaque payload plus the client it is attributed to.
///
/// `sender` is `None` for messages generated by the hub itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub sender: Option<ClientId>,
    pub payload: Value,
}

impl Message {
    pub fn from_client(sender: ClientId, payload: Value) -> Self {
        Self {
            sender: Some(sender),
            payload,
        }
    }

    pub fn from_hub(payload: Value) -> Self {
        Self {
            sender: None,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Broadcast { payload: Value },
    Direct { to: ClientId, payload: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Welcome { id: ClientId },
    NewClient { id: ClientId },
    ClientLeft { id: ClientId },
    Message(Message),
    Error { message: String },
}

/// Decodes one inbound text frame. Each frame carries exactly one JSON document.
pub fn decode_frame(text: &str) -> Result<ClientFrame> {
    Ok(serde_json::from_str(text.trim())?)
}

pub fn encode_event(event: &ServerEvent) -> serde_json::Result<String> {
    serde_json::to_string(event)
}
