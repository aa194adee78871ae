use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::ChatMessage;

/// Messages exchanged over the control data channel, as JSON text frames:
///
/// ```json
/// {"type":"chat","payload":{"id":"..","sender":"..","text":"..","timestamp":".."}}
/// {"type":"hand-raise","payload":{"raised":true,"name":".."}}
/// {"type":"name-update","payload":{"name":".."}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ControlMessage {
    Chat(ChatPayload),
    HandRaise(HandRaisePayload),
    #[serde(rename = "name-update")]
    Presence(PresencePayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandRaisePayload {
    pub raised: bool,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub name: String,
}

impl ControlMessage {
    pub fn chat(sender: &str, text: &str) -> Self {
        Self::Chat(ChatPayload::new(sender, text))
    }

    pub fn hand_raise(raised: bool, name: &str) -> Self {
        Self::HandRaise(HandRaisePayload {
            raised,
            name: name.to_string(),
        })
    }

    pub fn presence(name: &str) -> Self {
        Self::Presence(PresencePayload {
            name: name.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::HandRaise(_) => "hand-raise",
            Self::Presence(_) => "name-update",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ChatPayload {
    /// A new message with a fresh id, stamped now.
    pub fn new(sender: &str, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn into_message(self, is_local: bool) -> ChatMessage {
        ChatMessage {
            id: self.id,
            sender: self.sender,
            text: self.text,
            timestamp: self.timestamp,
            is_local,
        }
    }
}

/// Ordered chat history for one session. Ids are unique.
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    ids: HashSet<String>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless a message with the same id is already present.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }
}
