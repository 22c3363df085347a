//! Message data model shared by the ledger, pipeline and realtime layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery status of a message.
///
/// Outgoing messages move `Sent -> Delivered -> Read`. Incoming messages
/// enter at `Received` and stay there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Received,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Received => "received",
        }
    }

    /// Position in the outgoing progression, `None` for incoming messages
    pub fn rank(self) -> Option<u8> {
        match self {
            MessageStatus::Sent => Some(0),
            MessageStatus::Delivered => Some(1),
            MessageStatus::Read => Some(2),
            MessageStatus::Received => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a message, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Original text typed on this device
    Sent,
    /// Text rendered for this device as incoming
    Received,
}

/// A single chat message as held by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub message_type: MessageType,
}

impl Message {
    /// Outgoing message recorded right after a successful embed
    pub fn sent(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
        summary: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            text: text.into(),
            summary,
            created_at,
            status: MessageStatus::Sent,
            message_type: MessageType::Sent,
        }
    }

    /// Incoming message pushed by the realtime channel
    pub fn received(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
        summary: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            text: text.into(),
            summary,
            created_at,
            status: MessageStatus::Received,
            message_type: MessageType::Received,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.message_type == MessageType::Sent
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }
}

/// Canonical identifier of a two-party conversation.
///
/// Both participants resolve to the same key regardless of argument order.
/// The ids are joined with `:`; a `:` or `\` inside an id is escaped with
/// `\` so distinct pairs never share a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let mut key = String::with_capacity(low.len() + high.len() + 1);
        escape_into(&mut key, low);
        key.push(KEY_SEPARATOR);
        escape_into(&mut key, high);
        Self(key)
    }

    /// The two participant ids, lower first. `None` for a malformed key.
    pub fn participants(&self) -> Option<(String, String)> {
        let mut low = None;
        let mut current = String::new();
        let mut chars = self.0.chars();
        while let Some(c) = chars.next() {
            match c {
                KEY_ESCAPE => current.push(chars.next()?),
                KEY_SEPARATOR if low.is_none() => low = Some(std::mem::take(&mut current)),
                KEY_SEPARATOR => return None,
                c => current.push(c),
            }
        }
        Some((low?, current))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `user_id` is one of the two participants
    pub fn involves(&self, user_id: &str) -> bool {
        self.participants()
            .is_some_and(|(a, b)| a == user_id || b == user_id)
    }
}

const KEY_SEPARATOR: char = ':';
const KEY_ESCAPE: char = '\\';

fn escape_into(key: &mut String, id: &str) {
    for c in id.chars() {
        if c == KEY_SEPARATOR || c == KEY_ESCAPE {
            key.push(KEY_ESCAPE);
        }
        key.push(c);
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat participant as listed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_style_preset")]
    pub style_preset: String,
}

fn default_language() -> String {
    "ja".to_string()
}

fn default_style_preset() -> String {
    "biz_formal".to_string()
}
