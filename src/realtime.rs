//! Realtime channel contract
//!
//! Push events arrive as JSON text frames `{"event": "<kind>", "data": {...}}`.
//! Frames are validated here, at the boundary, into [`ChannelEvent`] before
//! anything touches the ledger. Unknown kinds are dropped, malformed payloads
//! are reported as [`FrameError`] and never panic.

mod dispatch;
mod presence;
pub mod socket;

pub use dispatch::{Dispatcher, Handler};
pub use presence::{Presence, PresenceStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Discriminant of a [`ChannelEvent`], used to key handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    MessageDelivered,
    MessageRead,
    UserStatus,
    UserTyping,
    OnlineUsers,
    ConnectionEstablished,
    /// Local-only: the transport went away
    Disconnected,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::NewMessage,
        EventKind::MessageDelivered,
        EventKind::MessageRead,
        EventKind::UserStatus,
        EventKind::UserTyping,
        EventKind::OnlineUsers,
        EventKind::ConnectionEstablished,
        EventKind::Disconnected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NewMessage => "new_message",
            EventKind::MessageDelivered => "message_delivered",
            EventKind::MessageRead => "message_read",
            EventKind::UserStatus => "user_status",
            EventKind::UserTyping => "user_typing",
            EventKind::OnlineUsers => "online_users",
            EventKind::ConnectionEstablished => "connection_established",
            EventKind::Disconnected => "disconnected",
        }
    }

    /// Kinds the server may push. `Disconnected` is never accepted off the wire.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "new_message" => Some(EventKind::NewMessage),
            "message_delivered" => Some(EventKind::MessageDelivered),
            "message_read" => Some(EventKind::MessageRead),
            "user_status" => Some(EventKind::UserStatus),
            "user_typing" => Some(EventKind::UserTyping),
            "online_users" => Some(EventKind::OnlineUsers),
            "connection_established" => Some(EventKind::ConnectionEstablished),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message pushed to this device by another participant
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IncomingMessage {
    pub message_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// Server timestamp; the receive time is used when absent
    #[serde(default, deserialize_with = "crate::remote::timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Validated push event
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    NewMessage(IncomingMessage),
    MessageDelivered { message_id: String },
    MessageRead { message_id: String },
    UserStatus { user_id: String, status: PresenceStatus },
    UserTyping { user_id: String, is_typing: bool },
    OnlineUsers { users: Vec<String> },
    ConnectionEstablished { sid: Option<String> },
    Disconnected { reason: String },
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::NewMessage(_) => EventKind::NewMessage,
            ChannelEvent::MessageDelivered { .. } => EventKind::MessageDelivered,
            ChannelEvent::MessageRead { .. } => EventKind::MessageRead,
            ChannelEvent::UserStatus { .. } => EventKind::UserStatus,
            ChannelEvent::UserTyping { .. } => EventKind::UserTyping,
            ChannelEvent::OnlineUsers { .. } => EventKind::OnlineUsers,
            ChannelEvent::ConnectionEstablished { .. } => EventKind::ConnectionEstablished,
            ChannelEvent::Disconnected { .. } => EventKind::Disconnected,
        }
    }

    /// Validate the payload of a known kind
    pub fn from_payload(kind: EventKind, data: Value) -> Result<Self, FrameError> {
        let malformed = |e: serde_json::Error| FrameError::Malformed {
            kind: kind.as_str(),
            reason: e.to_string(),
        };
        let event = match kind {
            EventKind::NewMessage => {
                ChannelEvent::NewMessage(serde_json::from_value(data).map_err(malformed)?)
            }
            EventKind::MessageDelivered => {
                let p: MessageIdPayload = serde_json::from_value(data).map_err(malformed)?;
                ChannelEvent::MessageDelivered { message_id: p.message_id }
            }
            EventKind::MessageRead => {
                let p: MessageIdPayload = serde_json::from_value(data).map_err(malformed)?;
                ChannelEvent::MessageRead { message_id: p.message_id }
            }
            EventKind::UserStatus => {
                let p: UserStatusPayload = serde_json::from_value(data).map_err(malformed)?;
                ChannelEvent::UserStatus { user_id: p.user_id, status: p.status }
            }
            EventKind::UserTyping => {
                let p: UserTypingPayload = serde_json::from_value(data).map_err(malformed)?;
                ChannelEvent::UserTyping { user_id: p.user_id, is_typing: p.is_typing }
            }
            EventKind::OnlineUsers => {
                let p: OnlineUsersPayload = serde_json::from_value(data).map_err(malformed)?;
                ChannelEvent::OnlineUsers { users: p.users }
            }
            EventKind::ConnectionEstablished => {
                let p: ConnectionPayload = if data.is_null() {
                    ConnectionPayload::default()
                } else {
                    serde_json::from_value(data).map_err(malformed)?
                };
                ChannelEvent::ConnectionEstablished { sid: p.sid }
            }
            EventKind::Disconnected => return Err(FrameError::LocalOnly),
        };
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), FrameError> {
        let empty = match self {
            ChannelEvent::NewMessage(m) => m.message_id.is_empty() || m.sender_id.is_empty(),
            ChannelEvent::MessageDelivered { message_id }
            | ChannelEvent::MessageRead { message_id } => message_id.is_empty(),
            ChannelEvent::UserStatus { user_id, .. } | ChannelEvent::UserTyping { user_id, .. } => {
                user_id.is_empty()
            }
            _ => false,
        };
        if empty {
            return Err(FrameError::Malformed {
                kind: self.kind().as_str(),
                reason: "empty identifier".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct MessageIdPayload {
    message_id: String,
}

#[derive(Deserialize)]
struct UserStatusPayload {
    user_id: String,
    status: PresenceStatus,
}

#[derive(Deserialize)]
struct UserTypingPayload {
    user_id: String,
    is_typing: bool,
}

#[derive(Deserialize)]
struct OnlineUsersPayload {
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Default, Deserialize)]
struct ConnectionPayload {
    #[serde(default)]
    sid: Option<String>,
}

/// Errors raised while decoding or encoding a frame
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed {kind} payload: {reason}")]
    Malformed { kind: &'static str, reason: String },
    #[error("Event kind is local-only")]
    LocalOnly,
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for event kinds this client does not handle.
pub fn parse_frame(text: &str) -> Result<Option<ChannelEvent>, FrameError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let Some(kind) = EventKind::from_wire(&raw.event) else {
        tracing::debug!(event = %raw.event, "Ignoring unknown channel event");
        return Ok(None);
    };
    ChannelEvent::from_payload(kind, raw.data).map(Some)
}

/// Frames this client sends to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UserRegister {
        user_id: String,
    },
    TypingStatus {
        is_typing: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient_id: Option<String>,
    },
    MessageRead {
        message_id: String,
        sender_id: String,
    },
    GetOnlineUsers {},
}

impl ClientEvent {
    pub fn to_frame(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}
