//! Request and response shapes of the chat HTTP API

use crate::message::{Message, MessageStatus, MessageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/embed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedRequest {
    pub text: String,
    pub lang_hint: String,
}

/// Result of summarizing and embedding outgoing text
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbedResponse {
    pub message_id: String,
    pub summary: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub vector_id: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
}

/// Body of `POST /api/v1/deliver`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliverRequest {
    pub to_user_id: String,
    pub message_id: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeliverAck {
    pub status: String,
    #[serde(default)]
    pub delivery_id: Option<String>,
}

/// Body of `POST /api/v1/render`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderRequest {
    pub message_id: String,
    pub recipient_id: String,
}

/// Recipient-styled reconstruction of a message
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderResponse {
    pub text: String,
    pub style_applied: String,
    pub confidence: f64,
}

/// One settled message from server history
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub user_id: String,
    pub text: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    pub content_type: String,
}

impl HistoryRecord {
    /// Content type marking text authored on the requesting device
    pub const ORIGINAL: &'static str = "original";

    /// Server history is settled, so every record lands as `read`.
    pub fn into_message(self) -> Message {
        let message_type = if self.content_type == Self::ORIGINAL {
            MessageType::Sent
        } else {
            MessageType::Received
        };
        Message {
            id: self.id,
            sender_id: self.user_id,
            text: self.text,
            summary: None,
            created_at: self.created_at,
            status: MessageStatus::Read,
            message_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<HistoryRecord>,
}

/// Timestamps arrive either as RFC 3339 or as naive ISO 8601 in UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
            None => Ok(None),
        }
    }
}
