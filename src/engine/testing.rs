//! Mock chat API for engine tests
//!
//! Responses are queued per operation and every call is recorded, so tests
//! can assert both on engine state and on what went over the wire.

use crate::message::User;
use crate::remote::{
    ChatApi, DeliverAck, DeliverRequest, EmbedRequest, EmbedResponse, HistoryRecord,
    HistoryResponse, RemoteError, RenderRequest, RenderResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Embed { user_id: String, request: EmbedRequest },
    Deliver { user_id: String, request: DeliverRequest },
    Render { user_id: String, request: RenderRequest },
    History { user_id: String, recipient_id: Option<String> },
    ListUsers,
}

type Queue<T> = Mutex<VecDeque<Result<T, RemoteError>>>;

#[derive(Default)]
pub struct MockChatApi {
    embeds: Queue<EmbedResponse>,
    deliveries: Queue<DeliverAck>,
    renders: Queue<RenderResponse>,
    histories: Queue<HistoryResponse>,
    users: Queue<Vec<User>>,
    calls: Mutex<Vec<ApiCall>>,
    delay: Option<Duration>,
    /// Notified each time a call starts (for cancellation tests)
    pub call_started: Arc<Notify>,
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn embedded(message_id: &str, summary: &str, secs: i64) -> EmbedResponse {
    EmbedResponse {
        message_id: message_id.to_string(),
        summary: summary.to_string(),
        created_at: at(secs),
        vector_id: None,
        processing_time_ms: None,
    }
}

pub fn delivered() -> DeliverAck {
    DeliverAck {
        status: "delivered".to_string(),
        delivery_id: None,
    }
}

pub fn rendered(text: &str) -> RenderResponse {
    RenderResponse {
        text: text.to_string(),
        style_applied: "biz_formal".to_string(),
        confidence: 0.9,
    }
}

pub fn history_record(id: &str, user_id: &str, content_type: &str, secs: i64) -> HistoryRecord {
    HistoryRecord {
        id: id.to_string(),
        user_id: user_id.to_string(),
        text: format!("text of {id}"),
        created_at: at(secs),
        content_type: content_type.to_string(),
    }
}

impl MockChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` after announcing itself
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn queue_embed(&self, result: Result<EmbedResponse, RemoteError>) {
        self.embeds.lock().unwrap().push_back(result);
    }

    pub fn queue_deliver(&self, result: Result<DeliverAck, RemoteError>) {
        self.deliveries.lock().unwrap().push_back(result);
    }

    pub fn queue_render(&self, result: Result<RenderResponse, RemoteError>) {
        self.renders.lock().unwrap().push_back(result);
    }

    pub fn queue_history(&self, result: Result<HistoryResponse, RemoteError>) {
        self.histories.lock().unwrap().push_back(result);
    }

    pub fn queue_users(&self, result: Result<Vec<User>, RemoteError>) {
        self.users.lock().unwrap().push_back(result);
    }

    /// Queue a successful embed, deliver and render
    pub fn queue_send(&self, message_id: &str, summary: &str, secs: i64) {
        self.queue_embed(Ok(embedded(message_id, summary, secs)));
        self.queue_deliver(Ok(delivered()));
        self.queue_render(Ok(rendered("styled")));
    }

    pub fn recorded_calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn respond<T>(&self, call: ApiCall, queue: &Queue<T>) -> Result<T, RemoteError> {
        self.calls.lock().unwrap().push(call);
        self.call_started.notify_one();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::network("No mock response queued")))
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn embed(&self, user_id: &str, request: &EmbedRequest) -> Result<EmbedResponse, RemoteError> {
        let call = ApiCall::Embed {
            user_id: user_id.to_string(),
            request: request.clone(),
        };
        self.respond(call, &self.embeds).await
    }

    async fn deliver(&self, user_id: &str, request: &DeliverRequest) -> Result<DeliverAck, RemoteError> {
        let call = ApiCall::Deliver {
            user_id: user_id.to_string(),
            request: request.clone(),
        };
        self.respond(call, &self.deliveries).await
    }

    async fn render(&self, user_id: &str, request: &RenderRequest) -> Result<RenderResponse, RemoteError> {
        let call = ApiCall::Render {
            user_id: user_id.to_string(),
            request: request.clone(),
        };
        self.respond(call, &self.renders).await
    }

    async fn history(
        &self,
        user_id: &str,
        recipient_id: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError> {
        let call = ApiCall::History {
            user_id: user_id.to_string(),
            recipient_id: recipient_id.map(String::from),
        };
        self.respond(call, &self.histories).await
    }

    async fn list_users(&self) -> Result<Vec<User>, RemoteError> {
        self.respond(ApiCall::ListUsers, &self.users).await
    }
}
