//! Remote chat API
//!
//! The engine only talks to the server through [`ChatApi`], so tests can
//! swap in a mock and production code uses [`HttpChatApi`].

mod error;
mod http;
mod types;

pub use error::{RemoteError, RemoteErrorKind};
pub use http::HttpChatApi;
pub use types::*;
pub(crate) use types::timestamp;

use crate::message::User;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Remote operations consumed by the sync engine.
///
/// `user_id` is the acting user and travels as the `X-User-ID` header.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Summarize and embed outgoing text, returning the canonical message id
    async fn embed(&self, user_id: &str, request: &EmbedRequest)
        -> Result<EmbedResponse, RemoteError>;

    /// Notify the recipient's side that a message exists
    async fn deliver(&self, user_id: &str, request: &DeliverRequest)
        -> Result<DeliverAck, RemoteError>;

    /// Produce a recipient-styled reconstruction of a message
    async fn render(&self, user_id: &str, request: &RenderRequest)
        -> Result<RenderResponse, RemoteError>;

    /// Settled history for `user_id`, optionally scoped to one counterpart
    async fn history(
        &self,
        user_id: &str,
        recipient_id: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError>;

    async fn list_users(&self) -> Result<Vec<User>, RemoteError>;
}

#[async_trait]
impl<T: ChatApi + ?Sized> ChatApi for Arc<T> {
    async fn embed(
        &self,
        user_id: &str,
        request: &EmbedRequest,
    ) -> Result<EmbedResponse, RemoteError> {
        (**self).embed(user_id, request).await
    }

    async fn deliver(
        &self,
        user_id: &str,
        request: &DeliverRequest,
    ) -> Result<DeliverAck, RemoteError> {
        (**self).deliver(user_id, request).await
    }

    async fn render(
        &self,
        user_id: &str,
        request: &RenderRequest,
    ) -> Result<RenderResponse, RemoteError> {
        (**self).render(user_id, request).await
    }

    async fn history(
        &self,
        user_id: &str,
        recipient_id: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError> {
        (**self).history(user_id, recipient_id).await
    }

    async fn list_users(&self) -> Result<Vec<User>, RemoteError> {
        (**self).list_users().await
    }
}

/// Logging wrapper for any [`ChatApi`]
pub struct LoggingApi<A> {
    inner: A,
}

impl<A: ChatApi> LoggingApi<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

fn log_outcome<T>(operation: &str, user_id: &str, started: Instant, result: &Result<T, RemoteError>) {
    let duration_ms = started.elapsed().as_millis();
    match result {
        Ok(_) => {
            tracing::info!(operation, user_id, duration_ms = %duration_ms, "Remote call completed");
        }
        Err(e) => {
            tracing::error!(
                operation,
                user_id,
                duration_ms = %duration_ms,
                error = %e.message,
                status = ?e.status,
                transient = e.kind.is_transient(),
                "Remote call failed"
            );
        }
    }
}

#[async_trait]
impl<A: ChatApi> ChatApi for LoggingApi<A> {
    async fn embed(
        &self,
        user_id: &str,
        request: &EmbedRequest,
    ) -> Result<EmbedResponse, RemoteError> {
        let started = Instant::now();
        let result = self.inner.embed(user_id, request).await;
        log_outcome("embed", user_id, started, &result);
        result
    }

    async fn deliver(
        &self,
        user_id: &str,
        request: &DeliverRequest,
    ) -> Result<DeliverAck, RemoteError> {
        let started = Instant::now();
        let result = self.inner.deliver(user_id, request).await;
        log_outcome("deliver", user_id, started, &result);
        result
    }

    async fn render(
        &self,
        user_id: &str,
        request: &RenderRequest,
    ) -> Result<RenderResponse, RemoteError> {
        let started = Instant::now();
        let result = self.inner.render(user_id, request).await;
        log_outcome("render", user_id, started, &result);
        result
    }

    async fn history(
        &self,
        user_id: &str,
        recipient_id: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError> {
        let started = Instant::now();
        let result = self.inner.history(user_id, recipient_id).await;
        log_outcome("history", user_id, started, &result);
        result
    }

    async fn list_users(&self) -> Result<Vec<User>, RemoteError> {
        let started = Instant::now();
        let result = self.inner.list_users().await;
        log_outcome("list_users", "-", started, &result);
        result
    }
}
