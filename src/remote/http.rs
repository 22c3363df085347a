//! reqwest implementation of the chat API

use super::types::{
    DeliverAck, DeliverRequest, EmbedRequest, EmbedResponse, HistoryResponse, RenderRequest,
    RenderResponse,
};
use super::{ChatApi, RemoteError};
use crate::message::User;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for the chat server's `/api/v1` routes
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
}

impl HttpChatApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::unknown(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: format!("{}/api/v1", base_url.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authed(&self, builder: RequestBuilder, user_id: &str) -> RequestBuilder {
        builder
            .header("X-User-ID", user_id)
            .header("X-Request-ID", uuid::Uuid::new_v4().to_string())
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, RemoteError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::network(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                RemoteError::network(format!("Connection failed: {e}"))
            } else {
                RemoteError::unknown(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(RemoteError::from_response(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| RemoteError::decode(format!("Failed to parse response: {e} - body: {body}")))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn embed(
        &self,
        user_id: &str,
        request: &EmbedRequest,
    ) -> Result<EmbedResponse, RemoteError> {
        let builder = self.client.post(self.url("/embed")).json(request);
        self.execute(self.authed(builder, user_id)).await
    }

    async fn deliver(
        &self,
        user_id: &str,
        request: &DeliverRequest,
    ) -> Result<DeliverAck, RemoteError> {
        let builder = self.client.post(self.url("/deliver")).json(request);
        self.execute(self.authed(builder, user_id)).await
    }

    async fn render(
        &self,
        user_id: &str,
        request: &RenderRequest,
    ) -> Result<RenderResponse, RemoteError> {
        let builder = self.client.post(self.url("/render")).json(request);
        self.execute(self.authed(builder, user_id)).await
    }

    async fn history(
        &self,
        user_id: &str,
        recipient_id: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError> {
        let mut query = vec![("user_id", user_id)];
        if let Some(recipient) = recipient_id {
            query.push(("recipient_id", recipient));
        }
        let builder = self.client.get(self.url("/messages/history")).query(&query);
        self.execute(self.authed(builder, user_id)).await
    }

    async fn list_users(&self) -> Result<Vec<User>, RemoteError> {
        self.execute(self.client.get(self.url("/users/"))).await
    }
}
