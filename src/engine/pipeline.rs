//! Send pipeline: embed, optimistic insert, deliver, render
//!
//! The steps run strictly in sequence. The optimistic insert happens before
//! the deliver call, and nothing is retried automatically.

use super::{race_step, EngineError, PipelineStep, SyncEngine};
use crate::config::RollbackPolicy;
use crate::message::{ConversationKey, Message};
use crate::remote::{ChatApi, DeliverAck, DeliverRequest, EmbedRequest, RenderRequest};
use tokio_util::sync::CancellationToken;

/// Recipient-styled reconstruction returned to the caller. It is never
/// written to the sender's own ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub message_id: String,
    pub recipient_id: String,
    pub text: String,
    pub style_applied: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    /// The message as recorded in the ledger
    pub message: Message,
    pub delivery: DeliverAck,
    pub rendered: Option<RenderedMessage>,
}

/// Inputs captured under the lock before the first network call
struct SendContext {
    user_id: String,
    recipient_id: String,
    key: ConversationKey,
    thread_id: String,
    token: CancellationToken,
}

impl<A: ChatApi> SyncEngine<A> {
    /// Run the full pipeline for `text`.
    ///
    /// Precondition failures return immediately with no network call and no
    /// state change. Remote failures land in the error slot.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome, EngineError> {
        let ctx = self.prepare_send(text)?;
        let _loading = self.begin_loading();
        let result = self.run_pipeline(text, &ctx).await;
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    fn prepare_send(&self, text: &str) -> Result<SendContext, EngineError> {
        let state = self.state();
        let user_id = state.current_user.clone().ok_or(EngineError::NoActiveUser)?;
        let recipient_id = state.recipient.clone().ok_or(EngineError::NoRecipient)?;
        if text.trim().is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        let key = ConversationKey::new(&user_id, &recipient_id);
        let thread_id = state
            .thread_id
            .clone()
            .unwrap_or_else(|| key.as_str().to_string());
        Ok(SendContext {
            user_id,
            recipient_id,
            key,
            thread_id,
            token: state.cancel.clone(),
        })
    }

    async fn run_pipeline(&self, text: &str, ctx: &SendContext) -> Result<SendOutcome, EngineError> {
        let api = &self.inner.api;
        let settings = &self.inner.settings;

        let embed_request = EmbedRequest {
            text: text.to_string(),
            lang_hint: settings.lang_hint.clone(),
        };
        let embedded = race_step(
            PipelineStep::Embed,
            &ctx.token,
            api.embed(&ctx.user_id, &embed_request),
        )
        .await?;

        let message = Message::sent(
            embedded.message_id,
            ctx.user_id.clone(),
            text,
            Some(embedded.summary),
            embedded.created_at,
        );
        tracing::info!(
            user_id = %ctx.user_id,
            message_id = %message.id,
            key = %ctx.key,
            "Message embedded"
        );
        self.mutate_ledger(|state| state.ledger.record_sent(&ctx.key, message.clone()));

        let deliver_request = DeliverRequest {
            to_user_id: ctx.recipient_id.clone(),
            message_id: message.id.clone(),
            thread_id: ctx.thread_id.clone(),
        };
        let delivery = match race_step(
            PipelineStep::Deliver,
            &ctx.token,
            api.deliver(&ctx.user_id, &deliver_request),
        )
        .await
        {
            Ok(ack) => ack,
            Err(e) => {
                if matches!(e, EngineError::Remote { .. })
                    && settings.rollback == RollbackPolicy::RemoveOnFailure
                {
                    tracing::info!(message_id = %message.id, "Rolling back undelivered message");
                    self.mutate_ledger(|state| state.ledger.remove(&message.id));
                }
                return Err(e);
            }
        };
        tracing::info!(
            message_id = %message.id,
            to_user_id = %ctx.recipient_id,
            status = %delivery.status,
            "Message delivered"
        );

        let rendered = if settings.render_after_deliver {
            let render_request = RenderRequest {
                message_id: message.id.clone(),
                recipient_id: ctx.recipient_id.clone(),
            };
            let response = race_step(
                PipelineStep::Render,
                &ctx.token,
                api.render(&ctx.user_id, &render_request),
            )
            .await?;
            Some(RenderedMessage {
                message_id: message.id.clone(),
                recipient_id: ctx.recipient_id.clone(),
                text: response.text,
                style_applied: response.style_applied,
                confidence: response.confidence,
            })
        } else {
            None
        };

        Ok(SendOutcome {
            message,
            delivery,
            rendered,
        })
    }
}
