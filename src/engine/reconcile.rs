//! Reconciliation of client-held messages with server history

#[cfg(test)]
mod proptests;

use super::{race_step, EngineError, PipelineStep, SyncEngine};
use crate::ledger::{merge_messages, Ledger};
use crate::message::{ConversationKey, Message};
use crate::remote::{ChatApi, HistoryRecord};

/// Merge `server` history into `ledger` and rebuild the active view.
///
/// Client copies win on id conflicts. With a recipient, server-only records
/// are appended to that conversation's buckets and the conversation becomes
/// the active one; without one, every client-held message is merged into a
/// view detached from any conversation and the buckets are left alone.
/// Returns the size of the resulting view.
pub(crate) fn reconcile(
    ledger: &mut Ledger,
    user_id: &str,
    recipient_id: Option<&str>,
    server: Vec<Message>,
) -> usize {
    if let Some(recipient) = recipient_id {
        let key = ConversationKey::new(user_id, recipient);
        for message in server {
            if !ledger.contains(&key, &message.id) {
                ledger.record(&key, message);
            }
        }
        ledger.open(key);
    } else {
        let merged = merge_messages(ledger.all_messages().cloned().chain(server));
        ledger.show_detached(merged);
    }
    ledger.view().len()
}

/// View built from client state alone, used when history cannot be fetched
pub(crate) fn client_only(ledger: &mut Ledger, user_id: &str, recipient_id: Option<&str>) {
    if let Some(recipient) = recipient_id {
        ledger.open(ConversationKey::new(user_id, recipient));
    } else {
        let merged = merge_messages(ledger.all_messages().cloned());
        ledger.show_detached(merged);
    }
}

impl<A: ChatApi> SyncEngine<A> {
    /// Pull authoritative history and merge it into the ledger.
    ///
    /// Safe to repeat: identical server data yields an identical view. On
    /// failure the view falls back to client-held messages and the error slot
    /// is set; nothing already held is discarded.
    pub async fn sync_from_server(
        &self,
        user_id: &str,
        recipient_id: Option<&str>,
    ) -> Result<usize, EngineError> {
        let token = self.state().cancel.clone();
        let _loading = self.begin_loading();

        let fetched = race_step(
            PipelineStep::History,
            &token,
            self.inner.api.history(user_id, recipient_id),
        )
        .await;

        match fetched {
            Ok(history) => {
                let server: Vec<Message> = history
                    .messages
                    .into_iter()
                    .map(HistoryRecord::into_message)
                    .collect();
                let fetched_count = server.len();
                let view_len = self.mutate_ledger(|state| {
                    reconcile(&mut state.ledger, user_id, recipient_id, server)
                });
                tracing::info!(
                    user_id,
                    recipient_id = ?recipient_id,
                    fetched = fetched_count,
                    view = view_len,
                    "History reconciled"
                );
                Ok(view_len)
            }
            Err(e @ EngineError::Cancelled { .. }) => {
                self.report(&e);
                Err(e)
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "History sync failed, showing local messages");
                self.mutate_ledger(|state| client_only(&mut state.ledger, user_id, recipient_id));
                self.report(&e);
                Err(e)
            }
        }
    }
}
