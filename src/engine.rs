//! Conversation state synchronization engine
//!
//! [`SyncEngine`] owns the ledger, presence and the single error slot. The
//! renderer never mutates any of it directly: it reads [`ViewSnapshot`]s
//! published over a watch channel and calls engine actions. Every mutation is
//! applied under one lock and published as a whole new snapshot, so readers
//! never observe a half-updated bucket.

mod pipeline;
mod reconcile;
#[cfg(test)]
pub(crate) mod testing;

pub use pipeline::{RenderedMessage, SendOutcome};

use crate::config::{ClientConfig, RollbackPolicy};
use crate::ledger::Ledger;
use crate::message::{ConversationKey, Message, MessageStatus, User};
use crate::persist::{SnapshotStore, StoreError};
use crate::realtime::{ChannelEvent, ClientEvent, Dispatcher, EventKind, IncomingMessage, Presence};
use crate::remote::{ChatApi, RemoteError};
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

/// Remote step an error or cancellation is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Embed,
    Deliver,
    Render,
    History,
    ListUsers,
}

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::Embed => "embed",
            PipelineStep::Deliver => "deliver",
            PipelineStep::Render => "render",
            PipelineStep::History => "history",
            PipelineStep::ListUsers => "list_users",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No active user")]
    NoActiveUser,
    #[error("No recipient selected")]
    NoRecipient,
    #[error("Message text is empty")]
    EmptyMessage,
    #[error("{step} failed: {source}")]
    Remote {
        step: PipelineStep,
        #[source]
        source: RemoteError,
    },
    #[error("{step} was cancelled")]
    Cancelled { step: PipelineStep },
    #[error("Snapshot store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Rejected before any network call or state change
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            EngineError::NoActiveUser | EngineError::NoRecipient | EngineError::EmptyMessage
        )
    }

    /// Text shown in the error slot
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NoActiveUser => "Select a user first".to_string(),
            EngineError::NoRecipient => "Select a recipient first".to_string(),
            EngineError::EmptyMessage => "Message is empty".to_string(),
            EngineError::Remote { step, source } => {
                let action = match step {
                    PipelineStep::Embed => "send message",
                    PipelineStep::Deliver => "deliver message",
                    PipelineStep::Render => "render message",
                    PipelineStep::History => "load history",
                    PipelineStep::ListUsers => "load users",
                };
                format!("Failed to {action}: {}", source.message)
            }
            EngineError::Cancelled { .. } => "Request was cancelled".to_string(),
            EngineError::Store(_) => "Failed to access local state".to_string(),
        }
    }
}

/// Everything the renderer needs, captured at one instant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSnapshot {
    pub current_user: Option<String>,
    pub recipient: Option<String>,
    pub active_key: Option<ConversationKey>,
    /// Active conversation in display order
    pub messages: Vec<Message>,
    pub users: Vec<User>,
    pub online_users: Vec<String>,
    pub typing_users: Vec<String>,
    pub connected: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Engine knobs taken from [`ClientConfig`]
#[derive(Debug, Clone)]
struct Settings {
    lang_hint: String,
    rollback: RollbackPolicy,
    render_after_deliver: bool,
}

struct EngineState {
    current_user: Option<String>,
    recipient: Option<String>,
    thread_id: Option<String>,
    ledger: Ledger,
    presence: Presence,
    users: Vec<User>,
    connected: bool,
    loading: u32,
    error: Option<String>,
    /// Cancels in-flight remote steps of the current conversation
    cancel: CancellationToken,
}

impl EngineState {
    fn new(typing_ttl: Duration) -> Self {
        Self {
            current_user: None,
            recipient: None,
            thread_id: None,
            ledger: Ledger::new(),
            presence: Presence::new(typing_ttl),
            users: Vec::new(),
            connected: false,
            loading: 0,
            error: None,
            cancel: CancellationToken::new(),
        }
    }

    fn active_key(&self) -> Option<ConversationKey> {
        match (&self.current_user, &self.recipient) {
            (Some(user), Some(recipient)) => Some(ConversationKey::new(user, recipient)),
            _ => None,
        }
    }

    fn reset_cancel(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }

    fn view_snapshot(&self, now: Instant) -> ViewSnapshot {
        ViewSnapshot {
            current_user: self.current_user.clone(),
            recipient: self.recipient.clone(),
            active_key: self.ledger.active_key().cloned(),
            messages: self.ledger.view().to_vec(),
            users: self.users.clone(),
            online_users: self.presence.online().map(String::from).collect(),
            typing_users: self.presence.typing_users(now),
            connected: self.connected,
            is_loading: self.loading > 0,
            error: self.error.clone(),
        }
    }
}

struct Shared<A> {
    api: A,
    settings: Settings,
    state: Mutex<EngineState>,
    updates: watch::Sender<Arc<ViewSnapshot>>,
    store: Option<Arc<dyn SnapshotStore>>,
    /// Held from taking a ledger snapshot until it is written
    save_lock: Mutex<()>,
    outbound: Mutex<Option<mpsc::Sender<ClientEvent>>>,
}

/// Handle to the engine. Clones share the same state.
pub struct SyncEngine<A> {
    inner: Arc<Shared<A>>,
}

impl<A> Clone for SyncEngine<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: ChatApi> SyncEngine<A> {
    pub fn new(api: A, config: &ClientConfig, store: Option<Arc<dyn SnapshotStore>>) -> Self {
        let state = EngineState::new(config.typing_ttl);
        let (updates, _) = watch::channel(Arc::new(state.view_snapshot(Instant::now())));
        Self {
            inner: Arc::new(Shared {
                api,
                settings: Settings {
                    lang_hint: config.lang_hint.clone(),
                    rollback: config.rollback,
                    render_after_deliver: config.render_after_deliver,
                },
                state: Mutex::new(state),
                updates,
                store,
                save_lock: Mutex::new(()),
                outbound: Mutex::new(None),
            }),
        }
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    // ==================== Observation ====================

    pub fn snapshot(&self) -> Arc<ViewSnapshot> {
        self.inner.updates.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<ViewSnapshot>> {
        self.inner.updates.subscribe()
    }

    /// Stream of snapshots, starting with the current one
    pub fn subscribe(&self) -> WatchStream<Arc<ViewSnapshot>> {
        WatchStream::new(self.watch())
    }

    /// Merged history of `key`, independent of what is currently displayed
    pub fn conversation(&self, key: &ConversationKey) -> Vec<Message> {
        self.state().ledger.conversation(key).to_vec()
    }

    // ==================== Selection ====================

    /// Switch the acting identity. Clears the recipient and the active view.
    pub fn set_current_user(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        tracing::info!(user_id = %user_id, "Active user set");
        self.update(|state| {
            state.reset_cancel();
            state.current_user = Some(user_id);
            state.recipient = None;
            state.thread_id = None;
            state.ledger.clear_active();
        });
    }

    /// Select the counterpart and open that conversation. In-flight steps of
    /// the previous conversation are cancelled.
    pub fn select_recipient(&self, recipient_id: impl Into<String>) {
        let recipient_id = recipient_id.into();
        self.update(|state| {
            state.reset_cancel();
            state.recipient = Some(recipient_id);
            state.thread_id = None;
            match state.active_key() {
                Some(key) => {
                    tracing::debug!(key = %key, "Conversation opened");
                    state.ledger.open(key);
                }
                None => state.ledger.clear_active(),
            }
        });
    }

    /// Override the thread id sent with deliveries. Defaults to the key.
    pub fn set_thread(&self, thread_id: impl Into<String>) {
        let thread_id = thread_id.into();
        self.update(|state| state.thread_id = Some(thread_id));
    }

    /// Empty the visible list. Buckets keep their history.
    pub fn clear_active(&self) {
        self.update(|state| {
            state.reset_cancel();
            state.recipient = None;
            state.thread_id = None;
            state.ledger.clear_active();
        });
    }

    /// Abort outstanding remote steps without changing the selection
    pub fn cancel_in_flight(&self) {
        self.update(EngineState::reset_cancel);
    }

    pub fn clear_error(&self) {
        self.update(|state| state.error = None);
    }

    /// Fetch the user directory
    pub async fn load_users(&self) -> Result<Vec<User>, EngineError> {
        let token = self.state().cancel.clone();
        let _loading = self.begin_loading();
        match race_step(PipelineStep::ListUsers, &token, self.inner.api.list_users()).await {
            Ok(users) => {
                tracing::info!(count = users.len(), "Users loaded");
                self.update(|state| state.users.clone_from(&users));
                Ok(users)
            }
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    // ==================== Realtime ====================

    /// Register one handler per event kind. Calling this again replaces the
    /// previous handlers.
    pub fn register_handlers(&self, dispatcher: &mut Dispatcher)
    where
        A: 'static,
    {
        for kind in EventKind::ALL {
            let engine = self.clone();
            dispatcher.register(kind, move |event| engine.apply_event(event));
        }
    }

    /// Route outbound client events (typing, read receipts) to a channel
    pub fn attach_channel(&self, sender: mpsc::Sender<ClientEvent>) {
        *self.outbound() = Some(sender);
    }

    pub fn detach_channel(&self) {
        *self.outbound() = None;
    }

    /// Apply one validated push event
    pub fn apply_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::NewMessage(incoming) => self.ingest(incoming),
            ChannelEvent::MessageDelivered { message_id } => {
                self.set_status(&message_id, MessageStatus::Delivered);
            }
            ChannelEvent::MessageRead { message_id } => {
                self.set_status(&message_id, MessageStatus::Read);
            }
            ChannelEvent::UserStatus { user_id, status } => {
                self.update(|state| state.presence.set_status(&user_id, status));
            }
            ChannelEvent::UserTyping { user_id, is_typing } => {
                let now = Instant::now();
                self.update(|state| {
                    state.presence.prune(now);
                    state.presence.set_typing(&user_id, is_typing, now);
                });
            }
            ChannelEvent::OnlineUsers { users } => {
                self.update(|state| state.presence.replace_online(users));
            }
            ChannelEvent::ConnectionEstablished { sid } => {
                tracing::info!(sid = ?sid, "Realtime channel established");
                self.update(|state| state.connected = true);
            }
            ChannelEvent::Disconnected { reason } => self.handle_disconnect(&reason),
        }
    }

    /// Drop ephemeral presence. Ledger data is never touched.
    pub fn handle_disconnect(&self, reason: &str) {
        tracing::warn!(reason, "Realtime channel lost");
        self.update(|state| {
            state.connected = false;
            state.presence.clear();
        });
    }

    /// Drop expired typing entries
    pub fn prune_presence(&self) {
        let now = Instant::now();
        let removed = self.update(|state| state.presence.prune(now));
        if removed > 0 {
            tracing::debug!(removed, "Expired typing entries pruned");
        }
    }

    /// Send a read receipt for a received message. Returns false when the
    /// message is unknown or no channel is attached.
    pub fn mark_read(&self, message_id: &str) -> bool {
        let sender_id = self
            .state()
            .ledger
            .all_messages()
            .find(|m| m.id == message_id && !m.is_sent())
            .map(|m| m.sender_id.clone());
        let Some(sender_id) = sender_id else {
            tracing::debug!(message_id, "Read receipt for unknown message");
            return false;
        };
        self.emit(ClientEvent::MessageRead {
            message_id: message_id.to_string(),
            sender_id,
        })
    }

    pub fn notify_typing(&self, is_typing: bool) -> bool {
        let recipient_id = self.state().recipient.clone();
        self.emit(ClientEvent::TypingStatus {
            is_typing,
            recipient_id,
        })
    }

    pub fn request_online_users(&self) -> bool {
        self.emit(ClientEvent::GetOnlineUsers {})
    }

    fn emit(&self, event: ClientEvent) -> bool {
        let Some(sender) = self.outbound().clone() else {
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to queue client event");
                false
            }
        }
    }

    fn ingest(&self, incoming: IncomingMessage) {
        self.mutate_ledger(|state| {
            let Some(user) = state.current_user.clone() else {
                tracing::debug!(message_id = %incoming.message_id, "New message dropped without an active user");
                return;
            };
            if incoming.sender_id == user {
                tracing::debug!(message_id = %incoming.message_id, "Ignoring echo of own message");
                return;
            }
            let key = ConversationKey::new(&user, &incoming.sender_id);
            let message = Message::received(
                incoming.message_id,
                incoming.sender_id,
                incoming.text,
                incoming.summary,
                incoming.created_at.unwrap_or_else(Utc::now),
            );
            tracing::info!(message_id = %message.id, key = %key, "Message received");
            state.ledger.record_received(&key, message);
        });
    }

    fn set_status(&self, message_id: &str, status: MessageStatus) {
        let changed = self.mutate_ledger(|state| state.ledger.update_status(message_id, status));
        tracing::debug!(message_id, status = %status, changed, "Status update applied");
    }

    // ==================== Persistence ====================

    /// Load the persisted ledger. Missing or corrupt snapshots leave the
    /// engine empty.
    pub fn restore(&self) -> bool {
        let Some(store) = &self.inner.store else {
            return false;
        };
        match store.load() {
            Ok(Some(snapshot)) => {
                let ledger = Ledger::from_snapshot(snapshot);
                tracing::info!(messages = ledger.len(), "Ledger restored");
                self.update(|state| state.ledger = ledger);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable snapshot");
                false
            }
        }
    }

    /// Save the ledger now
    pub fn persist(&self) -> Result<(), EngineError> {
        if let Some(store) = &self.inner.store {
            let _saving = self.saving();
            let snapshot = self.state().ledger.snapshot();
            store.save(&snapshot)?;
        }
        Ok(())
    }

    // ==================== Internals ====================

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::Sender<ClientEvent>>> {
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` under the lock, then publish a fresh snapshot
    fn update<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state();
            let result = f(&mut state);
            (result, state.view_snapshot(Instant::now()))
        };
        self.inner.updates.send_replace(Arc::new(snapshot));
        result
    }

    fn saving(&self) -> MutexGuard<'_, ()> {
        self.inner
            .save_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Like [`Self::update`], then save the ledger when a store is attached.
    /// Saves are serialized so the store always ends at the latest ledger.
    fn mutate_ledger<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let Some(store) = &self.inner.store else {
            return self.update(f);
        };
        let _saving = self.saving();
        let (result, snapshot) = self.update(|state| {
            let result = f(state);
            (result, state.ledger.snapshot())
        });
        if let Err(e) = store.save(&snapshot) {
            tracing::warn!(error = %e, "Failed to persist ledger");
        }
        result
    }

    fn report(&self, error: &EngineError) {
        match error {
            EngineError::Cancelled { step } => {
                tracing::info!(step = %step, "Remote step cancelled");
            }
            e if e.is_precondition() => {}
            e => {
                let message = e.user_message();
                self.update(|state| state.error = Some(message));
            }
        }
    }

    fn begin_loading(&self) -> LoadingGuard<'_, A> {
        self.update(|state| state.loading += 1);
        LoadingGuard { engine: self }
    }
}

/// Clears the loading flag when the operation ends, however it ends
struct LoadingGuard<'a, A: ChatApi> {
    engine: &'a SyncEngine<A>,
}

impl<A: ChatApi> Drop for LoadingGuard<'_, A> {
    fn drop(&mut self) {
        self.engine
            .update(|state| state.loading = state.loading.saturating_sub(1));
    }
}

/// Run one remote step unless `token` fires first
async fn race_step<T, F>(
    step: PipelineStep,
    token: &CancellationToken,
    call: F,
) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(EngineError::Cancelled { step }),
        result = call => result.map_err(|source| EngineError::Remote { step, source }),
    }
}
