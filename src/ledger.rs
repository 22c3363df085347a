//! Per-conversation message ledger
//!
//! Each conversation key owns two insertion-ordered buckets, one for messages
//! typed on this device and one for messages rendered for it. Every entry
//! carries a ledger-wide sequence number, so timestamp ties resolve to
//! arrival order across both buckets. The ordered, de-duplicated view a user
//! sees is computed on read.

#[cfg(test)]
mod proptests;

use crate::message::{ConversationKey, Message, MessageStatus, MessageType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Merge messages into display order.
///
/// The first occurrence of an id wins; the survivors are sorted by
/// `created_at` with ties kept in input order.
pub fn merge_messages<I>(messages: I) -> Vec<Message>
where
    I: IntoIterator<Item = Message>,
{
    let mut seen = HashSet::new();
    let mut merged: Vec<Message> = messages
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();
    merged.sort_by_key(|m| m.created_at);
    merged
}

/// Borrowed, ordered view over one conversation.
///
/// Iterating is side-effect free and can be restarted any number of times.
#[derive(Debug, Clone)]
pub struct ConversationView<'a> {
    messages: Vec<&'a Message>,
}

impl<'a> ConversationView<'a> {
    pub fn iter(&self) -> impl Iterator<Item = &'a Message> + '_ {
        self.messages.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().map(|m| (*m).clone()).collect()
    }
}

impl<'v, 'a> IntoIterator for &'v ConversationView<'a> {
    type Item = &'a Message;
    type IntoIter = std::iter::Copied<std::slice::Iter<'v, &'a Message>>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter().copied()
    }
}

/// Bucketed message tagged with its ledger-wide insertion sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(default)]
    pub seq: u64,
    #[serde(flatten)]
    pub message: Message,
}

/// Persisted form of the ledger. Every field is optional on load so a
/// missing or empty snapshot restores to an empty ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// The active view at the time of saving
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub sent_messages: BTreeMap<ConversationKey, Vec<LedgerEntry>>,
    #[serde(default)]
    pub received_messages: BTreeMap<ConversationKey, Vec<LedgerEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_key: Option<ConversationKey>,
}

/// Sent/received buckets per conversation plus the active view
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    sent: BTreeMap<ConversationKey, Vec<LedgerEntry>>,
    received: BTreeMap<ConversationKey, Vec<LedgerEntry>>,
    active: Option<ConversationKey>,
    view: Vec<Message>,
    next_seq: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outgoing message. No de-duplication happens here.
    pub fn record_sent(&mut self, key: &ConversationKey, message: Message) {
        debug_assert_eq!(message.message_type, MessageType::Sent);
        let entry = self.entry(message.clone());
        self.sent.entry(key.clone()).or_default().push(entry);
        self.publish(key, message);
    }

    /// Append an incoming message. No de-duplication happens here.
    pub fn record_received(&mut self, key: &ConversationKey, message: Message) {
        debug_assert_eq!(message.message_type, MessageType::Received);
        let entry = self.entry(message.clone());
        self.received.entry(key.clone()).or_default().push(entry);
        self.publish(key, message);
    }

    /// Route a message to the bucket matching its `message_type`
    pub fn record(&mut self, key: &ConversationKey, message: Message) {
        match message.message_type {
            MessageType::Sent => self.record_sent(key, message),
            MessageType::Received => self.record_received(key, message),
        }
    }

    /// Merged, de-duplicated, time-ordered messages for `key`
    pub fn conversation(&self, key: &ConversationKey) -> ConversationView<'_> {
        let mut entries: Vec<&LedgerEntry> = self.entries(key).collect();
        entries.sort_by_key(|e| e.seq);

        let mut seen = HashSet::new();
        let mut messages: Vec<&Message> = entries
            .into_iter()
            .map(|e| &e.message)
            .filter(|&m| seen.insert(m.id.as_str()))
            .collect();
        messages.sort_by_key(|m| m.created_at);
        ConversationView { messages }
    }

    /// Set the status of every copy of `id`. Returns false when the id is
    /// unknown, which is expected for late or duplicate network events.
    pub fn update_status(&mut self, id: &str, status: MessageStatus) -> bool {
        let mut found = false;
        let buckets = self.sent.values_mut().chain(self.received.values_mut());
        let bucketed = buckets.flatten().map(|e| &mut e.message);
        for message in bucketed.chain(self.view.iter_mut()) {
            if message.id == id {
                if let (Some(from), Some(to)) = (message.status.rank(), status.rank()) {
                    if to < from {
                        tracing::debug!(
                            message_id = %id,
                            from = %message.status,
                            to = %status,
                            "Status update arrived out of order"
                        );
                    }
                }
                message.status = status;
                found = true;
            }
        }
        found
    }

    /// Drop every copy of `id` from the buckets and the view
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.len() + self.view.len();
        for bucket in self.sent.values_mut().chain(self.received.values_mut()) {
            bucket.retain(|e| e.message.id != id);
        }
        self.view.retain(|m| m.id != id);
        before != self.len() + self.view.len()
    }

    /// Make `key` the active conversation and rebuild the view from its buckets
    pub fn open(&mut self, key: ConversationKey) {
        self.view = self.conversation(&key).to_vec();
        self.active = Some(key);
    }

    /// Empty the active view. Buckets are untouched.
    pub fn clear_active(&mut self) {
        self.active = None;
        self.view.clear();
    }

    pub fn active_key(&self) -> Option<&ConversationKey> {
        self.active.as_ref()
    }

    pub fn view(&self) -> &[Message] {
        &self.view
    }

    /// Show `view` without an active conversation. New records are not
    /// published into it; the next [`Self::open`] replaces it.
    pub(crate) fn show_detached(&mut self, view: Vec<Message>) {
        self.active = None;
        self.view = view;
    }

    /// Every client-held message across all conversations, in insertion order
    pub fn all_messages(&self) -> impl Iterator<Item = &Message> {
        let mut entries: Vec<&LedgerEntry> = self
            .sent
            .values()
            .chain(self.received.values())
            .flatten()
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| &e.message)
    }

    /// Whether either bucket of `key` holds `id`
    pub fn contains(&self, key: &ConversationKey, id: &str) -> bool {
        self.entries(key).any(|e| e.message.id == id)
    }

    /// Total number of bucketed messages, duplicates included
    pub fn len(&self) -> usize {
        self.sent.values().chain(self.received.values()).map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            messages: self.view.clone(),
            sent_messages: self.sent.clone(),
            received_messages: self.received.clone(),
            active_key: self.active.clone(),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let next_seq = snapshot
            .sent_messages
            .values()
            .chain(snapshot.received_messages.values())
            .flatten()
            .map(|e| e.seq + 1)
            .max()
            .unwrap_or(0);
        Self {
            sent: snapshot.sent_messages,
            received: snapshot.received_messages,
            active: snapshot.active_key,
            view: snapshot.messages,
            next_seq,
        }
    }

    fn entry(&mut self, message: Message) -> LedgerEntry {
        let seq = self.next_seq;
        self.next_seq += 1;
        LedgerEntry { seq, message }
    }

    /// Both buckets of `key`, unordered
    fn entries<'a>(&'a self, key: &ConversationKey) -> impl Iterator<Item = &'a LedgerEntry> {
        self.sent
            .get(key)
            .into_iter()
            .chain(self.received.get(key))
            .flatten()
    }

    fn publish(&mut self, key: &ConversationKey, message: Message) {
        if self.active.as_ref() == Some(key) {
            let view = std::mem::take(&mut self.view);
            self.view = merge_messages(view.into_iter().chain(std::iter::once(message)));
        }
    }
}
