//! Ephemeral presence state: who is online, who is typing
//!
//! Nothing here is persisted. Typing entries carry a time-to-live so a
//! missed "stopped typing" event cannot pin a user as typing forever.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy)]
struct TypingEntry {
    is_typing: bool,
    updated_at: Instant,
}

#[derive(Debug, Clone)]
pub struct Presence {
    online: BTreeSet<String>,
    typing: HashMap<String, TypingEntry>,
    ttl: Duration,
}

impl Presence {
    pub fn new(ttl: Duration) -> Self {
        Self {
            online: BTreeSet::new(),
            typing: HashMap::new(),
            ttl,
        }
    }

    pub fn set_status(&mut self, user_id: &str, status: PresenceStatus) {
        match status {
            PresenceStatus::Online => {
                self.online.insert(user_id.to_string());
            }
            PresenceStatus::Offline => {
                self.online.remove(user_id);
                self.typing.remove(user_id);
            }
        }
    }

    /// Full replace of the online set
    pub fn replace_online(&mut self, users: impl IntoIterator<Item = String>) {
        self.online = users.into_iter().collect();
    }

    /// Last write wins
    pub fn set_typing(&mut self, user_id: &str, is_typing: bool, now: Instant) {
        self.typing.insert(
            user_id.to_string(),
            TypingEntry {
                is_typing,
                updated_at: now,
            },
        );
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub fn online(&self) -> impl Iterator<Item = &str> {
        self.online.iter().map(String::as_str)
    }

    pub fn is_typing(&self, user_id: &str, now: Instant) -> bool {
        self.typing
            .get(user_id)
            .is_some_and(|entry| entry.is_typing && !self.expired(entry, now))
    }

    /// Users currently typing, sorted
    pub fn typing_users(&self, now: Instant) -> Vec<String> {
        let mut users: Vec<String> = self
            .typing
            .iter()
            .filter(|(_, entry)| entry.is_typing && !self.expired(entry, now))
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Drop expired and stopped entries. Returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.typing.len();
        let ttl = self.ttl;
        self.typing
            .retain(|_, entry| entry.is_typing && now.saturating_duration_since(entry.updated_at) < ttl);
        before - self.typing.len()
    }

    /// Forget everything; called when the channel disconnects
    pub fn clear(&mut self) {
        self.online.clear();
        self.typing.clear();
    }

    fn expired(&self, entry: &TypingEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.updated_at) >= self.ttl
    }
}
