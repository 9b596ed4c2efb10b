//! Chat surface abstraction.
//!
//! The poller only needs a handful of message operations. Each fallible one
//! returns a [`ChatError`] that says *how* it failed, so callers can treat a
//! deleted message differently from a flaky network.

pub mod discord;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The message (or channel) no longer exists.
    #[error("not found")]
    NotFound,
    /// Missing permissions or a bad token.
    #[error("forbidden")]
    Forbidden,
    /// Network trouble, rate limits, server errors, undecodable replies.
    #[error("transient chat error: {0}")]
    Transient(String),
}

/// Platform identifier of a posted message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRef(pub String);

impl MessageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageRef {
    fn from(s: &str) -> Self {
        MessageRef(s.to_string())
    }
}

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rich message block (Discord "embed").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
}

#[async_trait]
pub trait ChatSurface: Send + Sync {
    async fn send_text(&self, content: &str) -> Result<MessageRef, ChatError>;

    async fn send_embed(&self, embed: &Embed) -> Result<MessageRef, ChatError>;

    /// Replace the embed of an existing message in place.
    async fn edit_embed(&self, msg: &MessageRef, embed: &Embed) -> Result<(), ChatError>;

    /// Current text content of a message.
    async fn fetch_content(&self, msg: &MessageRef) -> Result<String, ChatError>;

    async fn delete(&self, msg: &MessageRef) -> Result<(), ChatError>;

    /// Delete every message this bot authored in the channel. Returns how
    /// many were removed.
    async fn purge_own_messages(&self) -> Result<usize, ChatError>;

    /// Render a ping for a role or user given by ID or name. Falls back to
    /// the literal `@identifier` when nothing matches.
    async fn resolve_mention(&self, identifier: &str) -> String;
}

/// In-memory chat channel for tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Posted {
        Text(String),
        Embed(Embed),
    }

    #[derive(Default)]
    struct Inner {
        next_id: u64,
        messages: BTreeMap<u64, Posted>,
        sends: usize,
        edits: usize,
        deletes: Vec<MessageRef>,
        fail_edits: bool,
        fail_sends: bool,
        forbidden_deletes: HashSet<String>,
        forbidden_fetches: HashSet<String>,
        /// Messages authored by someone else.
        foreign: HashSet<u64>,
    }

    #[derive(Default)]
    pub struct FakeChat {
        inner: Mutex<Inner>,
    }

    impl FakeChat {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a message as if it had been posted by an earlier run.
        pub fn seed_text(&self, content: &str) -> MessageRef {
            let mut inner = self.inner.lock().unwrap();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.messages.insert(id, Posted::Text(content.to_string()));
            MessageRef(id.to_string())
        }

        /// A message from another user; purge leaves it alone.
        pub fn seed_foreign(&self, content: &str) -> MessageRef {
            let msg = self.seed_text(content);
            let id: u64 = msg.as_str().parse().unwrap();
            self.inner.lock().unwrap().foreign.insert(id);
            msg
        }

        /// Remove a message behind the bot's back.
        pub fn remove_externally(&self, msg: &MessageRef) {
            let id: u64 = msg.as_str().parse().unwrap();
            self.inner.lock().unwrap().messages.remove(&id);
        }

        pub fn set_fail_edits(&self, fail: bool) {
            self.inner.lock().unwrap().fail_edits = fail;
        }

        pub fn set_fail_sends(&self, fail: bool) {
            self.inner.lock().unwrap().fail_sends = fail;
        }

        pub fn forbid_delete(&self, msg: &MessageRef) {
            self.inner
                .lock()
                .unwrap()
                .forbidden_deletes
                .insert(msg.0.clone());
        }

        /// Make reads of `msg` fail with `Forbidden` while it stays live.
        pub fn forbid_fetch(&self, msg: &MessageRef) {
            self.inner
                .lock()
                .unwrap()
                .forbidden_fetches
                .insert(msg.0.clone());
        }

        pub fn sends(&self) -> usize {
            self.inner.lock().unwrap().sends
        }

        pub fn edits(&self) -> usize {
            self.inner.lock().unwrap().edits
        }

        pub fn deletes(&self) -> Vec<MessageRef> {
            self.inner.lock().unwrap().deletes.clone()
        }

        pub fn live_count(&self) -> usize {
            self.inner.lock().unwrap().messages.len()
        }

        pub fn get(&self, msg: &MessageRef) -> Option<Posted> {
            let id: u64 = msg.as_str().parse().ok()?;
            self.inner.lock().unwrap().messages.get(&id).cloned()
        }

        /// All live text messages, oldest first.
        pub fn texts(&self) -> Vec<String> {
            self.inner
                .lock()
                .unwrap()
                .messages
                .values()
                .filter_map(|p| match p {
                    Posted::Text(t) => Some(t.clone()),
                    Posted::Embed(_) => None,
                })
                .collect()
        }

        fn post(&self, posted: Posted) -> Result<MessageRef, ChatError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_sends {
                return Err(ChatError::Transient("send disabled".to_string()));
            }
            inner.next_id += 1;
            inner.sends += 1;
            let id = inner.next_id;
            inner.messages.insert(id, posted);
            Ok(MessageRef(id.to_string()))
        }

        fn parse(msg: &MessageRef) -> Result<u64, ChatError> {
            msg.as_str().parse().map_err(|_| ChatError::NotFound)
        }
    }

    #[async_trait]
    impl ChatSurface for FakeChat {
        async fn send_text(&self, content: &str) -> Result<MessageRef, ChatError> {
            self.post(Posted::Text(content.to_string()))
        }

        async fn send_embed(&self, embed: &Embed) -> Result<MessageRef, ChatError> {
            self.post(Posted::Embed(embed.clone()))
        }

        async fn edit_embed(&self, msg: &MessageRef, embed: &Embed) -> Result<(), ChatError> {
            let id = Self::parse(msg)?;
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            if inner.fail_edits {
                return Err(ChatError::Forbidden);
            }
            match inner.messages.get_mut(&id) {
                Some(slot) => {
                    *slot = Posted::Embed(embed.clone());
                    inner.edits += 1;
                    Ok(())
                }
                None => Err(ChatError::NotFound),
            }
        }

        async fn fetch_content(&self, msg: &MessageRef) -> Result<String, ChatError> {
            let id = Self::parse(msg)?;
            let inner = self.inner.lock().unwrap();
            if inner.forbidden_fetches.contains(msg.as_str()) {
                return Err(ChatError::Forbidden);
            }
            match inner.messages.get(&id) {
                Some(Posted::Text(t)) => Ok(t.clone()),
                Some(Posted::Embed(_)) => Ok(String::new()),
                None => Err(ChatError::NotFound),
            }
        }

        async fn delete(&self, msg: &MessageRef) -> Result<(), ChatError> {
            let id = Self::parse(msg)?;
            let mut inner = self.inner.lock().unwrap();
            inner.deletes.push(msg.clone());
            if inner.forbidden_deletes.contains(msg.as_str()) {
                return Err(ChatError::Forbidden);
            }
            inner
                .messages
                .remove(&id)
                .map(|_| ())
                .ok_or(ChatError::NotFound)
        }

        async fn purge_own_messages(&self) -> Result<usize, ChatError> {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            let before = inner.messages.len();
            let foreign = &inner.foreign;
            inner.messages.retain(|id, _| foreign.contains(id));
            Ok(before - inner.messages.len())
        }

        async fn resolve_mention(&self, identifier: &str) -> String {
            if identifier.chars().all(|c| c.is_ascii_digit()) {
                format!("<@&{}>", identifier)
            } else {
                format!("@{}", identifier)
            }
        }
    }
}
