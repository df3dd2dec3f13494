use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{Message, MessageId, UserId};

/// Predicate over message records. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub id: Option<MessageId>,
    pub sender: Option<UserId>,
    pub receiver: Option<UserId>,
    /// Either direction between the two users.
    pub conversation: Option<(UserId, UserId)>,
    pub delivered: Option<bool>,
    pub seen: Option<bool>,
    /// Restricts the match to these records.
    pub among: Option<Vec<MessageId>>,
}

impl MessageFilter {
    pub fn conversation(a: &UserId, b: &UserId) -> Self {
        MessageFilter {
            conversation: Some((a.clone(), b.clone())),
            ..Self::default()
        }
    }

    /// Messages sent by `sender` to `receiver`.
    pub fn inbound(sender: &UserId, receiver: &UserId) -> Self {
        MessageFilter {
            sender: Some(sender.clone()),
            receiver: Some(receiver.clone()),
            ..Self::default()
        }
    }

    pub fn addressed_to(id: MessageId, receiver: &UserId) -> Self {
        MessageFilter {
            id: Some(id),
            receiver: Some(receiver.clone()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn unseen(mut self) -> Self {
        self.seen = Some(false);
        self
    }

    #[must_use]
    pub fn among(mut self, ids: Vec<MessageId>) -> Self {
        self.among = Some(ids);
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.id.map_or(true, |id| message.id == id)
            && self.sender.as_ref().map_or(true, |s| &message.sender_id == s)
            && self.receiver.as_ref().map_or(true, |r| &message.receiver_id == r)
            && self
                .conversation
                .as_ref()
                .map_or(true, |(a, b)| message.between(a, b))
            && self.delivered.map_or(true, |d| message.delivered == d)
            && self.seen.map_or(true, |s| message.seen == s)
            && self.among.as_ref().map_or(true, |ids| ids.contains(&message.id))
    }
}

/// Forward-only status change. Marking seen always marks delivered as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePatch {
    Delivered,
    Seen,
}

impl MessagePatch {
    /// Applies the patch, returning whether the record changed.
    pub fn apply(self, message: &mut Message) -> bool {
        let before = (message.delivered, message.seen);
        message.delivered = true;
        if self == MessagePatch::Seen {
            message.seen = true;
        }
        before != (message.delivered, message.seen)
    }
}

/// Durable message records. `update` returns the ids it actually changed,
/// evaluated in the same step as the write.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: Message) -> Result<Message>;

    /// Matching records ordered by creation time.
    async fn find(&self, filter: &MessageFilter) -> Result<Vec<Message>>;

    async fn update(&self, filter: &MessageFilter, patch: MessagePatch) -> Result<Vec<MessageId>>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: Message) -> Result<Message> {
        let mut messages = self.messages.write().await;
        messages.push(message.clone());
        Ok(message)
    }

    async fn find(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut found: Vec<Message> = messages.iter().filter(|m| filter.matches(m)).cloned().collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }

    async fn update(&self, filter: &MessageFilter, patch: MessagePatch) -> Result<Vec<MessageId>> {
        let mut messages = self.messages.write().await;
        let changed = messages
            .iter_mut()
            .filter(|m| filter.matches(m))
            .filter_map(|m| patch.apply(m).then_some(m.id))
            .collect();
        Ok(changed)
    }
}
