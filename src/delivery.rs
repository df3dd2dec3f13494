//! Per-message delivery state: `sent → delivered → seen`.
//!
//! Every transition writes to the store first and only then builds the
//! notifications for the counterpart. A failed or timed-out store call aborts
//! the transition with no notification. Marking a message seen also marks it
//! delivered, so `seen` never holds without `delivered`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::time::timeout;

use crate::error::{ChatError, Result};
use crate::messages::ServerEvent;
use crate::models::{Message, MessageId, NewMessage, UserId};
use crate::registry::{ConnectionRegistry, Outbound};
use crate::store::{MessageFilter, MessagePatch, MessageStore};

/// Result of a committed transition plus the events it produced. The caller
/// dispatches `outbound` once it has accepted `value`.
#[derive(Debug)]
pub struct Transition<T> {
    pub value: T,
    pub outbound: Vec<Outbound>,
}

impl<T> Transition<T> {
    fn quiet(value: T) -> Self {
        Transition {
            value,
            outbound: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct DeliveryService {
    registry: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
    store_timeout: Duration,
}

impl DeliveryService {
    pub fn new(registry: ConnectionRegistry, store: Arc<dyn MessageStore>, store_timeout: Duration) -> Self {
        DeliveryService {
            registry,
            store,
            store_timeout,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Stores a new message. It is delivered iff the receiver is connected
    /// right now; in that case the receiver gets the record and the sender an
    /// acknowledgment.
    pub async fn send_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        body: NewMessage,
    ) -> Result<Transition<Message>> {
        if body.is_empty() {
            return Err(ChatError::InvalidPayload("message needs text or an image".into()));
        }

        let receiver_conn = self.registry.lookup(receiver).await;
        let message = Message::new(sender.clone(), receiver.clone(), body, receiver_conn.is_some());
        let stored = self.guarded("insert", self.store.insert(message)).await?;

        let mut outbound = Vec::new();
        if let Some(conn) = receiver_conn {
            outbound.push(Outbound::new(conn, ServerEvent::NewMessage(stored.clone())));
            if let Some(sender_conn) = self.registry.lookup(sender).await {
                outbound.push(Outbound::new(
                    sender_conn,
                    ServerEvent::MessageDelivered { message_id: stored.id },
                ));
            }
        }
        info!(
            "Message {} from {} to {} stored as {:?}",
            stored.id,
            sender,
            receiver,
            stored.state()
        );
        Ok(Transition { value: stored, outbound })
    }

    /// Marks everything `counterpart` sent to `viewer` as seen and tells the
    /// counterpart which messages flipped. Re-running with nothing unseen
    /// changes nothing and notifies no one.
    pub async fn mark_conversation_seen(
        &self,
        viewer: &UserId,
        counterpart: &UserId,
    ) -> Result<Transition<Vec<MessageId>>> {
        let filter = MessageFilter::inbound(counterpart, viewer).unseen();
        self.mark_seen(viewer, counterpart, &filter).await
    }

    /// Conversation history between `viewer` and `counterpart`, oldest first.
    /// Opening a conversation counts as viewing it: the inbound messages that
    /// were read are marked seen, and the returned history carries the new
    /// flags. A failed read writes nothing.
    pub async fn fetch_conversation(
        &self,
        viewer: &UserId,
        counterpart: &UserId,
    ) -> Result<Transition<Vec<Message>>> {
        let mut history = self
            .guarded(
                "find",
                self.store.find(&MessageFilter::conversation(viewer, counterpart)),
            )
            .await?;

        let inbound = MessageFilter::inbound(counterpart, viewer).unseen();
        let unread: Vec<MessageId> = history
            .iter()
            .filter(|m| inbound.matches(m))
            .map(|m| m.id)
            .collect();
        if unread.is_empty() {
            return Ok(Transition::quiet(history));
        }

        // Only what the viewer is about to receive; later arrivals stay unseen.
        let seen = self
            .mark_seen(viewer, counterpart, &inbound.among(unread))
            .await?;
        for message in history.iter_mut().filter(|m| seen.value.contains(&m.id)) {
            MessagePatch::Seen.apply(message);
        }
        Ok(Transition {
            value: history,
            outbound: seen.outbound,
        })
    }

    async fn mark_seen(
        &self,
        viewer: &UserId,
        counterpart: &UserId,
        filter: &MessageFilter,
    ) -> Result<Transition<Vec<MessageId>>> {
        let changed = self
            .guarded("bulk update", self.store.update(filter, MessagePatch::Seen))
            .await?;
        if changed.is_empty() {
            return Ok(Transition::quiet(changed));
        }

        info!("{} saw {} message(s) from {}", viewer, changed.len(), counterpart);
        let outbound = self
            .registry
            .lookup(counterpart)
            .await
            .map(|conn| {
                Outbound::new(
                    conn,
                    ServerEvent::MessagesSeen {
                        by: viewer.clone(),
                        message_ids: changed.clone(),
                    },
                )
            })
            .into_iter()
            .collect();
        Ok(Transition { value: changed, outbound })
    }

    /// The receiver confirms one inbound message reached it. The sender gets
    /// `messageDelivered`; repeating the ack is harmless.
    pub async fn acknowledge_delivered(&self, receiver: &UserId, message_id: MessageId) -> Result<Transition<()>> {
        let filter = MessageFilter::addressed_to(message_id, receiver);
        let message = self.find_one(&filter, message_id).await?;
        self.guarded("update", self.store.update(&filter, MessagePatch::Delivered))
            .await?;

        let outbound = self
            .registry
            .lookup(&message.sender_id)
            .await
            .map(|conn| Outbound::new(conn, ServerEvent::MessageDelivered { message_id }))
            .into_iter()
            .collect();
        Ok(Transition { value: (), outbound })
    }

    /// Marks a single inbound message seen.
    pub async fn mark_message_seen(&self, viewer: &UserId, message_id: MessageId) -> Result<Transition<bool>> {
        let filter = MessageFilter::addressed_to(message_id, viewer);
        let message = self.find_one(&filter, message_id).await?;
        let changed = self
            .guarded("update", self.store.update(&filter, MessagePatch::Seen))
            .await?;
        if changed.is_empty() {
            return Ok(Transition::quiet(false));
        }

        let outbound = self
            .registry
            .lookup(&message.sender_id)
            .await
            .map(|conn| {
                Outbound::new(
                    conn,
                    ServerEvent::MessagesSeen {
                        by: viewer.clone(),
                        message_ids: changed,
                    },
                )
            })
            .into_iter()
            .collect();
        Ok(Transition { value: true, outbound })
    }

    /// Unseen inbound messages per sender.
    pub async fn unseen_counts(&self, viewer: &UserId) -> Result<BTreeMap<UserId, usize>> {
        let filter = MessageFilter {
            receiver: Some(viewer.clone()),
            ..MessageFilter::default()
        }
        .unseen();
        let unseen = self.guarded("find", self.store.find(&filter)).await?;

        let mut counts = BTreeMap::new();
        for message in unseen {
            *counts.entry(message.sender_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn find_one(&self, filter: &MessageFilter, id: MessageId) -> Result<Message> {
        self.guarded("find", self.store.find(filter))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::NotFound(format!("message {id}")))
    }

    async fn guarded<T, F>(&self, op: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!("Store {} failed: {}", op, e);
                Err(e)
            }
            Err(_) => {
                warn!("Store {} timed out after {:?}", op, self.store_timeout);
                Err(ChatError::StorageTimeout)
            }
        }
    }
}
