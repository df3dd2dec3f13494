//! Maps each inbound socket event to its handler. Handlers see only the
//! caller's connection and the payload and return the events to send, so the
//! transport just forwards what comes back.

use log::{debug, warn};

use crate::delivery::DeliveryService;
use crate::error::Result;
use crate::messages::{ClientEvent, ServerEvent};
use crate::models::{MessageId, UserId};
use crate::registry::{ConnectionHandle, Outbound};
use crate::typing::{self, TypingSignal};

pub async fn dispatch(delivery: &DeliveryService, conn: &ConnectionHandle, event: ClientEvent) -> Vec<Outbound> {
    let tag = event.tag();
    debug!("{} from {}", tag, conn.user);

    let result = match event {
        ClientEvent::Typing { to } => handle_typing(delivery, &conn.user, to, TypingSignal::Start).await,
        ClientEvent::StopTyping { to } => handle_typing(delivery, &conn.user, to, TypingSignal::Stop).await,
        ClientEvent::MarkAsSeen { from } => handle_mark_as_seen(delivery, &conn.user, from).await,
        ClientEvent::MessageDelivered { message_id } => {
            handle_message_delivered(delivery, &conn.user, message_id).await
        }
    };

    match result {
        Ok(outbound) => outbound,
        Err(e) => {
            warn!("{} from {} failed: {}", tag, conn.user, e);
            vec![Outbound::new(
                conn.clone(),
                ServerEvent::Error {
                    message: e.to_string(),
                },
            )]
        }
    }
}

async fn handle_typing(
    delivery: &DeliveryService,
    from: &UserId,
    to: Option<UserId>,
    signal: TypingSignal,
) -> Result<Vec<Outbound>> {
    Ok(typing::relay(delivery.registry(), from, to.as_ref(), signal)
        .await
        .into_iter()
        .collect())
}

async fn handle_mark_as_seen(delivery: &DeliveryService, viewer: &UserId, from: Option<UserId>) -> Result<Vec<Outbound>> {
    let Some(from) = from else {
        return Ok(Vec::new());
    };
    Ok(delivery.mark_conversation_seen(viewer, &from).await?.outbound)
}

async fn handle_message_delivered(
    delivery: &DeliveryService,
    receiver: &UserId,
    message_id: MessageId,
) -> Result<Vec<Outbound>> {
    Ok(delivery.acknowledge_delivered(receiver, message_id).await?.outbound)
}
