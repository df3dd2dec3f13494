use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageId, UserId};

/// Frames a connected client may send. A missing `to`/`from` deserializes to
/// `None` and is treated as an unreachable peer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "typing")]
    Typing {
        #[serde(default)]
        to: Option<UserId>,
    },
    #[serde(rename = "stopTyping")]
    StopTyping {
        #[serde(default)]
        to: Option<UserId>,
    },
    #[serde(rename = "markAsSeen")]
    MarkAsSeen {
        #[serde(default)]
        from: Option<UserId>,
    },
    #[serde(rename = "messageDelivered")]
    MessageDelivered {
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
}

impl ClientEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stopTyping",
            ClientEvent::MarkAsSeen { .. } => "markAsSeen",
            ClientEvent::MessageDelivered { .. } => "messageDelivered",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers(Vec<UserId>),
    #[serde(rename = "typing")]
    Typing { from: UserId },
    #[serde(rename = "stopTyping")]
    StopTyping { from: UserId },
    #[serde(rename = "messagesSeen")]
    MessagesSeen {
        by: UserId,
        #[serde(rename = "messageIds")]
        message_ids: Vec<MessageId>,
    },
    #[serde(rename = "newMessage")]
    NewMessage(Message),
    #[serde(rename = "messageDelivered")]
    MessageDelivered {
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_typing_frame() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "typing", "data": {"to": "bob"}})).unwrap();
        assert_eq!(event, ClientEvent::Typing { to: Some("bob".into()) });
    }

    #[test]
    fn missing_target_parses_as_none() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "stopTyping", "data": {}})).unwrap();
        assert_eq!(event, ClientEvent::StopTyping { to: None });

        let event: ClientEvent =
            serde_json::from_value(json!({"event": "markAsSeen", "data": {}})).unwrap();
        assert_eq!(event, ClientEvent::MarkAsSeen { from: None });
    }

    #[test]
    fn delivered_ack_ignores_extra_fields() {
        let id = MessageId::new();
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "messageDelivered",
            "data": {"messageId": id, "to": "alice"}
        }))
        .unwrap();
        assert_eq!(event, ClientEvent::MessageDelivered { message_id: id });
    }

    #[test]
    fn server_frames_use_wire_names() {
        let frame = serde_json::to_value(ServerEvent::GetOnlineUsers(vec!["a".into(), "b".into()])).unwrap();
        assert_eq!(frame, json!({"event": "getOnlineUsers", "data": ["a", "b"]}));

        let id = MessageId::new();
        let frame = serde_json::to_value(ServerEvent::MessagesSeen {
            by: "bob".into(),
            message_ids: vec![id],
        })
        .unwrap();
        assert_eq!(frame["event"], "messagesSeen");
        assert_eq!(frame["data"]["by"], "bob");
        assert_eq!(frame["data"]["messageIds"][0], json!(id));
    }
}
