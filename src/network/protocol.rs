//! JSON frames exchanged over the chat websocket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{ClientId, IncomingMessage, Recipient, UserId};
use crate::error::ProtocolError;

/// Frames the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Message(MessageFrame),
    Users {
        #[serde(default)]
        users: Option<Vec<UserId>>,
    },
    UserJoined {
        username: UserId,
    },
    UserLeft {
        username: UserId,
    },
    Typing {
        content: TypingNotice,
    },
    /// Presence delta in the `{user_id, is_online}` form.
    Status {
        content: StatusNotice,
    },
    Error {
        message: String,
    },
}

const KNOWN_TYPES: &[&str] = &[
    "message",
    "users",
    "user_joined",
    "user_left",
    "typing",
    "status",
    "error",
];

/// A chat message as the server sends it, both live and from history.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageFrame {
    #[serde(alias = "username")]
    pub sender: UserId,
    #[serde(default)]
    pub recipient: Option<String>,
    pub content: String,
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Database id assigned by the server; numeric on the reference server.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

impl MessageFrame {
    pub fn into_incoming(self) -> IncomingMessage {
        let server_id = self.id.and_then(|id| match id {
            serde_json::Value::String(id) if !id.is_empty() => Some(id),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        });

        IncomingMessage {
            client_id: self
                .client_id
                .filter(|id| !id.is_empty())
                .map(ClientId::from),
            server_id,
            sender: self.sender,
            recipient: Recipient::parse(self.recipient.as_deref()),
            content: self.content,
            sent_at: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypingNotice {
    #[serde(alias = "sender_id", alias = "username")]
    pub sender: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusNotice {
    #[serde(alias = "username")]
    pub user_id: UserId,
    pub is_online: bool,
}

/// Frames the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message {
        content: String,
        recipient: String,
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },
    Typing {
        content: TypingPayload,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypingPayload {
    pub recipient_id: UserId,
    pub is_typing: bool,
}

impl OutboundFrame {
    pub fn typing(recipient: &str, is_typing: bool) -> Self {
        Self::Typing {
            content: TypingPayload {
                recipient_id: recipient.to_string(),
                is_typing,
            },
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode one text frame. A JSON object without a `type` is a chat
/// message: the server writes stored and broadcast messages bare. Unknown
/// `type` values get their own error so they can be logged at a lower level
/// than genuinely broken JSON.
pub fn decode(raw: &str) -> Result<InboundFrame, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let kind = match value.get("type") {
        None | Some(serde_json::Value::Null) => {
            return Ok(InboundFrame::Message(MessageFrame::deserialize(value)?));
        }
        Some(serde_json::Value::String(kind)) => Some(kind.clone()),
        Some(_) => None,
    };

    match InboundFrame::deserialize(value) {
        Ok(frame) => Ok(frame),
        Err(err) => match kind {
            Some(kind) if !KNOWN_TYPES.contains(&kind.as_str()) => {
                Err(ProtocolError::UnknownType(kind))
            }
            _ => Err(ProtocolError::Malformed(err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_with_client_id() {
        let raw = r#"{"type":"message","sender":"alice","recipient":"bob","content":"hi","clientId":"X","timestamp":"2024-05-01T10:00:00Z"}"#;
        let InboundFrame::Message(frame) = decode(raw).unwrap() else {
            panic!("expected message frame");
        };
        let incoming = frame.into_incoming();
        assert_eq!(incoming.client_id, Some(ClientId::from("X")));
        assert_eq!(incoming.sender, "alice");
        assert_eq!(incoming.recipient, Recipient::User("bob".to_string()));
        assert_eq!(incoming.sent_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn accepts_username_alias_and_numeric_server_id() {
        let raw = r#"{"type":"message","id":42,"username":"bob","content":"yo","timestamp":"2024-05-01T10:00:00.123456789Z","isPrivate":false}"#;
        let InboundFrame::Message(frame) = decode(raw).unwrap() else {
            panic!("expected message frame");
        };
        let incoming = frame.into_incoming();
        assert_eq!(incoming.sender, "bob");
        assert_eq!(incoming.server_id.as_deref(), Some("42"));
        assert_eq!(incoming.recipient, Recipient::All);
        assert!(incoming.client_id.is_none());
    }

    #[test]
    fn bare_server_message_without_type_is_a_message() {
        let raw = r#"{"id":7,"username":"bob","content":"hi all","timestamp":"2024-05-01T10:00:00Z","isPrivate":false}"#;
        let InboundFrame::Message(frame) = decode(raw).unwrap() else {
            panic!("expected message frame");
        };
        let incoming = frame.into_incoming();
        assert_eq!(incoming.sender, "bob");
        assert_eq!(incoming.content, "hi all");
        assert_eq!(incoming.server_id.as_deref(), Some("7"));
        assert_eq!(incoming.recipient, Recipient::All);

        let private = r#"{"id":8,"username":"bob","recipient":"alice","content":"psst","timestamp":"2024-05-01T10:00:01Z","isPrivate":true}"#;
        let InboundFrame::Message(frame) = decode(private).unwrap() else {
            panic!("expected message frame");
        };
        assert_eq!(frame.into_incoming().recipient, Recipient::User("alice".to_string()));
    }

    #[test]
    fn bare_object_missing_content_is_malformed() {
        assert!(matches!(
            decode(r#"{"username":"bob"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(decode("[1,2]"), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn status_frame_decodes() {
        assert_eq!(
            decode(r#"{"type":"status","content":{"user_id":"carol","is_online":false}}"#).unwrap(),
            InboundFrame::Status {
                content: StatusNotice {
                    user_id: "carol".to_string(),
                    is_online: false
                }
            }
        );
    }

    #[test]
    fn null_user_list_decodes_as_empty() {
        let frame = decode(r#"{"type":"users","users":null}"#).unwrap();
        assert_eq!(frame, InboundFrame::Users { users: None });
    }

    #[test]
    fn presence_deltas_decode() {
        assert_eq!(
            decode(r#"{"type":"user_joined","username":"carol"}"#).unwrap(),
            InboundFrame::UserJoined {
                username: "carol".to_string()
            }
        );
        assert_eq!(
            decode(r#"{"type":"user_left","username":"carol"}"#).unwrap(),
            InboundFrame::UserLeft {
                username: "carol".to_string()
            }
        );
    }

    #[test]
    fn typing_notice_accepts_sender_id() {
        let frame = decode(r#"{"type":"typing","content":{"sender_id":"bob","is_typing":true}}"#)
            .unwrap();
        assert_eq!(
            frame,
            InboundFrame::Typing {
                content: TypingNotice {
                    sender: "bob".to_string(),
                    is_typing: true
                }
            }
        );
    }

    #[test]
    fn unknown_type_is_reported_separately() {
        match decode(r#"{"type":"room_message","content":"x"}"#) {
            Err(ProtocolError::UnknownType(kind)) => assert_eq!(kind, "room_message"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn broken_json_is_malformed() {
        assert!(matches!(decode("{not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"type":"message","sender":"a"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn outbound_frames_match_wire_shape() {
        let message = OutboundFrame::Message {
            content: "hi".to_string(),
            recipient: "all".to_string(),
            client_id: ClientId::from("abc"),
        };
        let value: serde_json::Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type":"message","content":"hi","recipient":"all","clientId":"abc"})
        );

        let typing = OutboundFrame::typing("bob", false);
        let value: serde_json::Value = serde_json::from_str(&typing.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type":"typing","content":{"recipient_id":"bob","is_typing":false}})
        );
    }
}
