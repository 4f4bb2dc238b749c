use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side account name. The server identifies users by username.
pub type UserId = String;

/// Wire spelling of the group recipient.
pub const GROUP_RECIPIENT: &str = "all";

/// Client-generated token identifying one logical message across the
/// optimistic echo and the server broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    All,
    User(UserId),
}

impl Recipient {
    /// Missing, empty and `"all"` recipients all mean the group chat.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some(GROUP_RECIPIENT) => Self::All,
            Some(user) => Self::User(user.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::All => GROUP_RECIPIENT,
            Self::User(user) => user,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::User(user) => Some(user),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Shown optimistically, not yet seen coming back from the server.
    Local,
    /// Received from (or confirmed by) the server.
    Remote,
}

/// One entry of the message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: ClientId,
    pub server_id: Option<String>,
    pub sender: UserId,
    pub recipient: Recipient,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub origin: Origin,
}

impl Message {
    pub fn is_group(&self) -> bool {
        self.recipient.is_group()
    }

    pub fn is_confirmed(&self) -> bool {
        self.origin == Origin::Remote
    }

    /// True when the message is a direct message between `a` and `b`, in
    /// either direction.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        match self.recipient.user() {
            Some(to) => (self.sender == a && to == b) || (self.sender == b && to == a),
            None => false,
        }
    }

    /// The conversation this message belongs to, as seen by `local_user`.
    /// Direct messages that do not involve the local user have none.
    pub fn conversation(&self, local_user: &str) -> Option<ConversationKey> {
        match self.recipient.user() {
            None => Some(ConversationKey::Group),
            Some(to) if self.sender == local_user => Some(ConversationKey::Peer(to.to_string())),
            Some(to) if to == local_user => Some(ConversationKey::Peer(self.sender.clone())),
            Some(_) => None,
        }
    }
}

/// A message as decoded from the server, before it enters the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub client_id: Option<ClientId>,
    pub server_id: Option<String>,
    pub sender: UserId,
    pub recipient: Recipient,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Either the group chat or a direct conversation with one peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationKey {
    Group,
    Peer(UserId),
}

impl ConversationKey {
    pub fn from_peer(peer: Option<UserId>) -> Self {
        match peer {
            Some(peer) => Self::Peer(peer),
            None => Self::Group,
        }
    }

    pub fn peer(&self) -> Option<&str> {
        match self {
            Self::Group => None,
            Self::Peer(peer) => Some(peer),
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self {
            Self::Group => Recipient::All,
            Self::Peer(peer) => Recipient::User(peer.clone()),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => f.write_str("Global Chat"),
            Self::Peer(peer) => write!(f, "Chat with {peer}"),
        }
    }
}
